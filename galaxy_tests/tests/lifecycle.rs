//! Start/stop behaviour and transport failure handling.

use std::time::Duration;

use galaxy_client::GameClient;
use galaxy_shared::{
    config::ServerConfig,
    message::{FrameHeader, Message, MessageType},
};
use galaxy_tests::{connect_as, init_tracing, start_ephemeral, start_server, wait_until, WAIT};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_disconnects_everyone() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let mut a = connect_as(addr, "A").await?;
    let mut b = connect_as(addr, "B").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 2).await);

    server.stop().await;
    assert!(!server.is_running());
    assert_eq!(server.connected_client_count(), 0);
    assert!(a.recv_timeout(WAIT).await.is_err());
    assert!(b.recv_timeout(WAIT).await.is_err());

    // Second stop is a no-op.
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_on_same_port() -> anyhow::Result<()> {
    init_tracing();
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").await?;
        probe.local_addr()?.port()
    };
    let cfg = ServerConfig {
        port,
        ..ServerConfig::ephemeral()
    };

    let (mut server, addr) = start_server(cfg).await?;
    assert_eq!(addr.port(), port);
    let _a = connect_as(addr, "A").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);
    server.stop().await;

    server.start().await?;
    assert_eq!(server.local_addr().map(|a| a.port()), Some(port));
    let mut again = connect_as(addr, "again").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);
    again.say("back").await?;
    assert!(again.recv_timeout(WAIT).await?.is_some());

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_frame_disconnects_sender() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server(ServerConfig {
        max_payload_len: 1024,
        ..ServerConfig::ephemeral()
    })
    .await?;

    let mut raw = TcpStream::connect(addr).await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);

    let header = FrameHeader {
        message_type: MessageType::ChatMessage,
        payload_len: 4096,
    };
    raw.write_all(&header.encode()).await?;

    assert!(wait_until(WAIT, || server.connected_client_count() == 0).await);
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(WAIT, raw.read(&mut buf)).await?.unwrap_or(0);
    assert_eq!(n, 0);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn truncated_frame_then_close_removes_client() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let mut raw = TcpStream::connect(addr).await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);
    raw.write_all(&[7, 0, 10, 0, 0, 0, b'h', b'i']).await?;
    drop(raw);

    assert!(wait_until(WAIT, || server.connected_client_count() == 0).await);
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_clients_are_dropped_on_update() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server(ServerConfig {
        idle_timeout_secs: Some(1),
        ..ServerConfig::ephemeral()
    })
    .await?;

    let mut quiet = connect_as(addr, "Quiet").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);

    server.update(0.05);
    assert_eq!(server.connected_client_count(), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    server.update(0.05);
    assert!(wait_until(WAIT, || server.connected_client_count() == 0).await);
    assert!(quiet.recv_timeout(WAIT).await.is_err());

    server.stop().await;
    Ok(())
}

/// A peer that never reads must not hold up delivery to everyone else.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_reader_is_cut_off() -> anyhow::Result<()> {
    init_tracing();
    const FRAMES: usize = 128;
    const PAYLOAD: usize = 256 * 1024;

    let (mut server, addr) = start_server(ServerConfig {
        write_timeout_ms: Some(200),
        ..ServerConfig::ephemeral()
    })
    .await?;

    let mut reader = connect_as(addr, "Reader").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);
    let _stalled = TcpStream::connect(addr).await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 2).await);

    let drain = tokio::spawn(async move {
        let mut seen = 0usize;
        while seen < FRAMES {
            match reader.recv_timeout(WAIT).await {
                Ok(Some(msg)) if msg.message_type() == MessageType::EntityUpdate => seen += 1,
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        (seen, reader)
    });

    let mut bulk = Message::new(MessageType::EntityUpdate);
    bulk.write_bytes(&vec![0xAB; PAYLOAD]);
    for _ in 0..FRAMES {
        server.broadcast_message(&bulk).await;
    }

    let (seen, _reader) = drain.await?;
    assert_eq!(seen, FRAMES);
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_frame_closes_connection() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let mut client = GameClient::connect_addr(addr).await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);
    client.send(&Message::new(MessageType::Disconnect)).await?;

    assert!(wait_until(WAIT, || server.connected_client_count() == 0).await);
    assert!(client.recv_timeout(WAIT).await.is_err());

    server.stop().await;
    Ok(())
}
