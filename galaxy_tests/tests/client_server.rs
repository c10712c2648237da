//! Socket-level integration tests: admission, chat relay, client ids.

use galaxy_client::GameClient;
use galaxy_server::Server;
use galaxy_shared::{
    config::ServerConfig,
    message::{Message, MessageType},
    net::ClientId,
};
use galaxy_tests::{connect_as, init_tracing, start_ephemeral, start_server, wait_until, QUIET, WAIT};

async fn expect_chat(client: &mut GameClient) -> anyhow::Result<String> {
    let mut msg = client
        .recv_timeout(WAIT)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no frame within {WAIT:?}"))?;
    assert_eq!(msg.message_type(), MessageType::ChatMessage);
    Ok(msg.read_string())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_is_relayed_to_every_client() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let mut a = connect_as(addr, "Alpha").await?;
    let mut b = connect_as(addr, "Beta").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 2).await);

    a.say("hello").await?;
    assert_eq!(expect_chat(&mut a).await?, "hello");
    assert_eq!(expect_chat(&mut b).await?, "hello");

    // Exactly once.
    assert!(a.recv_timeout(QUIET).await?.is_none());
    assert!(b.recv_timeout(QUIET).await?.is_none());

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_frame_sets_display_name() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let mut client = connect_as(addr, "Orion").await?;
    assert!(wait_until(WAIT, || server.client_name(ClientId(1)).as_deref() == Some("Orion")).await);

    client.announce("Rigel").await?;
    assert!(wait_until(WAIT, || server.client_name(ClientId(1)).as_deref() == Some("Rigel")).await);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clients_over_capacity_are_closed() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_server(ServerConfig {
        max_clients: 1,
        ..ServerConfig::ephemeral()
    })
    .await?;

    let _a = connect_as(addr, "First").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);

    let mut b = GameClient::connect_addr(addr).await?;
    assert!(b.recv_timeout(WAIT).await.is_err(), "rejected client should see EOF");
    assert_eq!(server.connected_client_count(), 1);
    assert_eq!(server.client_ids(), vec![ClientId(1)]);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_ids_are_never_reused() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let a = connect_as(addr, "A").await?;
    assert!(wait_until(WAIT, || server.client_ids() == vec![ClientId(1)]).await);
    a.disconnect().await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 0).await);

    let b = connect_as(addr, "B").await?;
    assert!(wait_until(WAIT, || server.client_ids() == vec![ClientId(2)]).await);
    drop(b);
    assert!(wait_until(WAIT, || server.connected_client_count() == 0).await);

    let _c = connect_as(addr, "C").await?;
    assert!(wait_until(WAIT, || server.client_ids() == vec![ClientId(3)]).await);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_broadcast_reaches_all_once() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let mut clients = Vec::new();
    for name in ["a", "b", "c"] {
        clients.push(connect_as(addr, name).await?);
    }
    assert!(wait_until(WAIT, || server.connected_client_count() == 3).await);

    let mut notice = Message::new(MessageType::EntityUpdate);
    notice.write_u32(42);
    assert_eq!(server.broadcast_message(&notice).await, 3);

    for client in &mut clients {
        let mut got = client.recv_timeout(WAIT).await?.expect("broadcast frame");
        assert_eq!(got.message_type(), MessageType::EntityUpdate);
        assert_eq!(got.read_u32(), 42);
        assert!(client.recv_timeout(QUIET).await?.is_none());
    }

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_types_are_ignored() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = start_ephemeral().await?;

    let mut a = connect_as(addr, "A").await?;
    assert!(wait_until(WAIT, || server.connected_client_count() == 1).await);

    let mut odd = Message::new(MessageType::Other(999));
    odd.write_u8(1);
    a.send(&odd).await?;
    a.send(&Message::new(MessageType::CombatEvent)).await?;
    assert!(a.recv_timeout(QUIET).await?.is_none());

    // Still connected and still served.
    a.say("still here").await?;
    assert_eq!(expect_chat(&mut a).await?, "still here");
    assert_eq!(server.connected_client_count(), 1);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn server_is_idle_before_start() {
    let server = Server::with_config(ServerConfig::ephemeral());
    assert_eq!(server.connected_client_count(), 0);
    assert!(server.client_ids().is_empty());
}
