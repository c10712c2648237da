//! Client implementation.
//!
//! A thin async wrapper over one TCP stream speaking the framed protocol.
//! Receiving is buffered so a timed-out `recv_timeout` never loses a partly
//! read frame.

use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, ensure, Context};
use bytes::BytesMut;
use galaxy_shared::{
    config::ClientConfig,
    message::{self, FrameHeader, Message, MessageType, HEADER_LEN},
    net::{write_message, DEFAULT_MAX_PAYLOAD_LEN},
};
use tokio::{
    io::AsyncReadExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, ToSocketAddrs,
    },
};
use tracing::{debug, info};

/// Connected game client.
pub struct GameClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    inbound: BytesMut,
    max_payload_len: u32,
    local_addr: SocketAddr,
    server_addr: SocketAddr,
}

impl GameClient {
    /// Connects to `cfg.server_addr` and announces `cfg.player_name` (if
    /// non-empty).
    pub async fn connect(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let mut client = Self::open(cfg.server_addr.as_str(), cfg.max_payload_len).await?;
        if !cfg.player_name.is_empty() {
            client.announce(&cfg.player_name).await?;
        }
        Ok(client)
    }

    /// Connects without announcing a name.
    pub async fn connect_addr(addr: impl ToSocketAddrs) -> anyhow::Result<Self> {
        Self::open(addr, DEFAULT_MAX_PAYLOAD_LEN).await
    }

    async fn open(addr: impl ToSocketAddrs, max_payload_len: u32) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        let local_addr = stream.local_addr().context("local_addr")?;
        let server_addr = stream.peer_addr().context("peer_addr")?;
        let (reader, writer) = stream.into_split();

        info!(server = %server_addr, local = %local_addr, "Connected to server");
        Ok(Self {
            reader,
            writer,
            inbound: BytesMut::with_capacity(4096),
            max_payload_len,
            local_addr,
            server_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Writes one frame.
    pub async fn send(&mut self, message: &Message) -> anyhow::Result<()> {
        write_message(&mut self.writer, message).await
    }

    /// Sends a `Connect` frame carrying the display name.
    pub async fn announce(&mut self, name: &str) -> anyhow::Result<()> {
        self.send(&message::connect(name)?).await
    }

    /// Sends a chat line. The server relays it to everyone, sender included.
    pub async fn say(&mut self, text: &str) -> anyhow::Result<()> {
        self.send(&message::chat(text)?).await
    }

    pub async fn change_sector(&mut self, x: i32, y: i32) -> anyhow::Result<()> {
        self.send(&message::sector_change(x, y)).await
    }

    /// Waits for the next frame. Fails once the server closes the stream.
    pub async fn recv(&mut self) -> anyhow::Result<Message> {
        loop {
            if let Some(message) = self.take_frame()? {
                return Ok(message);
            }
            let n = self
                .reader
                .read_buf(&mut self.inbound)
                .await
                .context("read from server")?;
            if n == 0 {
                bail!("server closed the connection");
            }
        }
    }

    /// Like [`GameClient::recv`], but gives up after `limit` with `Ok(None)`.
    pub async fn recv_timeout(&mut self, limit: Duration) -> anyhow::Result<Option<Message>> {
        match tokio::time::timeout(limit, self.recv()).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Sends `Disconnect` and closes the stream.
    pub async fn disconnect(mut self) -> anyhow::Result<()> {
        use tokio::io::AsyncWriteExt;

        self.send(&Message::new(MessageType::Disconnect)).await?;
        self.writer.shutdown().await.context("shutdown")?;
        debug!(server = %self.server_addr, "Disconnected");
        Ok(())
    }

    /// Splits one complete frame off the inbound buffer, if there is one.
    fn take_frame(&mut self) -> anyhow::Result<Option<Message>> {
        if self.inbound.len() < HEADER_LEN {
            return Ok(None);
        }
        let head: &[u8; HEADER_LEN] = self.inbound[..HEADER_LEN].try_into()?;
        let header = FrameHeader::decode(head);
        ensure!(
            header.payload_len <= self.max_payload_len,
            "server frame of {} bytes exceeds limit of {}",
            header.payload_len,
            self.max_payload_len
        );

        let total = header.frame_len();
        if self.inbound.len() < total {
            self.inbound.reserve(total - self.inbound.len());
            return Ok(None);
        }
        let frame = self.inbound.split_to(total);
        Message::deserialize(&frame)
            .map(Some)
            .context("malformed frame")
    }
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("local_addr", &self.local_addr)
            .field("server_addr", &self.server_addr)
            .finish()
    }
}
