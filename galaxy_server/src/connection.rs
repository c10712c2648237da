//! Per-client socket handling.
//!
//! A [`Connection`] wraps one accepted TCP stream. The read half is used only
//! by the client's worker task; the write half is shared by anyone sending to
//! the client (worker dispatch, broadcasts, sector fan-out). Each half sits
//! behind its own async lock, so a frame is always written whole and a slow
//! reader never blocks writers.
//!
//! Failures never escape as errors: any transport or framing problem marks the
//! connection disconnected and surfaces as `false` / `None`.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::anyhow;
use galaxy_shared::{
    config::ServerConfig,
    message::Message,
    net::{read_message, write_frame, ClientId},
};
use parking_lot::Mutex;
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{watch, Mutex as AsyncMutex},
};
use tracing::{debug, trace};

/// One connected client.
pub struct Connection {
    client_id: ClientId,
    address: SocketAddr,
    display_name: Mutex<String>,
    connected: AtomicBool,
    last_activity: Mutex<Instant>,

    reader: AsyncMutex<OwnedReadHalf>,
    writer: AsyncMutex<OwnedWriteHalf>,

    /// Flips to `true` exactly once, on disconnect.
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,

    max_payload_len: u32,
    write_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(client_id: ClientId, stream: TcpStream, address: SocketAddr, cfg: &ServerConfig) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%client_id, error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let (closed_tx, closed_rx) = watch::channel(false);

        Self {
            client_id,
            address,
            display_name: Mutex::new(String::new()),
            connected: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            closed_tx,
            closed_rx,
            max_payload_len: cfg.max_payload_len,
            write_timeout: cfg.write_timeout(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn display_name(&self) -> String {
        self.display_name.lock().clone()
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        *self.display_name.lock() = name.into();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Marks the connection dead and wakes any task blocked on it.
    ///
    /// Idempotent. The socket itself closes once the last handle is dropped.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.closed_tx.send(true);
            debug!(client_id = %self.client_id, addr = %self.address, "Connection closed");
        }
    }

    pub fn update_last_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn time_since_last_activity(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Writes one complete frame.
    ///
    /// Returns `false` and disconnects on any write error, on the configured
    /// write timeout, or when the connection is closed mid-write.
    pub async fn send_message(&self, message: &Message) -> bool {
        let sent = self.send_frame(&message.serialize()).await;
        if sent {
            trace!(client_id = %self.client_id, ty = ?message.message_type(), "Frame sent");
        }
        sent
    }

    /// Writes bytes produced by [`Message::serialize`]. Lets a broadcast
    /// serialize once and share the frame across recipients.
    pub async fn send_frame(&self, frame: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let mut writer = self.writer.lock().await;
        let write = async {
            match self.write_timeout {
                Some(limit) => tokio::time::timeout(limit, write_frame(&mut *writer, frame))
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("write timed out after {:?}", limit))),
                None => write_frame(&mut *writer, frame).await,
            }
        };

        let result = tokio::select! {
            res = write => res,
            _ = wait_closed(self.closed_rx.clone()) => Err(anyhow!("connection closed")),
        };

        match result {
            Ok(()) => {
                self.update_last_activity();
                true
            }
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "Send failed");
                self.disconnect();
                false
            }
        }
    }

    /// Reads one complete frame.
    ///
    /// Returns `None` and disconnects on EOF, read error, or framing error.
    /// Also returns `None` as soon as the connection is disconnected.
    pub async fn receive_message(&self) -> Option<Message> {
        if !self.is_connected() {
            return None;
        }

        let mut reader = self.reader.lock().await;
        let result = tokio::select! {
            res = read_message(&mut *reader, self.max_payload_len) => res,
            _ = wait_closed(self.closed_rx.clone()) => return None,
        };

        match result {
            Ok(message) => {
                self.update_last_activity();
                Some(message)
            }
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "Receive failed");
                self.disconnect();
                None
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// The server's client table.
///
/// Guarded by its own lock. The lock is only held for map operations; callers
/// get cloned handles and do their I/O after it is released.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Arc<Connection>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.clients.lock().insert(connection.client_id(), connection);
    }

    pub fn remove(&self, id: ClientId) -> Option<Arc<Connection>> {
        self.clients.lock().remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<Connection>> {
        self.clients.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Connected ids in ascending order.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Handles to every current connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.clients.lock().values().cloned().collect()
    }

    /// Empties the table, returning what was in it.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.clients.lock().drain().map(|(_, c)| c).collect()
    }
}
