//! Game server.
//!
//! Owns the listening socket, the client table and the sector table. Runs one
//! accept task plus one worker task per client; the host drives sector ticks by
//! calling [`Server::update`].
//!
//! Concurrency notes:
//! - The client table and the sector table each sit behind their own lock.
//!   Neither lock is ever held across an `.await`.
//! - Broadcasts copy connection handles out of the table, release the lock,
//!   then send.
//! - Only the accept task inserts clients, so the capacity check cannot race.
//! - `stop` signals shutdown, joins the accept task, closes every connection
//!   and then joins every worker. Sends are cancelled when their connection
//!   closes, so nothing here can stall shutdown.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use galaxy_shared::{
    config::ServerConfig,
    galaxy::{GalaxyGenerator, SectorCoord},
    message::{Message, MessageType},
    net::ClientId,
};
use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::watch,
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, trace, warn};

use crate::{
    connection::{ClientRegistry, Connection},
    sector::{MessageSink, SectorServer},
};

#[async_trait]
impl MessageSink for ClientRegistry {
    async fn send_to_client(&self, client: ClientId, message: &Message) -> bool {
        match self.get(client) {
            Some(conn) => conn.send_message(message).await,
            None => false,
        }
    }
}

/// State shared between the server handle, the accept task and the workers.
struct Shared {
    config: ServerConfig,
    running: AtomicBool,
    max_clients: AtomicUsize,
    /// Starts at 1. Never reset, so ids are not reused within a server.
    next_client_id: AtomicU32,
    clients: Arc<ClientRegistry>,
    sectors: Mutex<HashMap<SectorCoord, Arc<SectorServer>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    generator: GalaxyGenerator,
}

/// Multiplayer game server.
pub struct Server {
    shared: Arc<Shared>,
    accept_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Server on `port` with every other setting at its default.
    pub fn new(port: u16) -> Self {
        Self::with_config(ServerConfig {
            port,
            ..Default::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let shared = Shared {
            running: AtomicBool::new(false),
            max_clients: AtomicUsize::new(config.max_clients),
            next_client_id: AtomicU32::new(1),
            clients: Arc::new(ClientRegistry::new()),
            sectors: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            generator: GalaxyGenerator::new(config.galaxy_seed),
            config,
        };
        Self {
            shared: Arc::new(shared),
            accept_task: None,
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// Binds the listening socket and starts accepting clients.
    ///
    /// Returns `Ok` immediately if already running. On a bind or listen
    /// failure the server stays stopped.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let listener = bind_listener(&self.shared.config).await?;
        let local = listener.local_addr().context("listener local_addr")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shared.running.store(true, Ordering::Release);
        self.accept_task = Some(tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            shutdown_rx,
        )));
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local);

        info!(
            addr = %local,
            max_clients = self.max_clients(),
            seed = self.shared.generator.seed(),
            "Server listening"
        );
        Ok(())
    }

    /// Stops accepting, disconnects every client and waits for all worker
    /// tasks. No-op when not running.
    pub async fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Server stopping");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept task ended abnormally");
            }
        }

        for conn in self.shared.clients.drain() {
            conn.disconnect();
        }

        let workers = std::mem::take(&mut *self.shared.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Client worker ended abnormally");
            }
        }

        self.local_addr = None;
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Configured port. See [`Server::local_addr`] for the bound address.
    pub fn port(&self) -> u16 {
        self.shared.config.port
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn generator(&self) -> &GalaxyGenerator {
        &self.shared.generator
    }

    /// Applies to future admissions only. Clients already connected stay.
    pub fn set_max_clients(&self, max: usize) {
        self.shared.max_clients.store(max, Ordering::Release);
    }

    pub fn max_clients(&self) -> usize {
        self.shared.max_clients.load(Ordering::Acquire)
    }

    pub fn connected_client_count(&self) -> usize {
        self.shared.clients.len()
    }

    /// Connected client ids in ascending order.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.shared.clients.ids()
    }

    /// Name the client announced with `Connect`, empty if none yet.
    pub fn client_name(&self, id: ClientId) -> Option<String> {
        self.shared.clients.get(id).map(|c| c.display_name())
    }

    /// Host tick. Ticks every sector, then drops clients past the idle
    /// timeout. Does nothing while stopped.
    pub fn update(&self, delta_time: f32) {
        if !self.is_running() {
            return;
        }

        for sector in self.shared.sector_snapshot() {
            sector.update(delta_time);
        }

        if let Some(limit) = self.shared.config.idle_timeout() {
            for conn in self.shared.clients.snapshot() {
                let idle = conn.time_since_last_activity();
                if idle > limit {
                    info!(client_id = %conn.client_id(), idle_ms = idle.as_millis() as u64, "Dropping idle client");
                    conn.disconnect();
                }
            }
        }
    }

    /// Sends `message` to every connected client. Returns the number of
    /// successful sends. Clients whose send fails are disconnected.
    pub async fn broadcast_message(&self, message: &Message) -> usize {
        self.shared.broadcast(message).await
    }

    /// Sends `message` to the residents of sector `(x, y)`. Returns 0 if that
    /// sector does not exist.
    pub async fn broadcast_to_sector(&self, x: i32, y: i32, message: &Message) -> usize {
        match self.get_sector_server(x, y) {
            Some(sector) => sector.broadcast_to_players(message).await,
            None => 0,
        }
    }

    /// Existing sector at `(x, y)`. Never creates one.
    pub fn get_sector_server(&self, x: i32, y: i32) -> Option<Arc<SectorServer>> {
        self.shared.get_sector(SectorCoord::new(x, y))
    }

    /// Sector at `(x, y)`, created on first request. Concurrent callers for
    /// the same coordinates all get the same instance.
    pub fn create_sector_server(&self, x: i32, y: i32) -> Arc<SectorServer> {
        self.shared.create_sector(SectorCoord::new(x, y))
    }

    pub fn sector_count(&self) -> usize {
        self.shared.sectors.lock().len()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Best effort: cannot await here, so tasks wind down on their own.
        if self.shared.running.swap(false, Ordering::AcqRel) {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(true);
            }
            for conn in self.shared.clients.drain() {
                conn.disconnect();
            }
            debug!("Server dropped while running");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("clients", &self.connected_client_count())
            .field("sectors", &self.sector_count())
            .finish()
    }
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Admits or rejects a freshly accepted stream.
    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if !self.is_running() {
            return;
        }

        let max = self.max_clients.load(Ordering::Acquire);
        if self.clients.len() >= max {
            warn!(%addr, max_clients = max, "Server full, rejecting connection");
            drop(stream);
            return;
        }

        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, stream, addr, &self.config));
        self.clients.insert(Arc::clone(&conn));
        info!(client_id = %id, %addr, clients = self.clients.len(), "Client connected");

        let worker = tokio::spawn(Arc::clone(self).serve_client(conn));
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(worker);
    }

    /// Worker loop for one client: receive, dispatch, repeat.
    async fn serve_client(self: Arc<Self>, conn: Arc<Connection>) {
        while self.is_running() && conn.is_connected() {
            let Some(message) = conn.receive_message().await else {
                break;
            };
            self.dispatch(&conn, message).await;
        }
        conn.disconnect();
        self.remove_client(conn.client_id());
    }

    async fn dispatch(&self, conn: &Connection, mut message: Message) {
        let client_id = conn.client_id();
        match message.message_type() {
            MessageType::Connect => {
                if message.remaining() >= 2 {
                    let name = message.read_string();
                    if !name.is_empty() {
                        info!(%client_id, name = %name, "Client identified");
                        conn.set_display_name(name);
                    }
                }
            }
            MessageType::Disconnect => {
                debug!(%client_id, "Client requested disconnect");
                conn.disconnect();
            }
            MessageType::ChatMessage => {
                let delivered = self.broadcast(&message).await;
                debug!(%client_id, delivered, "Chat relayed");
            }
            MessageType::SectorChange => {
                if message.remaining() < 8 {
                    debug!(%client_id, len = message.len(), "Malformed sector change dropped");
                    return;
                }
                let x = message.read_i32();
                let y = message.read_i32();
                self.move_to_sector(client_id, SectorCoord::new(x, y));
            }
            other => {
                trace!(%client_id, ty = ?other, "Unhandled message dropped");
            }
        }
    }

    /// Sends one serialized frame to every client concurrently.
    async fn broadcast(&self, message: &Message) -> usize {
        let targets = self.clients.snapshot();
        if targets.is_empty() {
            return 0;
        }

        let frame = message.serialize();
        let mut sends = JoinSet::new();
        for conn in targets {
            let frame = frame.clone();
            sends.spawn(async move { conn.send_frame(&frame).await });
        }

        let mut delivered = 0;
        while let Some(sent) = sends.join_next().await {
            if matches!(sent, Ok(true)) {
                delivered += 1;
            }
        }
        delivered
    }

    fn remove_client(&self, id: ClientId) {
        let removed = self.clients.remove(id);
        for sector in self.sector_snapshot() {
            sector.remove_player(id);
        }
        if let Some(conn) = removed {
            info!(client_id = %id, addr = %conn.address(), clients = self.clients.len(), "Client disconnected");
        }
    }

    fn move_to_sector(&self, id: ClientId, coord: SectorCoord) {
        let target = self.create_sector(coord);
        for sector in self.sector_snapshot() {
            if sector.coord() != coord {
                sector.remove_player(id);
            }
        }
        if target.add_player(id) {
            debug!(client_id = %id, sector = %coord, "Client entered sector");
        }
    }

    fn get_sector(&self, coord: SectorCoord) -> Option<Arc<SectorServer>> {
        self.sectors.lock().get(&coord).cloned()
    }

    fn create_sector(&self, coord: SectorCoord) -> Arc<SectorServer> {
        let mut sectors = self.sectors.lock();
        if let Some(existing) = sectors.get(&coord) {
            return Arc::clone(existing);
        }

        let sink: Arc<dyn MessageSink> = self.clients.clone();
        let sector = Arc::new(SectorServer::new(coord.x, coord.y, &self.generator, sink));
        sectors.insert(coord, Arc::clone(&sector));
        info!(sector = %coord, sectors = sectors.len(), "Sector created");
        sector
    }

    fn sector_snapshot(&self) -> Vec<Arc<SectorServer>> {
        self.sectors.lock().values().cloned().collect()
    }
}

async fn bind_listener(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let bind = config.bind_addr();
    let addr = tokio::net::lookup_host(&bind)
        .await
        .with_context(|| format!("resolve {bind}"))?
        .next()
        .with_context(|| format!("no address for {bind}"))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .context("create socket")?;
    socket.set_reuseaddr(true).context("set SO_REUSEADDR")?;
    socket.bind(addr).with_context(|| format!("bind {addr}"))?;
    socket.listen(config.backlog).context("listen")
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => shared.admit(stream, addr),
                Err(e) => {
                    if !shared.is_running() {
                        break;
                    }
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
    debug!("Accept loop exited");
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline() -> Server {
        Server::with_config(ServerConfig::ephemeral())
    }

    #[test]
    fn defaults() {
        let server = Server::new(7777);
        assert_eq!(server.port(), 7777);
        assert_eq!(server.max_clients(), 100);
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert_eq!(server.connected_client_count(), 0);

        server.set_max_clients(3);
        assert_eq!(server.max_clients(), 3);
    }

    #[test]
    fn sectors_are_created_once_per_coordinate() {
        let server = offline();
        assert!(server.get_sector_server(3, -2).is_none());

        let a = server.create_sector_server(3, -2);
        let b = server.create_sector_server(3, -2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &server.get_sector_server(3, -2).unwrap()));
        assert_eq!((a.x(), a.y()), (3, -2));

        let other = server.create_sector_server(-2, 3);
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(server.sector_count(), 2);
    }

    #[test]
    fn concurrent_creation_yields_one_instance() {
        let server = Arc::new(offline());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let server = Arc::clone(&server);
                std::thread::spawn(move || server.create_sector_server(5, 5))
            })
            .collect();
        let sectors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sectors.iter().all(|s| Arc::ptr_eq(s, &sectors[0])));
        assert_eq!(server.sector_count(), 1);
    }

    #[test]
    fn sector_content_follows_seed() {
        let server = Server::with_config(ServerConfig {
            galaxy_seed: 99,
            ..ServerConfig::ephemeral()
        });
        let sector = server.create_sector_server(1, 2);
        assert_eq!(sector.content(), &GalaxyGenerator::new(99).generate_sector(1, 2));
    }

    #[tokio::test]
    async fn update_ticks_sectors_only_while_running() -> anyhow::Result<()> {
        let mut server = offline();
        let sector = server.create_sector_server(0, 0);
        server.update(0.05);
        assert_eq!(sector.tick_count(), 0);

        server.start().await?;
        server.update(0.05);
        assert_eq!(sector.tick_count(), 1);
        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn start_stop_restart() -> anyhow::Result<()> {
        let mut server = offline();
        server.stop().await;

        server.start().await?;
        assert!(server.is_running());
        let addr = server.local_addr().expect("bound");
        assert_ne!(addr.port(), 0);

        server.start().await?;
        assert_eq!(server.local_addr(), Some(addr));

        server.stop().await;
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        server.start().await?;
        assert!(server.is_running());
        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() -> anyhow::Result<()> {
        let taken = TcpListener::bind("127.0.0.1:0").await?;
        let port = taken.local_addr()?.port();

        let mut server = Server::with_config(ServerConfig {
            port,
            ..ServerConfig::ephemeral()
        });
        assert!(server.start().await.is_err());
        assert!(!server.is_running());
        Ok(())
    }

    #[tokio::test]
    async fn broadcast_without_clients_sends_nothing() {
        let server = offline();
        let msg = galaxy_shared::message::chat("anyone?").unwrap();
        assert_eq!(server.broadcast_message(&msg).await, 0);
        assert_eq!(server.broadcast_to_sector(9, 9, &msg).await, 0);
        assert!(server.get_sector_server(9, 9).is_none());
    }
}
