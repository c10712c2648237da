//! Sector servers.
//!
//! The world is an infinite grid of integer-coordinate sectors. Each
//! [`SectorServer`] owns one cell: its generated content, an entity world
//! populated from that content, and the roster of clients currently resident.
//!
//! Sectors do not own connections. Fan-out goes through an injected
//! [`MessageSink`] that can reach a client by id.

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use galaxy_shared::{
    ecs::World,
    galaxy::{GalaxyGenerator, GalaxySector, SectorCoord},
    message::Message,
    net::ClientId,
};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Delivers a message to one client by id.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Returns `true` if the frame was fully written.
    async fn send_to_client(&self, client: ClientId, message: &Message) -> bool;
}

#[derive(Debug, Default)]
struct TickState {
    last_update: Option<Instant>,
    ticks: u64,
}

/// One cell of the sector grid.
pub struct SectorServer {
    coord: SectorCoord,
    content: GalaxySector,
    entities: Mutex<World>,
    /// Resident client ids. The only state worker tasks touch concurrently.
    players: Mutex<BTreeSet<ClientId>>,
    tick: Mutex<TickState>,
    sink: Arc<dyn MessageSink>,
}

impl SectorServer {
    /// Generates the sector's content and spawns its entities.
    pub fn new(x: i32, y: i32, generator: &GalaxyGenerator, sink: Arc<dyn MessageSink>) -> Self {
        let content = generator.generate_sector(x, y);
        let mut world = World::default();
        content.populate(&mut world);

        debug!(
            x,
            y,
            asteroids = content.asteroids.len(),
            stations = content.stations.len(),
            ships = content.ships.len(),
            "Sector generated"
        );

        Self {
            coord: SectorCoord::new(x, y),
            content,
            entities: Mutex::new(world),
            players: Mutex::new(BTreeSet::new()),
            tick: Mutex::new(TickState::default()),
            sink,
        }
    }

    pub fn x(&self) -> i32 {
        self.coord.x
    }

    pub fn y(&self) -> i32 {
        self.coord.y
    }

    pub fn coord(&self) -> SectorCoord {
        self.coord
    }

    /// Content generated at construction. Never changes afterwards.
    pub fn content(&self) -> &GalaxySector {
        &self.content
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().len()
    }

    /// Runs `f` with exclusive access to the sector's entity world.
    pub fn with_entities<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.entities.lock())
    }

    // ─── Roster ───

    /// Adds a resident. Returns false if it was already present.
    pub fn add_player(&self, client: ClientId) -> bool {
        self.players.lock().insert(client)
    }

    /// Removes a resident. Returns false if it was not present.
    pub fn remove_player(&self, client: ClientId) -> bool {
        self.players.lock().remove(&client)
    }

    pub fn has_player(&self, client: ClientId) -> bool {
        self.players.lock().contains(&client)
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().len()
    }

    /// Resident ids in ascending order.
    pub fn player_ids(&self) -> Vec<ClientId> {
        self.players.lock().iter().copied().collect()
    }

    // ─── Tick ───

    /// Per-tick hook. Records when the sector last ticked.
    pub fn update(&self, delta_time: f32) {
        let mut tick = self.tick.lock();
        tick.last_update = Some(Instant::now());
        tick.ticks += 1;
        trace!(sector = %self.coord, delta_time, ticks = tick.ticks, "Sector tick");
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.tick.lock().last_update
    }

    pub fn tick_count(&self) -> u64 {
        self.tick.lock().ticks
    }

    /// Sends `message` to every resident concurrently. Returns how many
    /// sends succeeded.
    ///
    /// The roster is copied out first, so the roster lock is never held
    /// across a send. A resident that stops reading delays only its own
    /// delivery.
    pub async fn broadcast_to_players(&self, message: &Message) -> usize {
        let residents = self.player_ids();
        if residents.is_empty() {
            return 0;
        }

        let message = Arc::new(message.clone());
        let mut sends = JoinSet::new();
        for id in residents {
            let sink = Arc::clone(&self.sink);
            let message = Arc::clone(&message);
            sends.spawn(async move { sink.send_to_client(id, &message).await });
        }

        let mut delivered = 0;
        while let Some(sent) = sends.join_next().await {
            if matches!(sent, Ok(true)) {
                delivered += 1;
            }
        }
        delivered
    }
}

impl std::fmt::Debug for SectorServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectorServer")
            .field("coord", &self.coord)
            .field("players", &self.player_count())
            .field("objects", &self.content.object_count())
            .finish()
    }
}
