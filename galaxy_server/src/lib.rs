//! `galaxy_server`
//!
//! Server-side networking:
//! - `connection`: one accepted client socket, framed send/receive
//! - `sector`: per-sector state and resident fan-out
//! - `server`: accept loop, per-client workers, dispatch and broadcast
//!
//! Networking model: one TCP stream per client carrying length-prefixed
//! frames. The host owns the tick and calls `Server::update`.

pub mod connection;
pub mod sector;
pub mod server;

pub use connection::Connection;
pub use sector::{MessageSink, SectorServer};
pub use server::Server;
