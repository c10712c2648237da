//! `galaxy_shared`
//!
//! Shared libraries used by both client and server.
//!
//! - `message`: the typed, length-prefixed wire envelope
//! - `net`: async frame read/write over byte streams, client ids
//! - `galaxy`: deterministic sector content generation
//! - `ecs`: the per-sector entity container
//! - `config`: server/client configuration
//!
//! No `unsafe`.

pub mod config;
pub mod ecs;
pub mod galaxy;
pub mod math;
pub mod message;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::galaxy::{GalaxyGenerator, GalaxySector, SectorCoord};
    pub use crate::message::*;
    pub use crate::net::*;
}
