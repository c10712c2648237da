//! `galaxy_client`
//!
//! Client-side networking: connect, announce a name, chat, switch sectors and
//! receive frames relayed by the server.

pub mod client;

pub use client::GameClient;
