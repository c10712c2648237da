//! Configuration.
//!
//! Loads server and client configuration from JSON strings (file IO left to
//! the binaries). Every field has a default, so partial documents are valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::DEFAULT_MAX_PAYLOAD_LEN;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 7777;
/// Default cap on simultaneously connected clients.
pub const DEFAULT_MAX_CLIENTS: usize = 100;
/// Default seed for sector content generation.
pub const DEFAULT_GALAXY_SEED: u32 = 12345;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind, e.g. `0.0.0.0`.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port. `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Seed handed to the sector content generator.
    #[serde(default = "default_galaxy_seed")]
    pub galaxy_seed: u32,
    /// Frames declaring a larger payload are treated as framing errors.
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: u32,
    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Rate at which the binary calls `update`.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Per-frame write deadline. A send that misses it disconnects the client.
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
    /// Clients silent for longer than this are dropped during `update`.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_clients() -> usize {
    DEFAULT_MAX_CLIENTS
}

fn default_galaxy_seed() -> u32 {
    DEFAULT_GALAXY_SEED
}

fn default_max_payload_len() -> u32 {
    DEFAULT_MAX_PAYLOAD_LEN
}

fn default_backlog() -> u32 {
    128
}

fn default_tick_hz() -> u32 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_clients: default_max_clients(),
            galaxy_seed: default_galaxy_seed(),
            max_payload_len: default_max_payload_len(),
            backlog: default_backlog(),
            tick_hz: default_tick_hz(),
            write_timeout_ms: None,
            idle_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Loopback config on an ephemeral port, for tests and tools.
    pub fn ephemeral() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address, e.g. `127.0.0.1:7777`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_player_name")]
    pub player_name: String,
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: u32,
}

fn default_server_addr() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            player_name: default_player_name(),
            max_payload_len: default_max_payload_len(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 7777);
        assert_eq!(cfg.max_clients, 100);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:7777");
        assert!(cfg.write_timeout().is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = ServerConfig::from_json_str(r#"{"port": 9000, "idle_timeout_secs": 30}"#).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_clients, DEFAULT_MAX_CLIENTS);
        assert_eq!(cfg.galaxy_seed, DEFAULT_GALAXY_SEED);
        assert_eq!(cfg.idle_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn client_json_roundtrip() {
        let cfg = ClientConfig {
            player_name: "Vega".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(ClientConfig::from_json_str(&json).unwrap(), cfg);
    }

    #[test]
    fn ephemeral_binds_loopback() {
        assert_eq!(ServerConfig::ephemeral().bind_addr(), "127.0.0.1:0");
    }
}
