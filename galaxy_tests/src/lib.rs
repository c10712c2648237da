//! Shared helpers for the integration tests.

use std::{net::SocketAddr, time::Duration};

use galaxy_client::GameClient;
use galaxy_server::Server;
use galaxy_shared::config::{ClientConfig, ServerConfig};

/// Upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(5);
/// How long to listen for a frame that should never arrive.
pub const QUIET: Duration = Duration::from_millis(150);

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Starts a server with `cfg` and returns it with its bound address.
pub async fn start_server(cfg: ServerConfig) -> anyhow::Result<(Server, SocketAddr)> {
    let mut server = Server::with_config(cfg);
    server.start().await?;
    let addr = server
        .local_addr()
        .ok_or_else(|| anyhow::anyhow!("server has no local address"))?;
    Ok((server, addr))
}

/// Loopback server on an ephemeral port with default limits.
pub async fn start_ephemeral() -> anyhow::Result<(Server, SocketAddr)> {
    start_server(ServerConfig::ephemeral()).await
}

/// Connects and announces `name`.
pub async fn connect_as(addr: SocketAddr, name: &str) -> anyhow::Result<GameClient> {
    GameClient::connect(&ClientConfig {
        server_addr: addr.to_string(),
        player_name: name.to_string(),
        ..Default::default()
    })
    .await
}

/// Polls `cond` every 10ms until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
