//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p galaxy_server -- [--config server.json] [--host 0.0.0.0]
//!       [--port 7777] [--max-clients 100] [--seed 12345] [--tick-hz 20]
//!
//! Flags override values from the config file. Runs the tick loop until
//! Ctrl-C, then stops the server cleanly.

use std::env;

use anyhow::Context;
use galaxy_server::Server;
use galaxy_shared::config::ServerConfig;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            ServerConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--host", Some(v)) => cfg.host = v.clone(),
            ("--port", Some(v)) => cfg.port = v.parse().context("--port")?,
            ("--max-clients", Some(v)) => cfg.max_clients = v.parse().context("--max-clients")?,
            ("--seed", Some(v)) => cfg.galaxy_seed = v.parse().context("--seed")?,
            ("--tick-hz", Some(v)) => cfg.tick_hz = v.parse().context("--tick-hz")?,
            ("--config", Some(_)) => {}
            (other, _) => {
                warn!(arg = other, "Ignoring unknown argument");
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    let tick_hz = cfg.tick_hz.max(1);
    info!(addr = %cfg.bind_addr(), max_clients = cfg.max_clients, seed = cfg.galaxy_seed, tick_hz, "Starting server");

    let mut server = Server::with_config(cfg);
    server.start().await.context("start server")?;

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f32(1.0 / tick_hz as f32));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = tokio::time::Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = tokio::time::Instant::now();
                server.update(now.duration_since(last).as_secs_f32());
                last = now;
            }
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!(error = %e, "Signal handler failed");
                }
                break;
            }
        }
    }

    info!(clients = server.connected_client_count(), sectors = server.sector_count(), "Shutting down");
    server.stop().await;
    Ok(())
}
