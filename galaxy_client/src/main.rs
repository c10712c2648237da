//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p galaxy_client -- [--addr 127.0.0.1:7777] [--name Player]
//!
//! Every line typed is sent as chat. Console commands:
//!   /name <name>   - Announce a new display name
//!   /sector <x> <y> - Move to another sector
//!   /quit          - Disconnect and exit

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use galaxy_client::GameClient;
use galaxy_shared::{config::ClientConfig, message::MessageType};
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> ClientConfig {
    let mut cfg = ClientConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

/// Returns `false` when the user asked to quit.
async fn exec_line(client: &mut GameClient, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("/quit") => return Ok(false),
        Some("/name") => {
            let name = parts.collect::<Vec<_>>().join(" ");
            client.announce(&name).await?;
        }
        Some("/sector") => {
            let x: i32 = parts.next().context("usage: /sector <x> <y>")?.parse()?;
            let y: i32 = parts.next().context("usage: /sector <x> <y>")?.parse()?;
            client.change_sector(x, y).await?;
        }
        _ => client.say(line).await?,
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("> ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Connected. Type to chat, '/sector x y' to move, '/quit' to exit.");

    loop {
        tokio::select! {
            line = console_rx.recv() => {
                let Some(line) = line else { break };
                match exec_line(&mut client, &line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("Error: {e}"),
                }
            }
            received = client.recv() => {
                let mut message = match received {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "Connection lost");
                        println!("Disconnected from server.");
                        return Ok(());
                    }
                };
                match message.message_type() {
                    MessageType::ChatMessage => println!("[chat] {}", message.read_string()),
                    other => info!(ty = ?other, len = message.len(), "Server message"),
                }
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
