//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p netcode_server -- [--addr 127.0.0.1:40000] [--tick-hz 64]
//!
//! Runs the network-receive task and the game-simulation task as distinct
//! `tokio` tasks until `GameServer::stop` is called or the process is
//! killed.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use netcode_server::GameServer;
use netcode_shared::config::NetcodeConfig;
use tracing::info;

fn parse_args() -> NetcodeConfig {
    let mut cfg = NetcodeConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "starting server");

    let server = Arc::new(GameServer::bind(cfg).await.context("bind server")?);
    let local = server.local_addr()?;
    info!(%local, "server listening");

    server.run(Duration::from_secs(1)).await
}
