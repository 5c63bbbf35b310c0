//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p netcode_client -- [--addr 127.0.0.1:40000] [--player-id 1]
//!
//! Registers with the server, then runs the network-receive task and the
//! game-simulation task (input sampling, prediction, reconciliation,
//! interpolation) as distinct `tokio` tasks until `ClientSession::stop` is
//! called or the process is killed.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use netcode_client::input::InputState;
use netcode_client::ClientSession;
use netcode_shared::config::NetcodeConfig;
use tracing::info;

struct Args {
    cfg: NetcodeConfig,
    player_id: u32,
}

fn parse_args() -> Args {
    let mut cfg = NetcodeConfig::default();
    let mut player_id = 1u32;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--player-id" if i + 1 < args.len() => {
                player_id = args[i + 1].parse().unwrap_or(player_id);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Args { cfg, player_id }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, player_id } = parse_args();
    info!(server = %cfg.server_addr, player_id, "starting client");

    let server_addr = cfg.server_addr.parse().context("parse server_addr")?;
    let client = Arc::new(
        ClientSession::connect("0.0.0.0:0".parse().unwrap(), server_addr, player_id)
            .await
            .context("connect")?,
    );

    client.register().await.context("send registration")?;
    info!("registration sent, waiting for first broadcast");

    let tick_interval = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let registration_timeout = Duration::from_millis(1000);

    client
        .run(tick_interval, registration_timeout, || {
            let input = InputState::default();
            (input.movement_vector(), input.jump)
        })
        .await
}
