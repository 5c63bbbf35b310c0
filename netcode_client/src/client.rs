//! Client session.
//!
//! Owns the UDP socket, registers with the server, and on every server
//! broadcast dispatches to reconciliation (for the local player) or
//! interpolation (for remote players).
//!
//! [`ClientSession::run`] is the production entry point: it spawns a
//! network-receive task that only decodes datagrams, and a
//! game-simulation task that samples input, predicts, reconciles, and
//! interpolates at tick cadence, connected by a channel — the receive task
//! never touches entity simulation state directly. [`ClientSession::poll_once`]
//! plus manual [`ClientSession::tick_game`] calls are the single-task
//! convenience path used by tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use netcode_shared::entity::{EntityId, NetworkedEntity, Player};
use netcode_shared::interpolation::{InterpolationConfig, InterpolationEngine};
use netcode_shared::math::Vec3;
use netcode_shared::net::UdpChannel;
use netcode_shared::prediction::PredictionEngine;
use netcode_shared::reconciliation::ReconciliationEngine;
use netcode_shared::snapshot::{SharedEntity, SnapshotStore};
use netcode_shared::wire::{
    MessageType, PacketHeader, PlayerMovementRequest, PlayerStatePacket, WireReader, WireWriter,
};
use tracing::{info, warn};

/// Default move speed for the locally predicted player and any remote
/// player entities we construct on first sight. Game-specific movement
/// tuning lives with the `NetworkedEntity` implementor, not the core.
const DEFAULT_MOVE_SPEED: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Registering,
    Active,
    Stopped,
}

pub struct ClientSession {
    channel: UdpChannel,
    server_addr: SocketAddr,
    player_id: u32,
    state: Mutex<ClientState>,
    store: Arc<SnapshotStore>,
    prediction: PredictionEngine,
    reconciliation: ReconciliationEngine,
    interpolation: InterpolationEngine,
    local_entity: SharedEntity,
    remote_entities: Mutex<HashMap<EntityId, SharedEntity>>,
}

impl ClientSession {
    pub async fn connect(
        bind_addr: SocketAddr,
        server_addr: SocketAddr,
        player_id: u32,
    ) -> anyhow::Result<Self> {
        let channel = UdpChannel::bind(bind_addr)
            .await
            .context("bind client udp socket")?;
        let store = Arc::new(SnapshotStore::new());
        let local_entity: SharedEntity =
            Arc::new(Mutex::new(Player::new(player_id, DEFAULT_MOVE_SPEED, Vec3::ZERO)));
        store.register_entity(&local_entity);

        Ok(Self {
            channel,
            server_addr,
            player_id,
            state: Mutex::new(ClientState::Idle),
            prediction: PredictionEngine::new(store.clone()),
            reconciliation: ReconciliationEngine::new(store.clone()),
            interpolation: InterpolationEngine::new(store.clone(), InterpolationConfig::default()),
            store,
            local_entity,
            remote_entities: Mutex::new(HashMap::new()),
        })
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock().unwrap()
    }

    pub fn local_position(&self) -> Vec3 {
        self.local_entity.lock().unwrap().get_render_position()
    }

    /// Sends the initial movement request with sequence 0 and transitions
    /// to `Registering`.
    pub async fn register(&self) -> anyhow::Result<()> {
        *self.state.lock().unwrap() = ClientState::Registering;
        let request = PlayerMovementRequest {
            player_id: self.player_id,
            movement: Vec3::ZERO,
            velocity_y: 0.0,
            is_jumping: false,
            input_sequence_number: 0,
        };
        self.send_movement_request(&request).await;
        Ok(())
    }

    /// Accepts the Registering -> Active transition on a timeout, for
    /// deployments where the first broadcast may be lost.
    pub fn accept_after_timeout(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == ClientState::Registering {
            *state = ClientState::Active;
        }
    }

    pub fn stop(&self) {
        *self.state.lock().unwrap() = ClientState::Stopped;
    }

    /// Predicts one frame of local input and transmits the corresponding
    /// movement request. Returns the assigned input sequence number.
    pub async fn send_input(&self, movement: Vec3, is_jumping: bool) -> u32 {
        let seq =
            self.prediction
                .apply_input(Some(&self.local_entity), self.player_id, movement, is_jumping);
        let request = PlayerMovementRequest {
            player_id: self.player_id,
            movement,
            velocity_y: 0.0,
            is_jumping,
            input_sequence_number: seq,
        };
        self.send_movement_request(&request).await;
        seq
    }

    async fn send_movement_request(&self, request: &PlayerMovementRequest) {
        let mut w = WireWriter::new();
        w.write_header(PacketHeader {
            message_type: MessageType::PlayerMovementRequest,
            sequence: request.input_sequence_number,
        });
        request.encode(&mut w);
        self.channel.send(&w.into_bytes(), self.server_addr).await;
    }

    /// Receives and decodes one datagram within `timeout`, dispatching it
    /// if it is one. Returns `true` if a packet was processed.
    pub async fn poll_once(&self, timeout: Duration) -> anyhow::Result<bool> {
        match self.channel.receive(timeout).await? {
            Some((bytes, from)) => {
                if from != self.server_addr {
                    return Ok(false);
                }
                self.handle_datagram(&bytes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn decode_player_state(&self, bytes: &[u8]) -> Option<PlayerStatePacket> {
        let mut r = WireReader::new(bytes);
        let header = match r.read_header() {
            Ok(h) => h,
            Err(e) => {
                warn!(component = "client", error = %e, "failed to decode packet header");
                return None;
            }
        };

        match header.message_type {
            MessageType::PlayerStateUpdate => match PlayerStatePacket::decode(&mut r) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    warn!(component = "client", error = %e, "failed to decode PlayerStatePacket");
                    None
                }
            },
            other => {
                warn!(component = "client", message_type = ?other, "unsupported message type");
                None
            }
        }
    }

    /// Decodes and dispatches one datagram. Used by the single-task
    /// [`Self::poll_once`] path; [`Self::run`] instead decodes on the
    /// receive task and dispatches on the game-simulation task.
    fn handle_datagram(&self, bytes: &[u8]) {
        if self.state() == ClientState::Stopped {
            return;
        }
        if let Some(packet) = self.decode_player_state(bytes) {
            self.on_player_state(packet);
        }
    }

    fn on_player_state(&self, packet: PlayerStatePacket) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ClientState::Registering {
                *state = ClientState::Active;
                info!(component = "client", "first broadcast received, now active");
            }
        }

        if packet.player_id == self.player_id {
            self.reconciliation.reconcile(
                &self.local_entity,
                packet.position,
                packet.last_processed_input_sequence,
                Instant::now(),
                packet.is_jumping,
            );
        } else {
            let remote = {
                let mut remotes = self.remote_entities.lock().unwrap();
                remotes
                    .entry(packet.player_id)
                    .or_insert_with(|| {
                        let entity: SharedEntity = Arc::new(Mutex::new(Player::new(
                            packet.player_id,
                            DEFAULT_MOVE_SPEED,
                            packet.position,
                        )));
                        self.store.register_entity(&entity);
                        entity
                    })
                    .clone()
            };
            drop(remote);
            self.interpolation
                .record(packet.player_id, packet.position, Instant::now());
        }
    }

    /// Drives reconciliation and interpolation for one game-thread frame.
    pub fn tick_game(&self, delta: Duration) {
        self.reconciliation.update(delta.as_secs_f32());

        let remotes: Vec<SharedEntity> = self.remote_entities.lock().unwrap().values().cloned().collect();
        for entity in remotes {
            self.interpolation.update_entity(&entity, delta);
        }
    }

    /// Production entry point: a network-receive task that only decodes
    /// server broadcasts, and a game-simulation task that samples input via
    /// `sample_input`, predicts, sends, reconciles, and interpolates at
    /// `tick_interval` cadence — run as distinct `tokio` tasks joined by an
    /// unbounded channel. `registration_timeout` bounds how long the
    /// game-simulation task waits for the first broadcast before falling
    /// back to [`Self::accept_after_timeout`].
    pub async fn run(
        self: Arc<Self>,
        tick_interval: Duration,
        registration_timeout: Duration,
        mut sample_input: impl FnMut() -> (Vec3, bool) + Send + 'static,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PlayerStatePacket>();

        let recv_session = self.clone();
        let recv_task = tokio::spawn(async move {
            while recv_session.state() != ClientState::Stopped {
                match recv_session.channel.receive(tick_interval).await {
                    Ok(Some((bytes, from))) => {
                        if from != recv_session.server_addr {
                            continue;
                        }
                        if let Some(packet) = recv_session.decode_player_state(&bytes) {
                            if tx.send(packet).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(component = "client-recv", error = %e, "receive failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });

        let game_session = self.clone();
        let game_task = tokio::spawn(async move {
            let mut waited = Duration::ZERO;
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                if game_session.state() == ClientState::Stopped {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        match game_session.state() {
                            ClientState::Registering => {
                                waited += tick_interval;
                                if waited >= registration_timeout {
                                    game_session.accept_after_timeout();
                                }
                            }
                            ClientState::Active => {
                                let (movement, jump) = sample_input();
                                let seq = game_session.send_input(movement, jump).await;
                                game_session.tick_game(tick_interval);
                                if seq % 64 == 0 {
                                    info!(seq, position = ?game_session.local_position(), "tick");
                                }
                            }
                            ClientState::Idle | ClientState::Stopped => {}
                        }
                    }
                    maybe_packet = rx.recv() => {
                        match maybe_packet {
                            Some(packet) => game_session.on_player_state(packet),
                            None => break,
                        }
                    }
                }
            }
        });

        let (recv_result, game_result) = tokio::join!(recv_task, game_task);
        recv_result.context("network-receive task panicked")?;
        game_result.context("game-simulation task panicked")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registering_becomes_active_on_first_broadcast() {
        let client = ClientSession::connect(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:1".parse().unwrap(),
            1,
        )
        .await
        .unwrap();
        client.register().await.unwrap();
        assert_eq!(client.state(), ClientState::Registering);

        client.on_player_state(PlayerStatePacket {
            player_id: 1,
            position: Vec3::ZERO,
            velocity_y: 0.0,
            is_jumping: false,
            last_processed_input_sequence: 0,
        });
        assert_eq!(client.state(), ClientState::Active);
    }

    #[tokio::test]
    async fn stop_suppresses_further_dispatch() {
        let client = ClientSession::connect(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:1".parse().unwrap(),
            1,
        )
        .await
        .unwrap();
        client.stop();
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_terminates_when_stopped() {
        let client = Arc::new(
            ClientSession::connect(
                "127.0.0.1:0".parse().unwrap(),
                "127.0.0.1:1".parse().unwrap(),
                1,
            )
            .await
            .unwrap(),
        );
        let running = client.clone();
        let handle = tokio::spawn(async move {
            running
                .run(Duration::from_millis(20), Duration::from_millis(50), || {
                    (Vec3::ZERO, false)
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        client.stop();

        let joined = tokio::time::timeout(Duration::from_millis(300), handle).await;
        assert!(joined.is_ok(), "run() did not terminate after stop()");
        joined.unwrap().unwrap().unwrap();
    }
}
