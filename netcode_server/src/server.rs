//! Authoritative server session.
//!
//! Owns the UDP socket, enforces per-player sequence monotonicity, applies
//! validated inputs to authoritative entities, and broadcasts state at a
//! rate-limited interval.
//!
//! [`GameServer::run`] is the production entry point: it spawns a
//! network-receive task and a game-simulation task as distinct `tokio`
//! tasks connected by a channel, per the concurrency model's split between
//! the two (the receive task decodes and upserts the client table only; it
//! never touches entity simulation state directly). [`GameServer::step`]
//! is a single-task convenience used by tests and by [`Self::run_for`]
//! where genuine concurrency isn't needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use netcode_shared::config::NetcodeConfig;
use netcode_shared::entity::{EntityId, NetworkedEntity, Player};
use netcode_shared::math::Vec3;
use netcode_shared::net::{ClientTable, UdpChannel};
use netcode_shared::snapshot::{SharedEntity, SnapshotStore};
use netcode_shared::wire::{
    MessageType, PacketHeader, PlayerMovementRequest, PlayerStatePacket, WireReader, WireWriter,
};
use tracing::{info, warn};

const DEFAULT_MOVE_SPEED: f32 = 5.0;

/// Authoritative game server: applies validated inputs, enforces per-player
/// sequence monotonicity, and broadcasts state to every registered client.
pub struct GameServer {
    channel: UdpChannel,
    config: NetcodeConfig,
    client_table: ClientTable,
    store: Arc<SnapshotStore>,
    entities: Mutex<HashMap<EntityId, SharedEntity>>,
    last_processed_sequence: Mutex<HashMap<EntityId, u32>>,
    last_broadcast: Mutex<HashMap<EntityId, Instant>>,
    running: AtomicBool,
}

impl GameServer {
    pub async fn bind(config: NetcodeConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = config.server_addr.parse().context("parse server_addr")?;
        let channel = UdpChannel::bind(addr).await.context("udp bind")?;
        Ok(Self {
            channel,
            config,
            client_table: ClientTable::new(),
            store: Arc::new(SnapshotStore::new()),
            entities: Mutex::new(HashMap::new()),
            last_processed_sequence: Mutex::new(HashMap::new()),
            last_broadcast: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.client_table.len()
    }

    /// Sets the shared running flag to false. Both the receive and
    /// game-simulation tasks in [`Self::run`] observe it at their next
    /// receive-timeout boundary, so termination is bounded by one timeout.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs the receive + broadcast loop for `ticks` iterations, each
    /// bounded by a ~1s receive timeout as the ordering guarantees require.
    pub async fn run_for(&self, ticks: u32) -> anyhow::Result<()> {
        for _ in 0..ticks {
            self.step(Duration::from_secs(1)).await?;
        }
        Ok(())
    }

    /// One iteration: receive (bounded by `receive_timeout`), process if a
    /// datagram arrived, then sweep inactive clients. Single-task
    /// convenience path used by tests; [`Self::run`] is the genuine
    /// two-task production path.
    pub async fn step(&self, receive_timeout: Duration) -> anyhow::Result<()> {
        if let Some((bytes, from)) = self.channel.receive(receive_timeout).await? {
            self.handle_datagram(&bytes, from).await;
        }
        self.evict_inactive_clients();
        Ok(())
    }

    /// Production entry point: a network-receive task that only decodes
    /// datagrams and upserts the client table, and a game-simulation task
    /// that applies validated inputs to entity state and broadcasts,
    /// running as distinct `tokio` tasks joined by an unbounded channel.
    /// Neither task mutates entity simulation state from the other's side.
    /// Both observe `running` at each `receive_timeout` boundary.
    pub async fn run(self: Arc<Self>, receive_timeout: Duration) -> anyhow::Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(String, PlayerMovementRequest)>();

        let recv_server = self.clone();
        let recv_task = tokio::spawn(async move {
            while recv_server.is_running() {
                match recv_server.channel.receive(receive_timeout).await {
                    Ok(Some((bytes, from))) => {
                        let client_key = recv_server.client_table.upsert(from);
                        if let Some(req) = recv_server.decode_movement_request(&bytes) {
                            if tx.send((client_key, req)).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(component = "server-recv", error = %e, "receive failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });

        let sim_server = self.clone();
        let sim_task = tokio::spawn(async move {
            while sim_server.is_running() {
                tokio::select! {
                    maybe_req = rx.recv() => {
                        match maybe_req {
                            Some((client_key, req)) => sim_server.apply_movement_request(client_key, req).await,
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(receive_timeout) => {}
                }
                sim_server.evict_inactive_clients();
            }
        });

        let (recv_result, sim_result) = tokio::join!(recv_task, sim_task);
        recv_result.context("network-receive task panicked")?;
        sim_result.context("game-simulation task panicked")?;
        Ok(())
    }

    fn decode_movement_request(&self, bytes: &[u8]) -> Option<PlayerMovementRequest> {
        let mut r = WireReader::new(bytes);
        let header = match r.read_header() {
            Ok(h) => h,
            Err(e) => {
                warn!(component = "server", error = %e, "failed to decode packet header");
                return None;
            }
        };

        match header.message_type {
            MessageType::PlayerMovementRequest => match PlayerMovementRequest::decode(&mut r) {
                Ok(req) => Some(req),
                Err(e) => {
                    warn!(component = "server", error = %e, "failed to decode PlayerMovementRequest");
                    None
                }
            },
            other => {
                warn!(component = "server", message_type = ?other, "unsupported message type");
                None
            }
        }
    }

    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        if let Some(req) = self.decode_movement_request(bytes) {
            self.on_movement_request(from, req).await;
        }
    }

    async fn on_movement_request(&self, from: SocketAddr, req: PlayerMovementRequest) {
        let client_key = self.client_table.upsert(from);
        self.apply_movement_request(client_key, req).await;
    }

    /// Applies a validated movement request to authoritative entity state.
    /// Called only from the game-simulation side (the sim task in
    /// [`Self::run`], or directly from [`Self::on_movement_request`] on
    /// the single-task [`Self::step`] path) — never from the
    /// network-receive task.
    async fn apply_movement_request(&self, client_key: String, req: PlayerMovementRequest) {
        let already_processed = *self
            .last_processed_sequence
            .lock()
            .unwrap()
            .get(&req.player_id)
            .unwrap_or(&0);
        if req.input_sequence_number <= already_processed {
            // Stale or reordered datagram; expected under reordering, drop silently.
            return;
        }

        let entity = {
            let mut entities = self.entities.lock().unwrap();
            entities
                .entry(req.player_id)
                .or_insert_with(|| {
                    let entity: SharedEntity =
                        Arc::new(Mutex::new(Player::new(req.player_id, DEFAULT_MOVE_SPEED, Vec3::ZERO)));
                    self.store.register_entity(&entity);
                    entity
                })
                .clone()
        };

        {
            let mut e = entity.lock().unwrap();
            e.move_by(req.movement);
            if req.is_jumping {
                e.jump();
            }
            e.update();
        }

        self.last_processed_sequence
            .lock()
            .unwrap()
            .insert(req.player_id, req.input_sequence_number);
        self.client_table
            .set_last_input_sequence(&client_key, req.input_sequence_number);

        self.maybe_broadcast(req.player_id, &entity, req.input_sequence_number).await;
    }

    async fn maybe_broadcast(&self, player_id: EntityId, entity: &SharedEntity, last_processed: u32) {
        let interval = Duration::from_millis(self.config.broadcast_interval_ms);
        let now = Instant::now();
        let should_broadcast = {
            let mut last = self.last_broadcast.lock().unwrap();
            let due = !matches!(last.get(&player_id), Some(&t) if now.duration_since(t) < interval);
            if due {
                last.insert(player_id, now);
            }
            due
        };
        if should_broadcast {
            self.broadcast_state(player_id, entity, last_processed).await;
        }
    }

    async fn broadcast_state(&self, player_id: EntityId, entity: &SharedEntity, last_processed: u32) {
        let (position, is_jumping) = {
            let e = entity.lock().unwrap();
            (e.get_position(), e.is_jumping())
        };
        let packet = PlayerStatePacket {
            player_id,
            position,
            velocity_y: 0.0,
            is_jumping,
            last_processed_input_sequence: last_processed,
        };
        let mut w = WireWriter::new();
        w.write_header(PacketHeader {
            message_type: MessageType::PlayerStateUpdate,
            sequence: last_processed,
        });
        packet.encode(&mut w);
        let bytes = w.into_bytes();

        // Snapshot the client set under the table's lock, then send outside it.
        for client in self.client_table.snapshot() {
            self.channel.send(&bytes, client.address).await;
        }
    }

    /// Removes clients that have gone silent for longer than the
    /// configured inactivity timeout.
    pub fn evict_inactive_clients(&self) {
        let timeout = Duration::from_secs(self.config.client_inactivity_timeout_secs);
        for key in self.client_table.evict_inactive(timeout) {
            info!(component = "server", client = %key, "evicted inactive client");
        }
    }

    /// Admin operation: teleports a player's entity and forces an immediate
    /// broadcast carrying the player's current last-processed sequence, so
    /// clients perform no replay for this packet.
    pub async fn set_player_position(&self, player_id: EntityId, position: Vec3, is_jumping: bool) {
        let entity = self.entities.lock().unwrap().get(&player_id).cloned();
        let Some(entity) = entity else {
            warn!(component = "server", player_id, "set_player_position: unknown player");
            return;
        };
        entity.lock().unwrap().set_position(position);

        let last_processed = *self
            .last_processed_sequence
            .lock()
            .unwrap()
            .get(&player_id)
            .unwrap_or(&0);
        self.broadcast_state(player_id, &entity, last_processed).await;
    }
}

/// Test helper: binds to an ephemeral loopback port.
pub async fn bind_ephemeral() -> anyhow::Result<GameServer> {
    let config = NetcodeConfig {
        server_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    };
    GameServer::bind(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn send_movement(
        socket: &UdpSocket,
        to: SocketAddr,
        player_id: u32,
        movement: Vec3,
        seq: u32,
    ) {
        let req = PlayerMovementRequest {
            player_id,
            movement,
            velocity_y: 0.0,
            is_jumping: false,
            input_sequence_number: seq,
        };
        let mut w = WireWriter::new();
        w.write_header(PacketHeader {
            message_type: MessageType::PlayerMovementRequest,
            sequence: seq,
        });
        req.encode(&mut w);
        socket.send_to(&w.into_bytes(), to).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn out_of_order_sequences_are_dropped() {
        let server = bind_ephemeral().await.unwrap();
        let addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Sequences 1, 3, 2 with +1 on x each time; seq=2 must be dropped
        // because 2 < 3 (the last accepted sequence).
        send_movement(&client, addr, 1, Vec3::new(1.0, 0.0, 0.0), 1).await;
        server.step(Duration::from_millis(50)).await.unwrap();
        send_movement(&client, addr, 1, Vec3::new(1.0, 0.0, 0.0), 3).await;
        server.step(Duration::from_millis(50)).await.unwrap();
        send_movement(&client, addr, 1, Vec3::new(1.0, 0.0, 0.0), 2).await;
        server.step(Duration::from_millis(50)).await.unwrap();

        let entity = server.entities.lock().unwrap().get(&1).unwrap().clone();
        assert_eq!(entity.lock().unwrap().get_position(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broadcast_responds_with_expected_wire_size() {
        let server = bind_ephemeral().await.unwrap();
        let addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();

        send_movement(&client, addr, 7, Vec3::new(1.0, 0.0, 0.0), 1).await;
        server.step(Duration::from_millis(50)).await.unwrap();

        let mut buf = [0u8; 128];
        let n = tokio::time::timeout(Duration::from_secs(1), client.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 34);

        let mut r = WireReader::new(&buf[..n]);
        let header = r.read_header().unwrap();
        assert_eq!(header.message_type, MessageType::PlayerStateUpdate);
        let packet = PlayerStatePacket::decode(&mut r).unwrap();
        assert_eq!(packet.player_id, 7);
    }

    #[tokio::test]
    async fn eviction_removes_silent_clients() {
        let mut config = NetcodeConfig {
            server_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        config.client_inactivity_timeout_secs = 0;
        let server = GameServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send_movement(&client, addr, 1, Vec3::ZERO, 1).await;
        server.step(Duration::from_millis(50)).await.unwrap();
        assert_eq!(server.client_count(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        server.evict_inactive_clients();
        assert_eq!(server.client_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_terminates_run_loop() {
        let server = Arc::new(bind_ephemeral().await.unwrap());
        let addr = server.local_addr().unwrap();
        let running = server.clone();
        let handle = tokio::spawn(async move { running.run(Duration::from_millis(20)).await });

        // Exercise the loop with real traffic before stopping it.
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_movement(&client, addr, 1, Vec3::new(1.0, 0.0, 0.0), 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(server.is_running());
        server.stop();

        let joined = tokio::time::timeout(Duration::from_millis(300), handle).await;
        assert!(joined.is_ok(), "run() did not terminate after stop()");
        joined.unwrap().unwrap().unwrap();
    }
}
