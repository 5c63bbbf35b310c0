//! Server reconciliation: detect divergence between the client's predicted
//! state and the server's authoritative state, snap to the server, and
//! replay buffered inputs so subsequent prediction stays correct.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::entity::EntityId;
use crate::math::Vec3;
use crate::snapshot::{EntitySnapshot, SharedEntity, SnapshotStore};

/// Per-entity cooldown between successful reconciliations.
const MIN_RECONCILIATION_INTERVAL: Duration = Duration::from_millis(33);

const DEFAULT_RECONCILIATION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationState {
    pub start_position: Vec3,
    pub target_position: Vec3,
    pub reconciling: bool,
    pub server_sequence: u32,
    pub server_is_jumping: bool,
}

/// Invoked with (entity_id, server_position, old_position) whenever a
/// reconciliation is triggered. Per the design notes, must not mutate the
/// snapshot store or entity graph synchronously.
pub type ReconciliationCallback = Box<dyn Fn(EntityId, Vec3, Vec3) + Send + Sync>;

pub struct ReconciliationEngine {
    store: Arc<SnapshotStore>,
    threshold: f32,
    states: Mutex<HashMap<EntityId, ReconciliationState>>,
    last_reconciliation_time: Mutex<HashMap<EntityId, Instant>>,
    callback: Mutex<Option<ReconciliationCallback>>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self::with_threshold(store, DEFAULT_RECONCILIATION_THRESHOLD)
    }

    pub fn with_threshold(store: Arc<SnapshotStore>, threshold: f32) -> Self {
        Self {
            store,
            threshold,
            states: Mutex::new(HashMap::new()),
            last_reconciliation_time: Mutex::new(HashMap::new()),
            callback: Mutex::new(None),
        }
    }

    pub fn set_callback(&self, callback: ReconciliationCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    pub fn is_reconciling(&self, entity_id: EntityId) -> bool {
        self.states
            .lock()
            .unwrap()
            .get(&entity_id)
            .is_some_and(|s| s.reconciling)
    }

    /// Compares the server's authoritative state against the entity's
    /// current prediction. Returns `true` if a reconciliation was
    /// triggered, `false` if the cooldown is still active or the
    /// divergence is below threshold.
    pub fn reconcile(
        &self,
        entity: &SharedEntity,
        server_position: Vec3,
        server_sequence: u32,
        server_timestamp: Instant,
        server_is_jumping: bool,
    ) -> bool {
        let entity_id = entity.lock().unwrap().get_id();
        let now = Instant::now();

        if let Some(&last) = self.last_reconciliation_time.lock().unwrap().get(&entity_id) {
            if now.duration_since(last) < MIN_RECONCILIATION_INTERVAL {
                return false;
            }
        }

        let current_position = entity.lock().unwrap().get_position();
        let diff = (server_position - current_position).length();
        if diff < self.threshold {
            return false;
        }

        self.store.store_entity_snapshot(EntitySnapshot {
            entity_id,
            position: server_position,
            velocity: Vec3::ZERO,
            is_jumping: server_is_jumping,
            timestamp: server_timestamp,
            sequence_number: server_sequence,
        });

        self.states.lock().unwrap().insert(
            entity_id,
            ReconciliationState {
                start_position: current_position,
                target_position: server_position,
                reconciling: true,
                server_sequence,
                server_is_jumping,
            },
        );

        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback(entity_id, server_position, current_position);
        }

        self.last_reconciliation_time
            .lock()
            .unwrap()
            .insert(entity_id, now);
        true
    }

    /// Resolves every entity with a pending reconciliation, snaps its
    /// simulation state to the server target, and replays buffered inputs
    /// with `sequence_number > server_sequence`.
    pub fn update(&self, _delta: f32) {
        let pending: Vec<EntityId> = self
            .states
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.reconciling)
            .map(|(id, _)| *id)
            .collect();

        for entity_id in pending {
            let state = match self.states.lock().unwrap().get(&entity_id).copied() {
                Some(s) => s,
                None => continue,
            };

            let entity = match self.store.get_entity(entity_id) {
                Some(e) => e,
                None => {
                    self.states.lock().unwrap().remove(&entity_id);
                    continue;
                }
            };

            let mut e = entity.lock().unwrap();
            e.snap_simulation_state(state.target_position, state.server_is_jumping, 0.0);
            e.set_position(state.target_position);

            let pending_inputs = self
                .store
                .input_snapshots_after(entity_id, state.server_sequence);
            for input in pending_inputs {
                e.move_by(input.movement);
                if input.is_jumping && input.sequence_number > state.server_sequence {
                    e.jump();
                }
                e.update();
                self.store.store_entity_snapshot(EntitySnapshot {
                    entity_id,
                    position: e.get_position(),
                    velocity: Vec3::ZERO,
                    is_jumping: input.is_jumping,
                    timestamp: Instant::now(),
                    sequence_number: input.sequence_number,
                });
            }

            e.initiate_visual_blend();
            drop(e);
            self.states.lock().unwrap().remove(&entity_id);
        }
    }
}
