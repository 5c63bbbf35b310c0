//! Client-side prediction: apply inputs immediately, record them for later
//! verification by the reconciliation engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use crate::math::Vec3;
use crate::snapshot::{EntitySnapshot, InputSnapshot, PlayerId, SharedEntity, SnapshotStore};

/// Assigns monotonically increasing input sequence numbers, applies inputs
/// locally, and records input+state snapshots for reconciliation to replay
/// against.
pub struct PredictionEngine {
    current_sequence: AtomicU32,
    store: Arc<SnapshotStore>,
}

impl PredictionEngine {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            current_sequence: AtomicU32::new(0),
            store,
        }
    }

    pub fn current_sequence(&self) -> u32 {
        self.current_sequence.load(Ordering::SeqCst)
    }

    /// Resets the sequence counter to 0. The only sanctioned way sequence
    /// numbers ever go backwards.
    pub fn reset(&self) {
        self.current_sequence.store(0, Ordering::SeqCst);
    }

    /// Applies one frame of local input and returns the sequence number
    /// assigned to it. Returns the current sequence unchanged (and logs an
    /// error) if no entity is available to apply it to.
    pub fn apply_input(
        &self,
        entity: Option<&SharedEntity>,
        player_id: PlayerId,
        movement: Vec3,
        is_jumping: bool,
    ) -> u32 {
        let Some(entity) = entity else {
            error!(component = "prediction", "apply_input called with no entity");
            return self.current_sequence();
        };

        self.store.register_entity(entity);

        let (entity_id, position) = {
            let mut e = entity.lock().unwrap();
            e.move_by(movement);
            if is_jumping {
                e.jump();
            }
            e.update();
            (e.get_id(), e.get_position())
        };

        let seq = self.current_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Instant::now();

        self.store.store_input_snapshot(InputSnapshot {
            player_id,
            movement,
            is_jumping,
            timestamp: now,
            sequence_number: seq,
        });
        self.store.store_entity_snapshot(EntitySnapshot {
            entity_id,
            position,
            velocity: Vec3::ZERO,
            is_jumping,
            timestamp: now,
            sequence_number: seq,
        });

        seq
    }
}
