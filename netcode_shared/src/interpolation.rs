//! Entity interpolation: render remote entities along a delayed timeline so
//! network jitter turns into smooth motion instead of visible stutter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::entity::EntityId;
use crate::math::Vec3;
use crate::snapshot::{EntitySnapshot, SharedEntity, SnapshotStore};

#[derive(Debug, Clone, Copy)]
pub struct InterpolationConfig {
    pub interpolation_delay: Duration,
    pub history_size: usize,
    pub max_interpolation_distance: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            interpolation_delay: Duration::from_millis(100),
            history_size: 10,
            max_interpolation_distance: 5.0,
        }
    }
}

/// Maintains a per-entity render clock delayed behind real time, and
/// resolves it against recorded snapshots by linear interpolation.
pub struct InterpolationEngine {
    store: Arc<SnapshotStore>,
    config: InterpolationConfig,
    render_time: Mutex<HashMap<EntityId, Instant>>,
}

impl InterpolationEngine {
    pub fn new(store: Arc<SnapshotStore>, config: InterpolationConfig) -> Self {
        Self {
            store,
            config,
            render_time: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a freshly received remote-entity update to the snapshot
    /// history, sequencing it one past whatever was last stored.
    pub fn record(&self, entity_id: EntityId, position: Vec3, timestamp: Instant) {
        let next_seq = self.store.latest_entity_snapshot(entity_id).sequence_number + 1;
        self.store.store_entity_snapshot(EntitySnapshot {
            entity_id,
            position,
            velocity: Vec3::ZERO,
            is_jumping: false,
            timestamp,
            sequence_number: next_seq,
        });
    }

    pub fn update_entity(&self, entity: &SharedEntity, delta: Duration) {
        let entity_id = entity.lock().unwrap().get_id();

        let render_time = {
            let mut times = self.render_time.lock().unwrap();
            let entry = times.entry(entity_id).or_insert_with(|| {
                Instant::now()
                    .checked_sub(self.config.interpolation_delay)
                    .unwrap_or_else(Instant::now)
            });
            *entry += delta;
            *entry
        };

        let mut snapshots = self.store.entity_snapshots_after(entity_id, 0);
        if snapshots.is_empty() {
            return;
        }
        snapshots.sort_by_key(|s| s.timestamp);
        if snapshots.len() > self.config.history_size {
            let drop_count = snapshots.len() - self.config.history_size;
            snapshots.drain(0..drop_count);
        }

        let (start, end, t) = find_interpolation_snapshots(&snapshots, render_time);
        let target = start.position.lerp(end.position, t);

        let mut e = entity.lock().unwrap();
        let current = e.get_position();
        let distance = (target - current).length();
        if distance > self.config.max_interpolation_distance {
            debug!(
                component = "interpolation",
                entity_id,
                distance,
                "interpolation target exceeds max distance, snapping"
            );
        }
        e.set_position(target);

        if end.is_jumping && !start.is_jumping {
            e.jump();
        }
        e.update();
    }
}

/// Picks the bracketing snapshots for `render_time` and the blend factor
/// between them. `snapshots` must already be sorted by timestamp and
/// non-empty.
fn find_interpolation_snapshots(
    snapshots: &[EntitySnapshot],
    render_time: Instant,
) -> (EntitySnapshot, EntitySnapshot, f32) {
    match snapshots.iter().position(|s| s.timestamp >= render_time) {
        None => {
            let newest = *snapshots.last().unwrap();
            (newest, newest, 1.0)
        }
        Some(0) => {
            let oldest = snapshots[0];
            (oldest, oldest, 0.0)
        }
        Some(idx) => {
            let prev = snapshots[idx - 1];
            let found = snapshots[idx];
            let span = found.timestamp.duration_since(prev.timestamp);
            let t = if span.is_zero() {
                0.0
            } else {
                let elapsed = render_time.duration_since(prev.timestamp);
                (elapsed.as_secs_f32() / span.as_secs_f32()).clamp(0.0, 1.0)
            };
            (prev, found, t)
        }
    }
}
