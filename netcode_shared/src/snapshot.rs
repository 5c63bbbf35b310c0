//! Per-entity state history and per-player input history, sequence-indexed.
//!
//! This is the one piece of mutable shared state the prediction,
//! reconciliation, and interpolation engines all read and write. Per the
//! concurrency model, a single mutex around each per-entity/per-player
//! vector is sufficient since contention is low; we take the simpler route
//! of one mutex around the whole store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use crate::entity::{EntityId, NetworkedEntity};
use crate::math::Vec3;

pub type PlayerId = u32;

/// An immutable record of entity state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub is_jumping: bool,
    pub timestamp: Instant,
    pub sequence_number: u32,
}

impl EntitySnapshot {
    /// Sentinel returned by `latest_entity_snapshot` when nothing is stored
    /// yet. `sequence_number == 0` denotes "no snapshot" per the invariant
    /// that real snapshots start at sequence 1.
    fn sentinel(entity_id: EntityId, now: Instant) -> Self {
        Self {
            entity_id,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            is_jumping: false,
            timestamp: now,
            sequence_number: 0,
        }
    }
}

/// An immutable record of one player's input at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSnapshot {
    pub player_id: PlayerId,
    pub movement: Vec3,
    pub is_jumping: bool,
    pub timestamp: Instant,
    pub sequence_number: u32,
}

/// Shared, interior-mutable handle to a concrete entity. The store only
/// ever holds a weak reference to one of these — it must never keep an
/// entity alive on its own.
pub type SharedEntity = Arc<Mutex<dyn NetworkedEntity>>;

#[derive(Default)]
struct Inner {
    entity_snapshots: HashMap<EntityId, Vec<EntitySnapshot>>,
    input_snapshots: HashMap<PlayerId, Vec<InputSnapshot>>,
    entities: HashMap<EntityId, Weak<Mutex<dyn NetworkedEntity>>>,
}

/// Sequence-indexed history of entity and input snapshots, plus a
/// weak-reference entity registry used for reconciliation callbacks.
#[derive(Default)]
pub struct SnapshotStore {
    inner: Mutex<Inner>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts preserving sequence order. A duplicate sequence number
    /// overwrites the existing entry in place (later insert wins).
    pub fn store_entity_snapshot(&self, snapshot: EntitySnapshot) {
        let mut inner = self.inner.lock().unwrap();
        let list = inner.entity_snapshots.entry(snapshot.entity_id).or_default();
        insert_ordered(list, snapshot, |s| s.sequence_number, true);
    }

    /// Inserts preserving sequence order. Duplicate insertion of an input
    /// whose sequence number is already present is a no-op.
    pub fn store_input_snapshot(&self, snapshot: InputSnapshot) {
        let mut inner = self.inner.lock().unwrap();
        let list = inner.input_snapshots.entry(snapshot.player_id).or_default();
        insert_ordered(list, snapshot, |s| s.sequence_number, false);
    }

    pub fn latest_entity_snapshot(&self, entity_id: EntityId) -> EntitySnapshot {
        let inner = self.inner.lock().unwrap();
        inner
            .entity_snapshots
            .get(&entity_id)
            .and_then(|v| v.last().copied())
            .unwrap_or_else(|| EntitySnapshot::sentinel(entity_id, Instant::now()))
    }

    pub fn entity_snapshots_after(&self, entity_id: EntityId, seq: u32) -> Vec<EntitySnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .entity_snapshots
            .get(&entity_id)
            .map(|v| v.iter().filter(|s| s.sequence_number > seq).copied().collect())
            .unwrap_or_default()
    }

    pub fn input_snapshots_after(&self, player_id: PlayerId, seq: u32) -> Vec<InputSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .input_snapshots
            .get(&player_id)
            .map(|v| v.iter().filter(|s| s.sequence_number > seq).copied().collect())
            .unwrap_or_default()
    }

    /// Removes every snapshot older than `max_age`, keeping entries whose
    /// age is exactly equal to the cutoff.
    pub fn prune(&self, max_age: std::time::Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        for list in inner.entity_snapshots.values_mut() {
            list.retain(|s| now.duration_since(s.timestamp) <= max_age);
        }
        for list in inner.input_snapshots.values_mut() {
            list.retain(|s| now.duration_since(s.timestamp) <= max_age);
        }
    }

    pub fn register_entity(&self, entity: &SharedEntity) {
        let id = entity.lock().unwrap().get_id();
        let mut inner = self.inner.lock().unwrap();
        inner.entities.insert(id, Arc::downgrade(entity));
    }

    /// Resolves a live entity by id, purging the slot if its weak
    /// reference has already expired.
    pub fn get_entity(&self, entity_id: EntityId) -> Option<SharedEntity> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entities.get(&entity_id).and_then(Weak::upgrade) {
            Some(entity) => Some(entity),
            None => {
                inner.entities.remove(&entity_id);
                None
            }
        }
    }
}

fn insert_ordered<T, K: Ord>(list: &mut Vec<T>, item: T, key: impl Fn(&T) -> K, overwrite: bool) {
    let k = key(&item);
    match list.binary_search_by_key(&k, &key) {
        Ok(idx) => {
            if overwrite {
                list[idx] = item;
            }
            // duplicate input snapshot: no-op
        }
        Err(idx) => list.insert(idx, item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Player;

    fn entity_snap(entity_id: EntityId, seq: u32) -> EntitySnapshot {
        EntitySnapshot {
            entity_id,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            is_jumping: false,
            timestamp: Instant::now(),
            sequence_number: seq,
        }
    }

    fn input_snap(player_id: PlayerId, seq: u32) -> InputSnapshot {
        InputSnapshot {
            player_id,
            movement: Vec3::ZERO,
            is_jumping: false,
            timestamp: Instant::now(),
            sequence_number: seq,
        }
    }

    #[test]
    fn entity_snapshots_after_is_strictly_increasing_and_greater_than_k() {
        let store = SnapshotStore::new();
        for seq in [3, 1, 2, 5, 4] {
            store.store_entity_snapshot(entity_snap(1, seq));
        }
        let after = store.entity_snapshots_after(1, 2);
        let seqs: Vec<u32> = after.iter().map(|s| s.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn latest_entity_snapshot_sentinel_when_empty() {
        let store = SnapshotStore::new();
        let latest = store.latest_entity_snapshot(42);
        assert_eq!(latest.sequence_number, 0);
    }

    #[test]
    fn duplicate_input_sequence_is_a_no_op() {
        let store = SnapshotStore::new();
        store.store_input_snapshot(input_snap(1, 5));
        let mut dup = input_snap(1, 5);
        dup.movement = Vec3::new(99.0, 0.0, 0.0);
        store.store_input_snapshot(dup);
        let all = store.input_snapshots_after(1, 0);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].movement, Vec3::ZERO);
    }

    #[test]
    fn duplicate_entity_snapshot_sequence_overwrites() {
        let store = SnapshotStore::new();
        store.store_entity_snapshot(entity_snap(1, 5));
        let mut overwrite = entity_snap(1, 5);
        overwrite.position = Vec3::new(9.0, 0.0, 0.0);
        store.store_entity_snapshot(overwrite);
        let all = store.entity_snapshots_after(1, 0);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].position, Vec3::new(9.0, 0.0, 0.0));
    }

    #[test]
    fn prune_keeps_entries_at_exactly_max_age() {
        let store = SnapshotStore::new();
        let mut s = entity_snap(1, 1);
        s.timestamp = Instant::now() - std::time::Duration::from_millis(500);
        store.store_entity_snapshot(s);
        store.prune(std::time::Duration::from_secs(1));
        assert_eq!(store.entity_snapshots_after(1, 0).len(), 1);

        let mut old = entity_snap(1, 2);
        old.timestamp = Instant::now() - std::time::Duration::from_secs(2);
        store.store_entity_snapshot(old);
        store.prune(std::time::Duration::from_secs(1));
        let remaining = store.entity_snapshots_after(1, 0);
        assert!(remaining.iter().all(|s| s.sequence_number != 2));
    }

    #[test]
    fn weak_entity_registry_purges_on_access_after_drop() {
        let store = SnapshotStore::new();
        let entity: SharedEntity = Arc::new(Mutex::new(Player::new(1, 5.0, Vec3::ZERO)));
        store.register_entity(&entity);
        assert!(store.get_entity(1).is_some());
        drop(entity);
        assert!(store.get_entity(1).is_none());
    }
}
