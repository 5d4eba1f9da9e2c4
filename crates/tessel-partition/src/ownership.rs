//! Transient partition overrides and persisted partition ownership.

use ahash::AHashMap;
use tessel_core::{EntityId, MapId, PartitionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Override {
    partition: PartitionId,
    expires_ms: u64,
}

/// Short-lived pins of entities to a partition.
///
/// An override holds through `expires_ms` inclusive and is dropped on the
/// first read after that.
#[derive(Debug, Default)]
pub struct OverrideTable {
    entries: AHashMap<EntityId, Override>,
}

impl OverrideTable {
    /// Pin `entity` to `partition` until `now_ms + duration_ms`.
    pub fn set(&mut self, entity: EntityId, partition: PartitionId, now_ms: u64, duration_ms: u64) {
        self.entries.insert(
            entity,
            Override {
                partition,
                expires_ms: now_ms.saturating_add(duration_ms),
            },
        );
    }

    /// Live override of `entity`, if any, without purging.
    pub fn peek(&self, entity: EntityId, now_ms: u64) -> Option<PartitionId> {
        self.entries
            .get(&entity)
            .filter(|o| o.expires_ms >= now_ms)
            .map(|o| o.partition)
    }

    /// Live override of `entity`. An expired entry is removed.
    pub fn get(&mut self, entity: EntityId, now_ms: u64) -> Option<PartitionId> {
        let o = *self.entries.get(&entity)?;
        if o.expires_ms >= now_ms {
            Some(o.partition)
        } else {
            self.entries.remove(&entity);
            None
        }
    }

    /// Whether `entity` has an entry that has expired at `now_ms`.
    pub fn is_expired(&self, entity: EntityId, now_ms: u64) -> bool {
        self.entries
            .get(&entity)
            .is_some_and(|o| o.expires_ms < now_ms)
    }

    /// Drop the override of `entity`.
    pub fn clear(&mut self, entity: EntityId) -> bool {
        self.entries.remove(&entity).is_some()
    }

    /// Drop every expired override. Returns how many went.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, o| o.expires_ms >= now_ms);
        before - self.entries.len()
    }

    /// Stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last-known owning partition of an entity, as loaded from or written to
/// the host's character store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnershipRecord {
    /// Entity the record belongs to.
    pub entity: EntityId,
    /// Map of the owning partition.
    pub map: MapId,
    /// Owning partition.
    pub partition: PartitionId,
}

/// Entity → (map, partition) continuity records.
#[derive(Debug, Default)]
pub struct OwnershipTable {
    entries: AHashMap<EntityId, (MapId, PartitionId)>,
}

impl OwnershipTable {
    /// Record ownership. Returns whether the record changed.
    pub fn persist(&mut self, entity: EntityId, map: MapId, partition: PartitionId) -> bool {
        self.entries.insert(entity, (map, partition)) != Some((map, partition))
    }

    /// Owning partition of `entity` on `map`.
    pub fn get(&self, entity: EntityId, map: MapId) -> Option<PartitionId> {
        self.entries
            .get(&entity)
            .filter(|(m, _)| *m == map)
            .map(|(_, p)| *p)
    }

    /// Forget `entity`.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        self.entries.remove(&entity).is_some()
    }

    /// Forget every record on `map`.
    pub fn clear_map(&mut self, map: MapId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (m, _)| *m != map);
        before - self.entries.len()
    }

    /// Every record, in no particular order.
    pub fn records(&self) -> Vec<OwnershipRecord> {
        self.entries
            .iter()
            .map(|(&entity, &(map, partition))| OwnershipRecord {
                entity,
                map,
                partition,
            })
            .collect()
    }

    /// Stored records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
