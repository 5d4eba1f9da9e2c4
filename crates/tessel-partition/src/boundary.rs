//! Boundary sets and visibility sets, striped by map.

use ahash::{AHashMap, AHashSet};
use tessel_core::{EntityId, MapId, PartitionId};
use tessel_space::{BoundaryGrid, BoundaryUpdate};

use crate::stripes::Striped;

type GridsByPartition = AHashMap<PartitionId, BoundaryGrid>;

/// Boundary-adjacent entities per (map, partition), each partition with
/// its own [`BoundaryGrid`] for radius queries.
#[derive(Debug)]
pub struct BoundaryIndex {
    maps: Striped<GridsByPartition>,
}

impl BoundaryIndex {
    /// An empty index over `stripes` lock stripes.
    pub fn new(stripes: usize) -> Self {
        Self {
            maps: Striped::new(stripes),
        }
    }

    /// Add or move `entity` in the boundary set of `(map, partition)`.
    pub fn register(&self, map: MapId, partition: PartitionId, entity: EntityId, x: f32, y: f32) {
        self.maps
            .with_mut(map, |m| m.entry(partition).or_default().update(entity, x, y));
    }

    /// Remove `entity` from `(map, partition)`. Returns whether it was there.
    pub fn unregister(&self, map: MapId, partition: PartitionId, entity: EntityId) -> bool {
        self.maps
            .with_existing_mut(map, |m| {
                let Some(grid) = m.get_mut(&partition) else {
                    return false;
                };
                let removed = grid.remove(entity);
                if grid.is_empty() {
                    m.remove(&partition);
                }
                removed
            })
            .unwrap_or(false)
    }

    /// Apply a batch of position updates under one lock acquisition.
    pub fn update_batch(&self, map: MapId, partition: PartitionId, updates: &[BoundaryUpdate]) {
        if updates.is_empty() {
            return;
        }
        self.maps
            .with_mut(map, |m| m.entry(partition).or_default().update_batch(updates));
    }

    /// Remove a batch under one lock acquisition. Returns how many were present.
    pub fn unregister_batch(&self, map: MapId, partition: PartitionId, entities: &[EntityId]) -> usize {
        if entities.is_empty() {
            return 0;
        }
        self.maps
            .with_existing_mut(map, |m| {
                let Some(grid) = m.get_mut(&partition) else {
                    return 0;
                };
                let n = grid.remove_batch(entities);
                if grid.is_empty() {
                    m.remove(&partition);
                }
                n
            })
            .unwrap_or(0)
    }

    /// Whether `entity` is in the boundary set of `(map, partition)`.
    pub fn contains(&self, map: MapId, partition: PartitionId, entity: EntityId) -> bool {
        self.maps
            .with(map, |m| m.get(&partition).is_some_and(|g| g.contains(entity)))
            .unwrap_or(false)
    }

    /// Size of the boundary set of `(map, partition)`.
    pub fn count(&self, map: MapId, partition: PartitionId) -> usize {
        self.maps
            .with(map, |m| m.get(&partition).map_or(0, BoundaryGrid::len))
            .unwrap_or(0)
    }

    /// Members of the boundary set of `(map, partition)`, sorted.
    pub fn objects(&self, map: MapId, partition: PartitionId) -> Vec<EntityId> {
        let mut out = self
            .maps
            .with(map, |m| {
                m.get(&partition)
                    .map(|g| g.entities().collect::<Vec<_>>())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    /// Boundary entities of `(map, partition)` within `radius` of `(x, y)`.
    pub fn query_nearby(
        &self,
        map: MapId,
        partition: PartitionId,
        x: f32,
        y: f32,
        radius: f32,
    ) -> Vec<EntityId> {
        self.maps
            .with(map, |m| {
                m.get(&partition)
                    .map(|g| g.query_nearby(x, y, radius))
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Drop every entry on `map` for which `is_valid` is false.
    /// Returns how many were removed.
    pub fn retain(&self, map: MapId, mut is_valid: impl FnMut(EntityId) -> bool) -> usize {
        self.maps
            .with_existing_mut(map, |m| {
                let mut removed = 0;
                for grid in m.values_mut() {
                    let stale: Vec<EntityId> = grid.entities().filter(|e| !is_valid(*e)).collect();
                    removed += grid.remove_batch(&stale);
                }
                m.retain(|_, g| !g.is_empty());
                removed
            })
            .unwrap_or(0)
    }

    /// Forget everything on `map`.
    pub fn clear_map(&self, map: MapId) {
        self.maps.remove(map);
    }
}

/// Which entities each (map, partition) currently has visibility of.
#[derive(Debug)]
pub struct VisibilityIndex {
    maps: Striped<AHashMap<PartitionId, AHashSet<EntityId>>>,
}

impl VisibilityIndex {
    /// An empty index over `stripes` lock stripes.
    pub fn new(stripes: usize) -> Self {
        Self {
            maps: Striped::new(stripes),
        }
    }

    /// Record that `(map, partition)` sees `entity`.
    pub fn attach(&self, map: MapId, partition: PartitionId, entity: EntityId) -> bool {
        self.maps
            .with_mut(map, |m| m.entry(partition).or_default().insert(entity))
    }

    /// Record that `(map, partition)` no longer sees `entity`.
    pub fn detach(&self, map: MapId, partition: PartitionId, entity: EntityId) -> bool {
        self.maps
            .with_existing_mut(map, |m| {
                let Some(set) = m.get_mut(&partition) else {
                    return false;
                };
                let removed = set.remove(&entity);
                if set.is_empty() {
                    m.remove(&partition);
                }
                removed
            })
            .unwrap_or(false)
    }

    /// Entities visible to `(map, partition)`.
    pub fn count(&self, map: MapId, partition: PartitionId) -> usize {
        self.maps
            .with(map, |m| m.get(&partition).map_or(0, |s| s.len()))
            .unwrap_or(0)
    }

    /// Drop the sets of partitions above `count` on `map`.
    pub fn retain_partitions(&self, map: MapId, count: u32) {
        self.maps
            .with_existing_mut(map, |m| m.retain(|p, _| p.0 <= count));
    }

    /// Forget everything on `map`.
    pub fn clear_map(&self, map: MapId) {
        self.maps.remove(map);
    }
}
