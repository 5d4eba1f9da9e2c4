//! Per-partition player buckets.
//!
//! At the start of each cycle the map's players are sorted into one bucket
//! per partition. The new set is built off to the side and swapped in under
//! a brief write lock; tasks hold an `Arc` of the set they started with, so
//! no reader ever sees a half-built set.

use std::sync::{Arc, PoisonError, RwLock};

use tessel_core::{EntityId, PartitionId};

/// One immutable assignment of players to partitions.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BucketSet {
    buckets: Vec<Vec<EntityId>>,
}

impl BucketSet {
    /// Sort `players` into `partition_count` buckets.
    ///
    /// Players naming partition 0 or a partition past the end land in
    /// partition 1.
    pub fn build(
        partition_count: u32,
        players: impl IntoIterator<Item = (EntityId, PartitionId)>,
    ) -> Self {
        let count = partition_count.max(1) as usize;
        let players = players.into_iter();
        let reserve = players.size_hint().0 / count + 1;
        let mut buckets: Vec<Vec<EntityId>> = (0..count).map(|_| Vec::with_capacity(reserve)).collect();
        for (player, partition) in players {
            let slot = partition.index().filter(|&i| i < count).unwrap_or(0);
            buckets[slot].push(player);
        }
        Self { buckets }
    }

    /// Players of `partition`; empty for unknown partitions.
    pub fn bucket(&self, partition: PartitionId) -> &[EntityId] {
        partition
            .index()
            .and_then(|i| self.buckets.get(i))
            .map_or(&[], Vec::as_slice)
    }

    /// Number of buckets.
    pub fn partition_count(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// Players across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Whether no player is bucketed.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}

/// The current [`BucketSet`] of one map.
#[derive(Debug, Default)]
pub struct PlayerBuckets {
    current: RwLock<Arc<BucketSet>>,
}

impl PlayerBuckets {
    /// An empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a new set and publish it. Returns the published set.
    pub fn rebuild(
        &self,
        partition_count: u32,
        players: impl IntoIterator<Item = (EntityId, PartitionId)>,
    ) -> Arc<BucketSet> {
        let built = Arc::new(BucketSet::build(partition_count, players));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&built);
        built
    }

    /// The published set.
    pub fn snapshot(&self) -> Arc<BucketSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Publish an empty set.
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(BucketSet::default());
    }
}
