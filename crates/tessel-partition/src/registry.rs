//! Per-map partition arena with a cached layout.
//!
//! Partitions of one map live in an [`IndexMap`] keyed by id, so they are
//! stored densely in id order and looked up by id in O(1). The
//! [`GridLayout`] is built from the arena's size and replaced together
//! with it; the two can never disagree.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tessel_core::PartitionId;
use tessel_space::{GridLayout, LayoutError};

/// Live counters of one partition.
///
/// Written by the partition's own update task and read from anywhere, so
/// they are atomics and need only a shared lock on the registry.
#[derive(Debug, Default)]
pub struct PartitionStats {
    players: AtomicU32,
    creatures: AtomicU32,
    boundary_objects: AtomicU32,
}

impl PartitionStats {
    /// Store the player count.
    pub fn set_players(&self, n: u32) {
        self.players.store(n, Ordering::Relaxed);
    }

    /// Store the creature count.
    pub fn set_creatures(&self, n: u32) {
        self.creatures.store(n, Ordering::Relaxed);
    }

    /// Store the boundary object count.
    pub fn set_boundary_objects(&self, n: u32) {
        self.boundary_objects.store(n, Ordering::Relaxed);
    }

    /// Copy out the current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            players: self.players.load(Ordering::Relaxed),
            creatures: self.creatures.load(Ordering::Relaxed),
            boundary_objects: self.boundary_objects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PartitionStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Players owned by the partition.
    pub players: u32,
    /// Creatures owned by the partition.
    pub creatures: u32,
    /// Entities in the partition's boundary set.
    pub boundary_objects: u32,
}

impl StatsSnapshot {
    /// Players plus creatures.
    pub fn population(&self) -> u32 {
        self.players.saturating_add(self.creatures)
    }
}

/// One spatial shard.
#[derive(Debug)]
pub struct Partition {
    id: PartitionId,
    name: String,
    stats: PartitionStats,
}

impl Partition {
    /// A partition with zeroed counters.
    pub fn new(id: PartitionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            stats: PartitionStats::default(),
        }
    }

    /// 1-based id.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live counters.
    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }
}

/// Default display name of partition `id`.
pub fn default_partition_name(id: PartitionId) -> String {
    format!("Partition {id}")
}

/// All partitions of one map plus their layout.
#[derive(Debug)]
pub struct MapPartitions {
    partitions: IndexMap<PartitionId, Partition>,
    layout: Arc<GridLayout>,
}

impl MapPartitions {
    /// `count` partitions `1..=count` with default names.
    pub fn with_count(count: u32) -> Result<Self, LayoutError> {
        Self::from_names((1..=count).map(|n| default_partition_name(PartitionId(n))))
    }

    /// One partition per name, numbered from 1 in iteration order.
    pub fn from_names(names: impl IntoIterator<Item = String>) -> Result<Self, LayoutError> {
        let partitions: IndexMap<PartitionId, Partition> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let id = PartitionId::from_index(i);
                (id, Partition::new(id, name))
            })
            .collect();
        let layout = Arc::new(GridLayout::new(partitions.len() as u32)?);
        Ok(Self { partitions, layout })
    }

    /// Append the next partition under `name` and rebuild the layout.
    pub fn push(&mut self, name: impl Into<String>) -> Result<PartitionId, LayoutError> {
        let id = PartitionId(self.count() + 1);
        let layout = GridLayout::new(id.0)?;
        self.partitions.insert(id, Partition::new(id, name));
        self.layout = Arc::new(layout);
        Ok(id)
    }

    /// Number of partitions.
    pub fn count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Shared handle to the cached layout.
    pub fn layout(&self) -> &Arc<GridLayout> {
        &self.layout
    }

    /// Partition `id`, if registered.
    pub fn get(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: PartitionId) -> bool {
        self.partitions.contains_key(&id)
    }

    /// Partitions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }
}
