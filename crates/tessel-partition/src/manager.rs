//! The partition service object.
//!
//! [`PartitionManager`] is constructed once by the world server and shared
//! by handle with every map. Each data category sits behind its own lock
//! so that, for example, a relocation sweep never blocks a position
//! lookup. No method holds two category locks at once, except registry
//! mutation, which takes the resize throttle while holding the registry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;
use smallvec::SmallVec;
use tessel_core::{
    Clock, ConfigHandle, EntityId, FabricConfig, MapId, PartitionId, Position,
    RuntimeDiagnostics, ZoneId,
};
use tessel_relay::RelayStore;
use tessel_space::{BoundaryUpdate, GridLayout};

use crate::boundary::{BoundaryIndex, VisibilityIndex};
use crate::density::{partition_density, DensityDecision, DensityState};
use crate::error::{PartitionError, RelocationError};
use crate::handoff::HandoffCounters;
use crate::ownership::{OverrideTable, OwnershipRecord, OwnershipTable};
use crate::precache::{ApproachOutcome, PrecacheQueue, PrecacheRequest};
use crate::registry::{MapPartitions, StatsSnapshot};
use crate::relocation::{RelocationState, RelocationTable, RelocationTxn};

/// Result of a successful resize request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The map was rebuilt.
    Resized {
        /// Previous partition count.
        from: u32,
        /// New partition count.
        to: u32,
    },
    /// The (clamped) target equalled the current count.
    Unchanged {
        /// Current partition count.
        count: u32,
    },
}

/// What one maintenance pass cleaned up.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaintenanceReport {
    /// Relocations rolled back for exceeding their timeout.
    pub relocations_rolled_back: Vec<RelocationTxn>,
    /// Expired overrides removed.
    pub overrides_purged: usize,
    /// Pre-cache dedupe and throttle entries forgotten.
    pub precache_trimmed: usize,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Partition registry, ownership, boundary tracking, and relocation.
pub struct PartitionManager {
    config: Arc<ConfigHandle>,
    clock: Arc<dyn Clock>,
    registry: RwLock<AHashMap<MapId, MapPartitions>>,
    relays: RwLock<AHashMap<MapId, Arc<RelayStore>>>,
    overrides: RwLock<OverrideTable>,
    ownership: RwLock<OwnershipTable>,
    boundary: BoundaryIndex,
    visibility: VisibilityIndex,
    handoffs: HandoffCounters,
    relocations: Mutex<RelocationTable>,
    density: Mutex<AHashMap<MapId, DensityState>>,
    last_resize: Mutex<AHashMap<MapId, u64>>,
    precache: Mutex<PrecacheQueue>,
    diagnostics: RuntimeDiagnostics,
}

// Compile-time assertion: PartitionManager must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<PartitionManager>();
};

impl std::fmt::Debug for PartitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionManager")
            .field("maps", &read(&self.registry).len())
            .field("relocations", &lock(&self.relocations).len())
            .finish_non_exhaustive()
    }
}

impl PartitionManager {
    /// Build an empty manager. Call [`initialize`](Self::initialize) to
    /// register the configured maps.
    pub fn new(config: Arc<ConfigHandle>, clock: Arc<dyn Clock>) -> Self {
        let cfg = config.current();
        let stripes = cfg.partition.boundary_lock_stripes;
        let diagnostics = RuntimeDiagnostics::new();
        if cfg.diagnostics.enabled_at_start {
            diagnostics.enable(clock.now_ms(), cfg.diagnostics.window_ms);
        }
        Self {
            config,
            clock,
            registry: RwLock::new(AHashMap::new()),
            relays: RwLock::new(AHashMap::new()),
            overrides: RwLock::new(OverrideTable::default()),
            ownership: RwLock::new(OwnershipTable::default()),
            boundary: BoundaryIndex::new(stripes),
            visibility: VisibilityIndex::new(stripes),
            handoffs: HandoffCounters::new(),
            relocations: Mutex::new(RelocationTable::new()),
            density: Mutex::new(AHashMap::new()),
            last_resize: Mutex::new(AHashMap::new()),
            precache: Mutex::new(PrecacheQueue::new()),
            diagnostics,
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<FabricConfig> {
        self.config.current()
    }

    /// The clock every timestamp in this manager comes from.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether partitioning is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config().partition.enabled
    }

    // ── Registry ──────────────────────────────────────────────────

    /// Register `default_count` partitions on every configured map that
    /// has none yet. Returns how many maps were set up.
    pub fn initialize(&self) -> usize {
        let cfg = self.config();
        if !cfg.partition.enabled {
            tracing::info!(target: "map.partition", "partitioning disabled");
            return 0;
        }
        let mut set_up = 0;
        for &map in &cfg.partition.maps {
            let built = {
                let mut registry = write(&self.registry);
                if registry.contains_key(&map) {
                    continue;
                }
                match MapPartitions::with_count(cfg.partition.default_count) {
                    Ok(parts) => {
                        registry.insert(map, parts);
                        true
                    }
                    Err(e) => {
                        tracing::error!(target: "map.partition", map = %map, error = %e, "cannot partition map");
                        false
                    }
                }
            };
            if built {
                self.after_rebuild(map, &cfg);
                set_up += 1;
            }
        }
        tracing::info!(
            target: "map.partition",
            maps = set_up,
            partitions_per_map = cfg.partition.default_count,
            "partitioning initialised"
        );
        set_up
    }

    /// Append a partition named `name` to `map`, creating the map's
    /// registry entry if needed. Rebuilds the layout and boundary index.
    pub fn register_partition(
        &self,
        map: MapId,
        name: impl Into<String>,
    ) -> Result<PartitionId, PartitionError> {
        let cfg = self.config();
        if !cfg.partition.enabled {
            return Err(PartitionError::Disabled);
        }
        let name = name.into();
        let id = {
            let mut registry = write(&self.registry);
            match registry.get_mut(&map) {
                Some(parts) => parts
                    .push(name)
                    .map_err(|source| PartitionError::Layout { map, source })?,
                None => {
                    let parts = MapPartitions::from_names([name])
                        .map_err(|source| PartitionError::Layout { map, source })?;
                    registry.insert(map, parts);
                    PartitionId(1)
                }
            }
        };
        self.after_rebuild(map, &cfg);
        tracing::debug!(target: "map.partition", map = %map, partition = %id, "partition registered");
        Ok(id)
    }

    /// Remove every partition of `map` along with its boundary, visibility,
    /// relay, relocation, and density state.
    pub fn clear_partitions(&self, map: MapId) {
        let removed = write(&self.registry).remove(&map).is_some();
        self.boundary.clear_map(map);
        self.visibility.clear_map(map);
        if let Some(store) = read(&self.relays).get(&map) {
            store.set_partitioned(false);
            store.clear();
        }
        lock(&self.relocations).clear_map(map);
        lock(&self.density).remove(&map);
        lock(&self.precache).clear_map(map);
        write(&self.ownership).clear_map(map);
        self.handoffs.clear_map(map);
        if removed {
            tracing::info!(target: "map.partition", map = %map, "partitions cleared");
        }
    }

    /// Rebuild `map` with `count` partitions (clamped to
    /// `[1, max_partitions]`).
    ///
    /// Throttled per map by `resize_cooldown_ms`; a no-op request does not
    /// start the cooldown. Boundary sets are rebuilt from scratch and relays
    /// addressed to removed partitions are discarded.
    pub fn resize_map_partitions(
        &self,
        map: MapId,
        count: u32,
    ) -> Result<ResizeOutcome, PartitionError> {
        let cfg = self.config();
        if !cfg.partition.enabled {
            return Err(PartitionError::Disabled);
        }
        let target = count.clamp(1, cfg.partition.max_partitions.max(1));
        let now = self.clock.now_ms();

        let from = {
            let mut registry = write(&self.registry);
            let Some(parts) = registry.get_mut(&map) else {
                return Err(PartitionError::NotPartitioned(map));
            };
            let from = parts.count();
            if from == target {
                return Ok(ResizeOutcome::Unchanged { count: from });
            }
            let mut last = lock(&self.last_resize);
            if let Some(&at) = last.get(&map) {
                let elapsed = now.saturating_sub(at);
                if elapsed < cfg.partition.resize_cooldown_ms {
                    return Err(PartitionError::Throttled {
                        map,
                        remaining_ms: cfg.partition.resize_cooldown_ms - elapsed,
                    });
                }
            }
            *parts = MapPartitions::with_count(target)
                .map_err(|source| PartitionError::Layout { map, source })?;
            last.insert(map, now);
            from
        };

        self.after_rebuild(map, &cfg);
        lock(&self.density).remove(&map);
        tracing::info!(target: "map.partition", map = %map, from, to = target, "map partitions resized");
        Ok(ResizeOutcome::Resized { from, to: target })
    }

    fn after_rebuild(&self, map: MapId, cfg: &FabricConfig) {
        let count = self.partition_count(map);
        self.boundary.clear_map(map);
        self.visibility.retain_partitions(map, count);
        let store = {
            let mut relays = write(&self.relays);
            Arc::clone(relays.entry(map).or_insert_with(|| {
                Arc::new(RelayStore::new(map, &cfg.relay, Arc::clone(&self.clock)))
            }))
        };
        store.retain_partitions(count);
        store.set_partitioned(count > 0);
    }

    /// Whether `map` has registered partitions.
    pub fn is_map_partitioned(&self, map: MapId) -> bool {
        read(&self.registry).contains_key(&map)
    }

    /// Partition count of `map`, zero when unpartitioned.
    pub fn partition_count(&self, map: MapId) -> u32 {
        read(&self.registry).get(&map).map_or(0, MapPartitions::count)
    }

    /// Ids of `map`'s partitions in order.
    pub fn partition_ids(&self, map: MapId) -> Vec<PartitionId> {
        read(&self.registry)
            .get(&map)
            .map(|p| p.iter().map(|p| p.id()).collect())
            .unwrap_or_default()
    }

    /// Display name of a partition.
    pub fn partition_name(&self, map: MapId, partition: PartitionId) -> Option<String> {
        read(&self.registry)
            .get(&map)
            .and_then(|p| p.get(partition))
            .map(|p| p.name().to_owned())
    }

    /// Cached layout of `map`.
    pub fn layout(&self, map: MapId) -> Option<Arc<GridLayout>> {
        read(&self.registry)
            .get(&map)
            .map(|p| Arc::clone(p.layout()))
    }

    /// Maps with registered partitions, sorted.
    pub fn partitioned_maps(&self) -> Vec<MapId> {
        let mut maps: Vec<MapId> = read(&self.registry).keys().copied().collect();
        maps.sort_unstable();
        maps
    }

    /// Relay queues of `map`. Exists once the map has been partitioned.
    pub fn relay_store(&self, map: MapId) -> Option<Arc<RelayStore>> {
        read(&self.relays).get(&map).cloned()
    }

    // ── Lookup ────────────────────────────────────────────────────

    /// Partition owning `(x, y)` on `map`.
    ///
    /// Partition 1 when partitioning is off or the map is unpartitioned.
    pub fn partition_for_position(&self, map: MapId, x: f32, y: f32) -> PartitionId {
        if !self.is_enabled() {
            return PartitionId(1);
        }
        self.layout(map)
            .map_or(PartitionId(1), |l| l.partition_for_position(x, y))
    }

    /// Partition an entity should belong to.
    ///
    /// Checked in order: excluded zone (partition 1), live override,
    /// persisted ownership on the same map, then position. Overrides and
    /// ownership naming a partition the map no longer has are ignored.
    pub fn partition_for_entity(
        &self,
        map: MapId,
        pos: Position,
        zone: ZoneId,
        entity: EntityId,
    ) -> PartitionId {
        let cfg = self.config();
        if !cfg.partition.enabled || cfg.partition.excluded_zones.contains(&zone) {
            return PartitionId(1);
        }
        let Some(layout) = self.layout(map) else {
            return PartitionId(1);
        };
        if entity.is_some() {
            if let Some(p) = self.partition_override(entity) {
                if layout.contains(p) {
                    return p;
                }
            }
            if let Some(p) = read(&self.ownership).get(entity, map) {
                if layout.contains(p) {
                    return p;
                }
            }
        }
        layout.partition_for_position(pos.x, pos.y)
    }

    /// Whether partitioning is bypassed in `zone`.
    pub fn is_zone_excluded(&self, zone: ZoneId) -> bool {
        self.config().partition.excluded_zones.contains(&zone)
    }

    /// Whether `(x, y)` lies in the border band of its partition.
    pub fn is_near_boundary(&self, map: MapId, x: f32, y: f32) -> bool {
        let overlap = self.config().partition.border_overlap;
        self.layout(map)
            .is_some_and(|l| l.is_near_boundary(x, y, overlap))
    }

    /// Partitions touching `partition`, diagonals included.
    pub fn adjacent_partitions(
        &self,
        map: MapId,
        partition: PartitionId,
    ) -> SmallVec<[PartitionId; 8]> {
        self.layout(map)
            .map(|l| l.adjacent_partitions(partition))
            .unwrap_or_default()
    }

    // ── Overrides & ownership ─────────────────────────────────────

    /// Pin `entity` to `partition` for the configured override duration.
    pub fn set_partition_override(&self, entity: EntityId, partition: PartitionId) {
        let duration = self.config().partition.override_duration_ms;
        self.set_partition_override_for(entity, partition, duration);
    }

    /// Pin `entity` to `partition` for `duration_ms`.
    pub fn set_partition_override_for(
        &self,
        entity: EntityId,
        partition: PartitionId,
        duration_ms: u64,
    ) {
        if !entity.is_some() || !partition.is_partitioned() {
            return;
        }
        let now = self.clock.now_ms();
        write(&self.overrides).set(entity, partition, now, duration_ms);
    }

    /// Pin many entities at once with the batch override duration.
    pub fn set_batch_overrides(&self, pins: &[(EntityId, PartitionId)]) {
        let duration = self.config().partition.batch_override_duration_ms;
        let now = self.clock.now_ms();
        let mut overrides = write(&self.overrides);
        for &(entity, partition) in pins {
            if entity.is_some() && partition.is_partitioned() {
                overrides.set(entity, partition, now, duration);
            }
        }
    }

    /// Live override of `entity`. An expired override is purged.
    pub fn partition_override(&self, entity: EntityId) -> Option<PartitionId> {
        let now = self.clock.now_ms();
        {
            let overrides = read(&self.overrides);
            if !overrides.is_expired(entity, now) {
                return overrides.peek(entity, now);
            }
        }
        write(&self.overrides).get(entity, now)
    }

    /// Remove the override of `entity`.
    pub fn clear_partition_override(&self, entity: EntityId) -> bool {
        write(&self.overrides).clear(entity)
    }

    /// Record `entity`'s owning partition. Returns whether it changed.
    pub fn persist_partition_ownership(
        &self,
        entity: EntityId,
        map: MapId,
        partition: PartitionId,
    ) -> bool {
        if !entity.is_some() || !partition.is_partitioned() || !self.is_enabled() {
            return false;
        }
        write(&self.ownership).persist(entity, map, partition)
    }

    /// Recorded owner of `entity` on `map`.
    pub fn persisted_partition(&self, entity: EntityId, map: MapId) -> Option<PartitionId> {
        read(&self.ownership).get(entity, map)
    }

    /// Drop `entity`'s ownership record, e.g. when it leaves the world.
    /// Returns whether a record existed.
    pub fn forget_partition_ownership(&self, entity: EntityId) -> bool {
        write(&self.ownership).remove(entity)
    }

    /// Seed ownership from the host's store. Records for partition 0 or
    /// for maps that are not partitioned are skipped. Returns how many
    /// were loaded.
    pub fn load_ownership(&self, records: impl IntoIterator<Item = OwnershipRecord>) -> usize {
        let maps: Vec<MapId> = self.partitioned_maps();
        let mut ownership = write(&self.ownership);
        let mut loaded = 0;
        for r in records {
            if r.partition.is_partitioned() && maps.binary_search(&r.map).is_ok() {
                ownership.persist(r.entity, r.map, r.partition);
                loaded += 1;
            }
        }
        tracing::info!(target: "map.partition", loaded, "partition ownership loaded");
        loaded
    }

    /// Every ownership record, for writing back to the host's store.
    pub fn ownership_records(&self) -> Vec<OwnershipRecord> {
        read(&self.ownership).records()
    }

    // ── Stats & density ───────────────────────────────────────────

    /// Store a partition's player and creature counts.
    pub fn update_partition_stats(
        &self,
        map: MapId,
        partition: PartitionId,
        players: u32,
        creatures: u32,
    ) {
        if let Some(p) = read(&self.registry).get(&map).and_then(|m| m.get(partition)) {
            p.stats().set_players(players);
            p.stats().set_creatures(creatures);
        }
    }

    /// Store a partition's boundary object count.
    pub fn set_boundary_object_count(&self, map: MapId, partition: PartitionId, n: u32) {
        if let Some(p) = read(&self.registry).get(&map).and_then(|m| m.get(partition)) {
            p.stats().set_boundary_objects(n);
        }
    }

    /// Counters of one partition.
    pub fn partition_stats(&self, map: MapId, partition: PartitionId) -> Option<StatsSnapshot> {
        read(&self.registry)
            .get(&map)
            .and_then(|m| m.get(partition))
            .map(|p| p.stats().snapshot())
    }

    /// `(players + creatures) / area` of one partition.
    pub fn partition_density(&self, map: MapId, partition: PartitionId) -> Option<f32> {
        let registry = read(&self.registry);
        let parts = registry.get(&map)?;
        let p = parts.get(partition)?;
        Some(partition_density(
            p.stats().snapshot(),
            parts.layout().area_in_grids(partition),
        ))
    }

    /// Sample `map`'s density and resize it if a threshold has held long
    /// enough. A refused resize is logged and the map keeps its count.
    pub fn evaluate_partition_density(&self, map: MapId) -> DensityDecision {
        let cfg = self.config();
        if !cfg.partition.enabled || !cfg.density.enabled {
            return DensityDecision::Skipped;
        }
        let (densities, count) = {
            let registry = read(&self.registry);
            let Some(parts) = registry.get(&map) else {
                return DensityDecision::Skipped;
            };
            let layout = parts.layout();
            let densities: Vec<f32> = parts
                .iter()
                .map(|p| partition_density(p.stats().snapshot(), layout.area_in_grids(p.id())))
                .collect();
            (densities, parts.count())
        };
        let now = self.clock.now_ms();
        let decision = lock(&self.density).entry(map).or_default().evaluate(
            &cfg.density,
            &densities,
            count,
            cfg.partition.max_partitions,
            now,
        );

        if let DensityDecision::Split { to, mean } | DensityDecision::Merge { to, mean } = decision
        {
            match self.resize_map_partitions(map, to) {
                Ok(_) => {
                    tracing::info!(target: "map.partition", map = %map, mean, to, "density-driven resize");
                }
                Err(e) => {
                    tracing::warn!(target: "map.partition", map = %map, mean, to, error = %e, "density resize refused");
                }
            }
        }
        decision
    }

    // ── Boundary & visibility ─────────────────────────────────────

    /// Add or move `entity` in the boundary set of `(map, partition)`.
    pub fn register_boundary_object(
        &self,
        map: MapId,
        partition: PartitionId,
        entity: EntityId,
        pos: Position,
    ) {
        if !entity.is_some() {
            return;
        }
        self.boundary.register(map, partition, entity, pos.x, pos.y);
        tracing::debug!(target: "map.partition", map = %map, partition = %partition, entity = %entity, "boundary object registered");
    }

    /// Remove `entity` from the boundary set of `(map, partition)`.
    pub fn unregister_boundary_object(
        &self,
        map: MapId,
        partition: PartitionId,
        entity: EntityId,
    ) -> bool {
        self.boundary.unregister(map, partition, entity)
    }

    /// Apply a tick's boundary position changes for one partition.
    pub fn update_boundary_positions(
        &self,
        map: MapId,
        partition: PartitionId,
        updates: &[BoundaryUpdate],
    ) {
        self.boundary.update_batch(map, partition, updates);
    }

    /// Remove many entities from one partition's boundary set.
    pub fn unregister_boundary_batch(
        &self,
        map: MapId,
        partition: PartitionId,
        entities: &[EntityId],
    ) -> usize {
        self.boundary.unregister_batch(map, partition, entities)
    }

    /// Whether `entity` is in the boundary set of `(map, partition)`.
    pub fn is_in_boundary_set(&self, map: MapId, partition: PartitionId, entity: EntityId) -> bool {
        self.boundary.contains(map, partition, entity)
    }

    /// Size of the boundary set of `(map, partition)`.
    pub fn boundary_count(&self, map: MapId, partition: PartitionId) -> usize {
        self.boundary.count(map, partition)
    }

    /// Members of the boundary set of `(map, partition)`, sorted.
    pub fn boundary_objects(&self, map: MapId, partition: PartitionId) -> Vec<EntityId> {
        self.boundary.objects(map, partition)
    }

    /// Boundary entities of `(map, partition)` within `radius` of `(x, y)`.
    pub fn query_boundary_nearby(
        &self,
        map: MapId,
        partition: PartitionId,
        x: f32,
        y: f32,
        radius: f32,
    ) -> Vec<EntityId> {
        self.boundary.query_nearby(map, partition, x, y, radius)
    }

    /// Drop boundary entries on `map` whose entity `is_valid` rejects.
    pub fn cleanup_boundary_objects(
        &self,
        map: MapId,
        is_valid: impl FnMut(EntityId) -> bool,
    ) -> usize {
        let removed = self.boundary.retain(map, is_valid);
        if removed > 0 {
            tracing::debug!(target: "map.partition", map = %map, removed, "stale boundary objects removed");
        }
        removed
    }

    /// Record that `(map, partition)` sees `entity`.
    pub fn notify_visibility_attach(&self, entity: EntityId, map: MapId, partition: PartitionId) {
        self.visibility.attach(map, partition, entity);
    }

    /// Record that `(map, partition)` no longer sees `entity`.
    pub fn notify_visibility_detach(&self, entity: EntityId, map: MapId, partition: PartitionId) {
        self.visibility.detach(map, partition, entity);
    }

    /// Entities visible to `(map, partition)`.
    pub fn visibility_count(&self, map: MapId, partition: PartitionId) -> usize {
        self.visibility.count(map, partition)
    }

    // ── Handoffs ──────────────────────────────────────────────────

    /// Count a combat-triggered handoff on `map`.
    pub fn record_combat_handoff(&self, map: MapId) {
        self.handoffs.record_combat(map);
    }

    /// Count a path-triggered handoff on `map`.
    pub fn record_path_handoff(&self, map: MapId) {
        self.handoffs.record_path(map);
    }

    /// Combat handoffs on `map` since the last call.
    pub fn consume_combat_handoffs(&self, map: MapId) -> u32 {
        self.handoffs.consume_combat(map)
    }

    /// Path handoffs on `map` since the last call.
    pub fn consume_path_handoffs(&self, map: MapId) -> u32 {
        self.handoffs.consume_path(map)
    }

    // ── Relocation ────────────────────────────────────────────────

    /// Open a relocation of `entity` from `from` to `to`.
    pub fn begin_relocation(
        &self,
        entity: EntityId,
        map: MapId,
        from: PartitionId,
        to: PartitionId,
        start_position: Position,
    ) -> Result<(), RelocationError> {
        let timeout = self.config().relocation.timeout_ms;
        let now = self.clock.now_ms();
        let result = lock(&self.relocations)
            .begin(entity, map, from, to, start_position, timeout, now)
            .map(|_| ());
        match &result {
            Ok(()) => {
                tracing::debug!(target: "map.partition", entity = %entity, map = %map, from = %from, to = %to, "relocation begun");
            }
            Err(e) => {
                tracing::warn!(target: "map.partition", entity = %entity, map = %map, error = %e, "relocation refused");
            }
        }
        result
    }

    /// Freeze `entity` in its source partition.
    pub fn lock_relocation(&self, entity: EntityId) -> Result<(), RelocationError> {
        let now = self.clock.now_ms();
        lock(&self.relocations).lock(entity, now)
    }

    /// Mark `entity`'s target position as checked.
    pub fn validate_relocation(&self, entity: EntityId) -> Result<(), RelocationError> {
        lock(&self.relocations).validate(entity)
    }

    /// Complete the handoff.
    ///
    /// Ownership moves to the target partition, and the entity is pinned
    /// there for the override duration so the position lookup does not
    /// immediately hand it back.
    pub fn commit_relocation(&self, entity: EntityId) -> Result<RelocationTxn, RelocationError> {
        let txn = lock(&self.relocations).commit(entity)?;
        self.persist_partition_ownership(entity, txn.map, txn.to);
        self.set_partition_override(entity, txn.to);
        let duration = self.clock.now_ms().saturating_sub(txn.start_ms);
        tracing::debug!(
            target: "map.partition",
            entity = %entity,
            map = %txn.map,
            from = %txn.from,
            to = %txn.to,
            duration_ms = duration,
            "relocation committed"
        );
        Ok(txn)
    }

    /// Abandon the handoff; ownership reverts to the source partition.
    pub fn rollback_relocation(&self, entity: EntityId) -> Result<RelocationTxn, RelocationError> {
        let txn = lock(&self.relocations).rollback(entity)?;
        self.restore_source_ownership(&txn);
        tracing::warn!(
            target: "map.partition",
            entity = %entity,
            map = %txn.map,
            from = %txn.from,
            to = %txn.to,
            after_ms = self.clock.now_ms().saturating_sub(txn.start_ms),
            "relocation rolled back"
        );
        Ok(txn)
    }

    fn restore_source_ownership(&self, txn: &RelocationTxn) {
        self.persist_partition_ownership(txn.entity, txn.map, txn.from);
    }

    /// State of `entity`'s open relocation.
    pub fn relocation_state(&self, entity: EntityId) -> Option<RelocationState> {
        lock(&self.relocations).get(entity).map(|t| t.state)
    }

    /// Open relocations.
    pub fn pending_relocations(&self) -> usize {
        lock(&self.relocations).len()
    }

    /// Roll back every relocation older than its timeout.
    pub fn cleanup_stale_relocations(&self) -> Vec<RelocationTxn> {
        let now = self.clock.now_ms();
        let swept = lock(&self.relocations).sweep(now);
        for txn in &swept {
            self.restore_source_ownership(txn);
        }
        if !swept.is_empty() {
            tracing::warn!(
                target: "map.partition",
                rolled_back = swept.len(),
                "stale relocations rolled back"
            );
        }
        swept
    }

    // ── Pre-cache ─────────────────────────────────────────────────

    /// Queue a pre-cache request if `entity` is about to cross into a
    /// neighbouring partition. `velocity` is in world units per second.
    pub fn check_boundary_approach(
        &self,
        entity: EntityId,
        map: MapId,
        pos: Position,
        velocity: (f32, f32),
    ) -> ApproachOutcome {
        let cfg = self.config();
        let Some(layout) = self.layout(map) else {
            return ApproachOutcome::NotApproaching;
        };
        let now = self.clock.now_ms();
        let outcome = lock(&self.precache).check_approach(
            &cfg.partition,
            &layout,
            entity,
            map,
            pos,
            velocity,
            now,
        );
        if let ApproachOutcome::Queued(target) = outcome {
            tracing::debug!(target: "map.partition", entity = %entity, map = %map, target = %target, "boundary approach pre-cache queued");
        }
        outcome
    }

    /// This tick's pre-cache work for `map`.
    pub fn take_precache_requests(&self, map: MapId) -> Vec<PrecacheRequest> {
        let cfg = self.config();
        let now = self.clock.now_ms();
        lock(&self.precache).take_for_map(&cfg.partition, map, now)
    }

    /// Queued pre-cache requests across all maps.
    pub fn precache_queue_len(&self) -> usize {
        lock(&self.precache).len()
    }

    // ── Diagnostics & maintenance ─────────────────────────────────

    /// Turn runtime diagnostics on for the configured window.
    pub fn enable_runtime_diagnostics(&self) {
        let window = self.config().diagnostics.window_ms;
        self.diagnostics.enable(self.clock.now_ms(), window);
        tracing::info!(target: "map.partition", window_ms = window, "runtime diagnostics enabled");
    }

    /// Turn runtime diagnostics off.
    pub fn disable_runtime_diagnostics(&self) {
        self.diagnostics.disable();
    }

    /// Whether runtime diagnostics are active.
    pub fn runtime_diagnostics_enabled(&self) -> bool {
        self.diagnostics.is_enabled(self.clock.now_ms())
    }

    /// Periodic sweep: stale relocations, expired overrides, and pre-cache
    /// bookkeeping.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let cfg = self.config();
        let now = self.clock.now_ms();
        let relocations_rolled_back = self.cleanup_stale_relocations();
        let overrides_purged = write(&self.overrides).purge_expired(now);
        let precache_trimmed = lock(&self.precache).trim(&cfg.partition, now);
        if overrides_purged > 0 {
            tracing::debug!(target: "map.partition", overrides_purged, "expired overrides purged");
        }
        MaintenanceReport {
            relocations_rolled_back,
            overrides_purged,
            precache_trimmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::PartitionConfig;
    use tessel_test_utils::ManualClock;

    fn manager_with(partition: PartitionConfig) -> (PartitionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = FabricConfig {
            partition,
            ..FabricConfig::default()
        };
        let handle = Arc::new(ConfigHandle::new(config).unwrap());
        let mgr = PartitionManager::new(handle, clock.clone());
        (mgr, clock)
    }

    fn manager() -> (PartitionManager, Arc<ManualClock>) {
        let (mgr, clock) = manager_with(PartitionConfig {
            maps: vec![MapId(0)],
            ..PartitionConfig::default()
        });
        assert_eq!(mgr.initialize(), 1);
        (mgr, clock)
    }

    #[test]
    fn initialize_registers_default_count() {
        let (mgr, _) = manager();
        assert_eq!(mgr.partition_count(MapId(0)), 4);
        assert_eq!(mgr.partition_name(MapId(0), PartitionId(2)).as_deref(), Some("Partition 2"));
        assert!(mgr.relay_store(MapId(0)).unwrap().is_partitioned());
        assert_eq!(mgr.initialize(), 0);
    }

    #[test]
    fn unpartitioned_map_uses_partition_one() {
        let (mgr, _) = manager();
        assert_eq!(mgr.partition_for_position(MapId(9), 5_000.0, 5_000.0), PartitionId(1));
        assert!(!mgr.is_near_boundary(MapId(9), 0.0, 0.0));
    }

    #[test]
    fn lookup_order_excluded_override_ownership_position() {
        let (mgr, clock) = manager_with(PartitionConfig {
            maps: vec![MapId(0)],
            excluded_zones: vec![ZoneId(7)],
            ..PartitionConfig::default()
        });
        mgr.initialize();
        let e = EntityId(42);
        let pos = Position::xy(5_000.0, 5_000.0);
        let by_pos = mgr.partition_for_position(MapId(0), pos.x, pos.y);
        assert_eq!(by_pos, PartitionId(4));

        assert_eq!(mgr.partition_for_entity(MapId(0), pos, ZoneId(1), e), by_pos);

        mgr.persist_partition_ownership(e, MapId(0), PartitionId(2));
        assert_eq!(mgr.partition_for_entity(MapId(0), pos, ZoneId(1), e), PartitionId(2));

        mgr.set_partition_override(e, PartitionId(3));
        assert_eq!(mgr.partition_for_entity(MapId(0), pos, ZoneId(1), e), PartitionId(3));
        assert_eq!(mgr.partition_for_entity(MapId(0), pos, ZoneId(7), e), PartitionId(1));

        clock.advance(2_001);
        assert_eq!(mgr.partition_for_entity(MapId(0), pos, ZoneId(1), e), PartitionId(2));
        assert_eq!(mgr.partition_override(e), None);
    }

    #[test]
    fn forgotten_ownership_falls_back_to_position() {
        let (mgr, _) = manager();
        let e = EntityId(42);
        let pos = Position::xy(5_000.0, 5_000.0);
        assert!(mgr.persist_partition_ownership(e, MapId(0), PartitionId(2)));
        assert_eq!(mgr.partition_for_entity(MapId(0), pos, ZoneId(1), e), PartitionId(2));

        assert!(mgr.forget_partition_ownership(e));
        assert!(!mgr.forget_partition_ownership(e));
        assert_eq!(mgr.persisted_partition(e, MapId(0)), None);
        assert_eq!(mgr.partition_for_entity(MapId(0), pos, ZoneId(1), e), PartitionId(4));
        assert!(mgr.ownership_records().is_empty());
    }

    #[test]
    fn register_partition_rebuilds_layout_and_boundary() {
        let (mgr, _) = manager();
        mgr.register_boundary_object(MapId(0), PartitionId(1), EntityId(5), Position::default());
        assert_eq!(mgr.boundary_count(MapId(0), PartitionId(1)), 1);
        assert_eq!(mgr.register_partition(MapId(0), "extra").unwrap(), PartitionId(5));
        assert_eq!(mgr.layout(MapId(0)).unwrap().count(), 5);
        assert_eq!(mgr.boundary_count(MapId(0), PartitionId(1)), 0);

        assert_eq!(mgr.register_partition(MapId(3), "solo").unwrap(), PartitionId(1));
        assert!(mgr.is_map_partitioned(MapId(3)));
    }

    #[test]
    fn resize_is_clamped_and_throttled() {
        let (mgr, clock) = manager();
        assert_eq!(
            mgr.resize_map_partitions(MapId(0), 4),
            Ok(ResizeOutcome::Unchanged { count: 4 })
        );
        assert_eq!(
            mgr.resize_map_partitions(MapId(0), 1_000),
            Ok(ResizeOutcome::Resized { from: 4, to: 64 })
        );
        clock.advance(9_999);
        assert_eq!(
            mgr.resize_map_partitions(MapId(0), 0),
            Err(PartitionError::Throttled {
                map: MapId(0),
                remaining_ms: 1
            })
        );
        assert_eq!(mgr.partition_count(MapId(0)), 64);
        clock.advance(1);
        assert_eq!(
            mgr.resize_map_partitions(MapId(0), 0),
            Ok(ResizeOutcome::Resized { from: 64, to: 1 })
        );
        assert_eq!(
            mgr.resize_map_partitions(MapId(8), 2),
            Err(PartitionError::NotPartitioned(MapId(8)))
        );
    }

    #[test]
    fn resize_discards_relays_for_removed_partitions() {
        let (mgr, _) = manager();
        let store = mgr.relay_store(MapId(0)).unwrap();
        store.queue_evade(PartitionId(4), EntityId(1), 0);
        store.queue_evade(PartitionId(2), EntityId(1), 0);
        mgr.resize_map_partitions(MapId(0), 2).unwrap();
        assert_eq!(store.total_pending(), 1);
        assert!(store.has_pending(PartitionId(2)));
    }

    #[test]
    fn clear_partitions_stops_relaying() {
        let (mgr, _) = manager();
        let store = mgr.relay_store(MapId(0)).unwrap();
        mgr.clear_partitions(MapId(0));
        assert!(!mgr.is_map_partitioned(MapId(0)));
        assert!(!store.queue_evade(PartitionId(1), EntityId(1), 0).is_queued());
    }

    #[test]
    fn relocation_commit_moves_ownership() {
        let (mgr, _) = manager();
        let e = EntityId(77);
        mgr.begin_relocation(e, MapId(0), PartitionId(1), PartitionId(2), Position::default())
            .unwrap();
        assert!(mgr
            .begin_relocation(e, MapId(0), PartitionId(1), PartitionId(3), Position::default())
            .is_err());
        assert!(mgr.commit_relocation(e).is_err());
        mgr.lock_relocation(e).unwrap();
        mgr.validate_relocation(e).unwrap();
        mgr.commit_relocation(e).unwrap();
        assert_eq!(mgr.persisted_partition(e, MapId(0)), Some(PartitionId(2)));
        assert_eq!(mgr.partition_override(e), Some(PartitionId(2)));
        assert_eq!(mgr.relocation_state(e), None);
    }

    #[test]
    fn relocation_rollback_restores_source() {
        let (mgr, _) = manager();
        let e = EntityId(78);
        mgr.persist_partition_ownership(e, MapId(0), PartitionId(3));
        mgr.begin_relocation(e, MapId(0), PartitionId(1), PartitionId(2), Position::default())
            .unwrap();
        mgr.rollback_relocation(e).unwrap();
        assert_eq!(mgr.persisted_partition(e, MapId(0)), Some(PartitionId(1)));
        mgr.begin_relocation(e, MapId(0), PartitionId(1), PartitionId(2), Position::default())
            .unwrap();
    }

    #[test]
    fn maintenance_sweeps_everything() {
        let (mgr, clock) = manager();
        mgr.begin_relocation(EntityId(1), MapId(0), PartitionId(1), PartitionId(2), Position::default())
            .unwrap();
        mgr.set_partition_override(EntityId(2), PartitionId(2));
        clock.advance(2_001);
        let report = mgr.run_maintenance();
        assert_eq!(report.relocations_rolled_back.len(), 1);
        assert_eq!(report.overrides_purged, 1);
        assert_eq!(mgr.pending_relocations(), 0);
    }

    #[test]
    fn load_ownership_skips_unknown_maps() {
        let (mgr, _) = manager();
        let n = mgr.load_ownership([
            OwnershipRecord {
                entity: EntityId(1),
                map: MapId(0),
                partition: PartitionId(2),
            },
            OwnershipRecord {
                entity: EntityId(2),
                map: MapId(5),
                partition: PartitionId(2),
            },
            OwnershipRecord {
                entity: EntityId(3),
                map: MapId(0),
                partition: PartitionId::UNPARTITIONED,
            },
        ]);
        assert_eq!(n, 1);
        assert_eq!(mgr.ownership_records().len(), 1);
    }

    #[test]
    fn stats_and_density() {
        let (mgr, _) = manager();
        mgr.update_partition_stats(MapId(0), PartitionId(1), 24, 1_000);
        let s = mgr.partition_stats(MapId(0), PartitionId(1)).unwrap();
        assert_eq!(s.population(), 1_024);
        // Four partitions of 32×32 grids.
        assert_eq!(mgr.partition_density(MapId(0), PartitionId(1)), Some(1.0));
        assert_eq!(mgr.partition_stats(MapId(0), PartitionId(9)), None);
    }

    #[test]
    fn diagnostics_window() {
        let (mgr, clock) = manager();
        assert!(!mgr.runtime_diagnostics_enabled());
        mgr.enable_runtime_diagnostics();
        assert!(mgr.runtime_diagnostics_enabled());
        clock.advance(60_000);
        assert!(!mgr.runtime_diagnostics_enabled());
    }
}
