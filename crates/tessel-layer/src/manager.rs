//! The layering service object.
//!
//! [`LayerManager`] keeps the authoritative membership of every
//! (map, zone) behind one read/write lock and mirrors player assignments
//! into a [`FastLayerIndex`] for hot-path reads. Switch cooldowns and the
//! creation/destruction gates sit behind their own mutexes, always taken
//! after the membership lock when both are needed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;
use tessel_core::{
    Clock, ConfigHandle, EntityId, FabricConfig, LayerId, MapId, MetricTag, MetricsSink,
    RuntimeDiagnostics, SpawnKind, ZoneId,
};

use crate::cooldown::CooldownTable;
use crate::error::{LayerError, SwitchDenied};
use crate::hysteresis::Hysteresis;
use crate::packed::FastLayerIndex;
use crate::rebalance::{
    coefficient_of_variation, plan_consolidation, should_rebalance, ConsolidationReport,
    RebalanceDecision, RebalancingMetrics, RebalancingSnapshot,
};
use crate::zone::ZoneLayers;

/// Interval between cooldown-table sweeps (ms).
const COOLDOWN_SWEEP_INTERVAL_MS: u64 = 1_000;

const FAST_INDEX_STRIPES: usize = 16;

type ZoneKey = (MapId, ZoneId);

/// Where an entity lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerAssignment {
    /// Map.
    pub map: MapId,
    /// Zone within the map.
    pub zone: ZoneId,
    /// Layer within the zone.
    pub layer: LayerId,
}

/// A layer removed because its last player left.
///
/// The listed NPC and game object instances were spawned for that layer
/// and must be despawned by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedLayer {
    /// Map of the removed layer.
    pub map: MapId,
    /// Zone of the removed layer.
    pub zone: ZoneId,
    /// Removed layer.
    pub layer: LayerId,
    /// NPC instances to despawn.
    pub npcs: Vec<EntityId>,
    /// Game object instances to despawn.
    pub objects: Vec<EntityId>,
}

/// Why a player ended up on a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignReason {
    /// Already assigned to this (map, zone); nothing moved.
    Kept,
    /// Explicitly placed.
    Explicit,
    /// Lowest-id layer with spare capacity.
    Capacity,
    /// A new layer was opened.
    Created,
    /// Every layer is full and the creation warm-up is still running.
    Overflow,
    /// Every layer is full and no more may be opened.
    AtMax,
    /// Player-initiated switch.
    Switch,
}

/// Result of placing a player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignOutcome {
    /// Layer the player is on now.
    pub layer: LayerId,
    /// How it was chosen.
    pub reason: AssignReason,
    /// Previous assignment, if the player moved.
    pub previous: Option<LayerAssignment>,
    /// Layer emptied and removed by the move.
    pub removed: Option<RemovedLayer>,
}

/// Result of taking a player off their layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Detached {
    /// The assignment that was dropped.
    pub from: LayerAssignment,
    /// Layer emptied and removed by the departure.
    pub removed: Option<RemovedLayer>,
}

/// Player state consulted before a voluntary switch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwitchContext {
    /// The player is in combat.
    pub in_combat: bool,
    /// The player is dead.
    pub dead: bool,
}

/// What one [`LayerManager::update`] call did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerUpdateReport {
    /// Lapsed cooldown entries dropped.
    pub cooldowns_swept: usize,
    /// (map, zone) pairs evaluated for rebalancing.
    pub zones_evaluated: usize,
    /// Consolidation passes run.
    pub consolidations: Vec<ConsolidationReport>,
}

#[derive(Debug, Default)]
struct LayerState {
    zones: AHashMap<ZoneKey, ZoneLayers>,
    players: AHashMap<EntityId, LayerAssignment>,
    npcs: AHashMap<EntityId, LayerAssignment>,
    objects: AHashMap<EntityId, LayerAssignment>,
}

impl LayerState {
    fn spawned_index(&mut self, kind: SpawnKind) -> &mut AHashMap<EntityId, LayerAssignment> {
        match kind {
            SpawnKind::Creature => &mut self.npcs,
            SpawnKind::GameObject => &mut self.objects,
        }
    }

    fn spawned_index_ref(&self, kind: SpawnKind) -> &AHashMap<EntityId, LayerAssignment> {
        match kind {
            SpawnKind::Creature => &self.npcs,
            SpawnKind::GameObject => &self.objects,
        }
    }

    /// Remove `layer` if it is empty and not the base layer, dropping the
    /// instances spawned on it from the indexes.
    fn remove_layer_if_empty(&mut self, map: MapId, zone: ZoneId, layer: LayerId) -> Option<RemovedLayer> {
        let zones = self.zones.get_mut(&(map, zone))?;
        let evicted = zones.remove_if_empty(layer)?;
        for npc in &evicted.npcs {
            self.npcs.remove(npc);
        }
        for obj in &evicted.objects {
            self.objects.remove(obj);
        }
        Some(RemovedLayer {
            map,
            zone,
            layer,
            npcs: evicted.npcs,
            objects: evicted.objects,
        })
    }

    fn drop_zone_if_vacant(&mut self, key: ZoneKey) {
        if self.zones.get(&key).is_some_and(ZoneLayers::is_vacant) {
            self.zones.remove(&key);
        }
    }

    /// Take `player` off their layer, removing the layer if it empties.
    fn detach_player(&mut self, player: EntityId) -> Option<Detached> {
        let from = self.players.remove(&player)?;
        if let Some(zone) = self.zones.get_mut(&(from.map, from.zone)) {
            zone.remove_player(from.layer, player);
        }
        let removed = self.remove_layer_if_empty(from.map, from.zone, from.layer);
        self.drop_zone_if_vacant((from.map, from.zone));
        Some(Detached { from, removed })
    }

    fn attach_player(&mut self, player: EntityId, to: LayerAssignment) {
        self.zones
            .entry((to.map, to.zone))
            .or_default()
            .insert_player(to.layer, player);
        self.players.insert(player, to);
    }
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

/// Population layers, switch cooldowns, and rebalancing.
pub struct LayerManager {
    config: Arc<ConfigHandle>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    state: RwLock<LayerState>,
    fast: FastLayerIndex,
    cooldowns: Mutex<CooldownTable>,
    hysteresis: Mutex<AHashMap<ZoneKey, Hysteresis>>,
    last_rebalance: Mutex<AHashMap<ZoneKey, u64>>,
    last_sweep_ms: AtomicU64,
    rebalancing: RebalancingMetrics,
    diagnostics: RuntimeDiagnostics,
}

// Compile-time assertion: LayerManager must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<LayerManager>();
};

impl std::fmt::Debug for LayerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = read(&self.state);
        f.debug_struct("LayerManager")
            .field("zones", &state.zones.len())
            .field("players", &state.players.len())
            .finish_non_exhaustive()
    }
}

impl LayerManager {
    /// Build an empty manager.
    pub fn new(
        config: Arc<ConfigHandle>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let cfg = config.current();
        let diagnostics = RuntimeDiagnostics::new();
        if cfg.diagnostics.enabled_at_start {
            diagnostics.enable(clock.now_ms(), cfg.diagnostics.window_ms);
        }
        Self {
            config,
            clock,
            metrics,
            state: RwLock::new(LayerState::default()),
            fast: FastLayerIndex::new(FAST_INDEX_STRIPES),
            cooldowns: Mutex::new(CooldownTable::default()),
            hysteresis: Mutex::new(AHashMap::new()),
            last_rebalance: Mutex::new(AHashMap::new()),
            last_sweep_ms: AtomicU64::new(0),
            rebalancing: RebalancingMetrics::default(),
            diagnostics,
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<FabricConfig> {
        self.config.current()
    }

    /// Whether layering is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config.current().layer.enabled
    }

    /// Whether NPC instances are tracked per layer.
    pub fn is_npc_layering_enabled(&self) -> bool {
        let cfg = self.config.current();
        cfg.layer.enabled && cfg.layer.npc_layering
    }

    /// Whether game object instances are tracked per layer.
    pub fn is_go_layering_enabled(&self) -> bool {
        let cfg = self.config.current();
        cfg.layer.enabled && cfg.layer.go_layering
    }

    fn diag(&self) -> bool {
        self.diagnostics.is_enabled(self.clock.now_ms())
    }

    fn notify(&self, player: EntityId, to: LayerAssignment, outcome: &AssignOutcome) {
        if self.diag() {
            tracing::info!(
                target: "map.partition",
                player = %player,
                map = %to.map,
                zone = %to.zone,
                layer = %to.layer,
                reason = ?outcome.reason,
                "diag: player layer assigned"
            );
        }
        if let Some(removed) = &outcome.removed {
            self.log_removed(removed);
        }
    }

    fn log_removed(&self, removed: &RemovedLayer) {
        tracing::debug!(
            target: "map.partition",
            map = %removed.map,
            zone = %removed.zone,
            layer = %removed.layer,
            npcs = removed.npcs.len(),
            objects = removed.objects.len(),
            "empty layer removed"
        );
    }

    // ── Player assignment ──────────────────────────────────────────

    /// Place `player` on an existing `layer` of (map, zone).
    pub fn assign_player_to_layer(
        &self,
        map: MapId,
        zone: ZoneId,
        player: EntityId,
        layer: LayerId,
    ) -> Result<AssignOutcome, LayerError> {
        if !self.is_enabled() {
            return Err(LayerError::Disabled);
        }
        let to = LayerAssignment { map, zone, layer };
        let outcome = {
            let mut state = write(&self.state);
            let exists = layer.is_base()
                || state.zones.get(&(map, zone)).is_some_and(|z| z.contains(layer));
            if !exists {
                return Err(LayerError::UnknownLayer { map, zone, layer });
            }
            if state.players.get(&player) == Some(&to) {
                return Ok(AssignOutcome {
                    layer,
                    reason: AssignReason::Kept,
                    previous: None,
                    removed: None,
                });
            }
            let detached = state.detach_player(player);
            state.attach_player(player, to);
            self.fast.store(player, map, zone, layer);
            AssignOutcome {
                layer,
                reason: AssignReason::Explicit,
                previous: detached.as_ref().map(|d| d.from),
                removed: detached.and_then(|d| d.removed),
            }
        };
        self.notify(player, to, &outcome);
        Ok(outcome)
    }

    /// Place `player` in (map, zone), choosing the layer.
    ///
    /// An existing assignment to the same (map, zone) is kept. Otherwise
    /// the lowest-id layer with spare capacity wins; failing that a new
    /// layer is opened once the creation warm-up has elapsed, and until
    /// then (or once `max_layers` is reached) the least-populated layer
    /// absorbs the player.
    pub fn auto_assign_player(
        &self,
        map: MapId,
        zone: ZoneId,
        player: EntityId,
    ) -> Result<AssignOutcome, LayerError> {
        let cfg = self.config.current();
        if !cfg.layer.enabled {
            return Err(LayerError::Disabled);
        }
        let now = self.clock.now_ms();
        let capacity = cfg.layer.capacity_for(map);
        let key = (map, zone);

        let (to, outcome) = {
            let mut state = write(&self.state);
            if let Some(current) = state.players.get(&player).copied() {
                if current.map == map && current.zone == zone {
                    return Ok(AssignOutcome {
                        layer: current.layer,
                        reason: AssignReason::Kept,
                        previous: None,
                        removed: None,
                    });
                }
            }
            let detached = state.detach_player(player);

            let zones = state.zones.entry(key).or_default();
            let (layer, reason) = match zones.first_with_capacity(capacity) {
                Some(layer) => {
                    if lock(&self.hysteresis).entry(key).or_default().creation.reset() {
                        tracing::debug!(target: "map.partition", map = %map, zone = %zone, "creation warm-up reset, capacity available");
                    }
                    (layer, AssignReason::Capacity)
                }
                None if zones.layer_count() >= cfg.layer.max_layers => {
                    (zones.least_populated(), AssignReason::AtMax)
                }
                None => {
                    let ready = lock(&self.hysteresis)
                        .entry(key)
                        .or_default()
                        .creation
                        .poll(now, cfg.layer.creation_warmup_ms);
                    if ready {
                        let id = zones.next_layer_id();
                        zones.open(id);
                        tracing::info!(target: "map.partition", map = %map, zone = %zone, layer = %id, "layer created");
                        (id, AssignReason::Created)
                    } else {
                        (zones.least_populated(), AssignReason::Overflow)
                    }
                }
            };
            let to = LayerAssignment { map, zone, layer };
            state.attach_player(player, to);
            self.fast.store(player, map, zone, layer);
            (
                to,
                AssignOutcome {
                    layer,
                    reason,
                    previous: detached.as_ref().map(|d| d.from),
                    removed: detached.and_then(|d| d.removed),
                },
            )
        };
        self.notify(player, to, &outcome);
        Ok(outcome)
    }

    /// Take `player` off their layer on `map`. A no-op if the player is
    /// unassigned or assigned on another map.
    pub fn remove_player_from_layer(&self, map: MapId, player: EntityId) -> Option<Detached> {
        let detached = {
            let mut state = write(&self.state);
            if state.players.get(&player)?.map != map {
                return None;
            }
            let detached = state.detach_player(player)?;
            self.fast.remove(player);
            detached
        };
        self.after_detach(player, &detached);
        Some(detached)
    }

    /// Take `player` off whatever layer they are on.
    pub fn force_remove_player(&self, player: EntityId) -> Option<Detached> {
        let detached = {
            let mut state = write(&self.state);
            let detached = state.detach_player(player);
            self.fast.remove(player);
            detached
        };
        if let Some(d) = &detached {
            self.after_detach(player, d);
        }
        detached
    }

    fn after_detach(&self, player: EntityId, detached: &Detached) {
        if self.diag() {
            tracing::info!(
                target: "map.partition",
                player = %player,
                map = %detached.from.map,
                zone = %detached.from.zone,
                layer = %detached.from.layer,
                "diag: player removed from layer"
            );
        }
        if let Some(removed) = &detached.removed {
            self.log_removed(removed);
        }
    }

    // ── Spawned instances ──────────────────────────────────────────

    fn assign_spawned(
        &self,
        kind: SpawnKind,
        map: MapId,
        zone: ZoneId,
        entity: EntityId,
        layer: LayerId,
    ) -> bool {
        let enabled = match kind {
            SpawnKind::Creature => self.is_npc_layering_enabled(),
            SpawnKind::GameObject => self.is_go_layering_enabled(),
        };
        if !enabled {
            return false;
        }
        let mut state = write(&self.state);
        if let Some(old) = state.spawned_index(kind).remove(&entity) {
            if let Some(z) = state.zones.get_mut(&(old.map, old.zone)) {
                z.remove_spawned(kind, old.layer, entity);
            }
        }
        let inserted = state
            .zones
            .entry((map, zone))
            .or_default()
            .insert_spawned(kind, layer, entity);
        if inserted {
            state
                .spawned_index(kind)
                .insert(entity, LayerAssignment { map, zone, layer });
        } else {
            state.drop_zone_if_vacant((map, zone));
        }
        inserted
    }

    fn remove_spawned(&self, kind: SpawnKind, entity: EntityId) -> Option<LayerAssignment> {
        let mut state = write(&self.state);
        let old = state.spawned_index(kind).remove(&entity)?;
        if let Some(z) = state.zones.get_mut(&(old.map, old.zone)) {
            z.remove_spawned(kind, old.layer, entity);
        }
        state.drop_zone_if_vacant((old.map, old.zone));
        Some(old)
    }

    /// Record that `npc` was spawned for `layer`. Returns `false` when NPC
    /// layering is off or the layer does not exist.
    pub fn assign_npc_to_layer(&self, map: MapId, zone: ZoneId, npc: EntityId, layer: LayerId) -> bool {
        self.assign_spawned(SpawnKind::Creature, map, zone, npc, layer)
    }

    /// Forget `npc`.
    pub fn remove_npc_from_layer(&self, npc: EntityId) -> Option<LayerAssignment> {
        self.remove_spawned(SpawnKind::Creature, npc)
    }

    /// Layer `npc` was spawned for.
    pub fn layer_for_npc(&self, npc: EntityId) -> Option<LayerId> {
        read(&self.state).npcs.get(&npc).map(|a| a.layer)
    }

    /// Record that game object `go` was spawned for `layer`.
    pub fn assign_go_to_layer(&self, map: MapId, zone: ZoneId, go: EntityId, layer: LayerId) -> bool {
        self.assign_spawned(SpawnKind::GameObject, map, zone, go, layer)
    }

    /// Forget game object `go`.
    pub fn remove_go_from_layer(&self, go: EntityId) -> Option<LayerAssignment> {
        self.remove_spawned(SpawnKind::GameObject, go)
    }

    /// Layer game object `go` was spawned for.
    pub fn layer_for_go(&self, go: EntityId) -> Option<LayerId> {
        read(&self.state).objects.get(&go).map(|a| a.layer)
    }

    fn spawned_counts_by_zone(&self, kind: SpawnKind, map: MapId) -> BTreeMap<ZoneId, BTreeMap<LayerId, usize>> {
        let state = read(&self.state);
        state
            .zones
            .iter()
            .filter(|((m, _), _)| *m == map)
            .map(|((_, zone), layers)| (*zone, layers.spawned_counts(kind)))
            .filter(|(_, counts)| !counts.is_empty())
            .collect()
    }

    /// NPC instance counts per zone and layer of `map`.
    pub fn npc_layer_counts_by_zone(&self, map: MapId) -> BTreeMap<ZoneId, BTreeMap<LayerId, usize>> {
        self.spawned_counts_by_zone(SpawnKind::Creature, map)
    }

    /// Game object instance counts per zone and layer of `map`.
    pub fn go_layer_counts_by_zone(&self, map: MapId) -> BTreeMap<ZoneId, BTreeMap<LayerId, usize>> {
        self.spawned_counts_by_zone(SpawnKind::GameObject, map)
    }

    /// Spawned instances of `kind` tracked across all maps.
    pub fn spawned_count(&self, kind: SpawnKind) -> usize {
        read(&self.state).spawned_index_ref(kind).len()
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Authoritative assignment of `player`.
    pub fn layer_for_player(&self, player: EntityId) -> Option<LayerAssignment> {
        read(&self.state).players.get(&player).copied()
    }

    /// Assignment of `player` from the packed mirror. May briefly lag
    /// [`layer_for_player`](Self::layer_for_player).
    pub fn layer_for_player_fast(&self, player: EntityId) -> Option<LayerAssignment> {
        self.fast.load(player).map(|p| LayerAssignment {
            map: p.map(),
            zone: p.zone(),
            layer: p.layer(),
        })
    }

    /// Layer ids of (map, zone) in ascending order. Always contains the
    /// base layer.
    pub fn active_layer_ids(&self, map: MapId, zone: ZoneId) -> Vec<LayerId> {
        if !self.is_enabled() {
            return vec![LayerId::BASE];
        }
        read(&self.state)
            .zones
            .get(&(map, zone))
            .map_or_else(|| vec![LayerId::BASE], ZoneLayers::layer_ids)
    }

    /// Number of layers in (map, zone), base included.
    pub fn layer_count(&self, map: MapId, zone: ZoneId) -> u32 {
        read(&self.state)
            .zones
            .get(&(map, zone))
            .map_or(1, ZoneLayers::layer_count)
    }

    /// Player count per layer of (map, zone), in id order.
    pub fn layer_player_counts(&self, map: MapId, zone: ZoneId) -> Vec<(LayerId, u32)> {
        read(&self.state)
            .zones
            .get(&(map, zone))
            .map_or_else(|| vec![(LayerId::BASE, 0)], |z| z.player_counts().into_vec())
    }

    /// Whether any player is in (map, zone).
    pub fn has_players(&self, map: MapId, zone: ZoneId) -> bool {
        read(&self.state)
            .zones
            .get(&(map, zone))
            .is_some_and(|z| z.total_players() > 0)
    }

    /// Deterministic layer pick for an entity without an assignment:
    /// the `seed % n`-th of the zone's sorted layer ids.
    pub fn default_layer_for_zone(&self, map: MapId, zone: ZoneId, seed: u64) -> LayerId {
        let ids = self.active_layer_ids(map, zone);
        ids.get((seed % ids.len().max(1) as u64) as usize)
            .copied()
            .unwrap_or(LayerId::BASE)
    }

    /// Players with an assignment.
    pub fn assigned_players(&self) -> usize {
        read(&self.state).players.len()
    }

    // ── Switching ──────────────────────────────────────────────────

    /// Whether `player` may switch layers now.
    pub fn can_switch_layer(&self, player: EntityId, ctx: SwitchContext) -> Result<(), SwitchDenied> {
        if ctx.in_combat {
            return Err(SwitchDenied::InCombat);
        }
        if ctx.dead {
            return Err(SwitchDenied::Dead);
        }
        let now = self.clock.now_ms();
        let cd = lock(&self.cooldowns).get(player);
        if cd.can_switch(now) {
            Ok(())
        } else {
            Err(SwitchDenied::Cooldown {
                remaining_ms: cd.remaining_ms(now),
            })
        }
    }

    /// Time until `player` may switch again.
    pub fn switch_cooldown_remaining_ms(&self, player: EntityId) -> u64 {
        lock(&self.cooldowns)
            .get(player)
            .remaining_ms(self.clock.now_ms())
    }

    /// Move `player` to another layer of their current zone, subject to
    /// [`can_switch_layer`](Self::can_switch_layer). Records the switch.
    pub fn switch_player_to_layer(
        &self,
        player: EntityId,
        target: LayerId,
        ctx: SwitchContext,
    ) -> Result<AssignOutcome, LayerError> {
        if !self.is_enabled() {
            return Err(LayerError::Disabled);
        }
        let now = self.clock.now_ms();
        let (to, outcome) = {
            let mut state = write(&self.state);
            let from = *state
                .players
                .get(&player)
                .ok_or(LayerError::NotAssigned(player))?;
            if from.layer == target {
                return Err(LayerError::AlreadyOnLayer { player, layer: target });
            }
            let exists = state
                .zones
                .get(&(from.map, from.zone))
                .is_some_and(|z| z.contains(target));
            if !exists {
                return Err(LayerError::UnknownLayer {
                    map: from.map,
                    zone: from.zone,
                    layer: target,
                });
            }
            self.can_switch_layer(player, ctx)?;
            lock(&self.cooldowns).record(player, now);

            let detached = state.detach_player(player);
            let to = LayerAssignment { layer: target, ..from };
            state.attach_player(player, to);
            self.fast.store(player, to.map, to.zone, target);
            (
                to,
                AssignOutcome {
                    layer: target,
                    reason: AssignReason::Switch,
                    previous: Some(from),
                    removed: detached.and_then(|d| d.removed),
                },
            )
        };
        self.notify(player, to, &outcome);
        Ok(outcome)
    }

    /// Open the next layer of (map, zone).
    pub fn create_layer(&self, map: MapId, zone: ZoneId) -> Result<LayerId, LayerError> {
        let cfg = self.config.current();
        if !cfg.layer.enabled {
            return Err(LayerError::Disabled);
        }
        let id = {
            let mut state = write(&self.state);
            let zones = state.zones.entry((map, zone)).or_default();
            if zones.layer_count() >= cfg.layer.max_layers {
                return Err(LayerError::LayerLimit {
                    map,
                    zone,
                    max: cfg.layer.max_layers,
                });
            }
            let id = zones.next_layer_id();
            zones.open(id);
            id
        };
        tracing::info!(target: "map.partition", map = %map, zone = %zone, layer = %id, "layer created");
        Ok(id)
    }

    /// Remove every empty non-base layer of (map, zone).
    pub fn cleanup_empty_layers(&self, map: MapId, zone: ZoneId) -> Vec<RemovedLayer> {
        let removed: Vec<RemovedLayer> = {
            let mut state = write(&self.state);
            let empty = state
                .zones
                .get(&(map, zone))
                .map(ZoneLayers::empty_layers)
                .unwrap_or_default();
            let removed = empty
                .into_iter()
                .filter_map(|layer| state.remove_layer_if_empty(map, zone, layer))
                .collect();
            state.drop_zone_if_vacant((map, zone));
            removed
        };
        for r in &removed {
            self.log_removed(r);
        }
        removed
    }

    // ── Rebalancing ────────────────────────────────────────────────

    /// Decide whether (map, zone) needs consolidation.
    pub fn evaluate_layer_rebalancing(&self, map: MapId, zone: ZoneId) -> RebalanceDecision {
        let cfg = self.config.current();
        if !cfg.layer.enabled || !cfg.rebalance.enabled {
            return RebalanceDecision::Skipped;
        }
        let now = self.clock.now_ms();
        let key = (map, zone);
        let state = read(&self.state);
        let Some(zones) = state.zones.get(&key) else {
            return RebalanceDecision::Skipped;
        };
        let counts = zones.player_counts();
        let mut hysteresis = lock(&self.hysteresis);
        if counts.len() <= 1 {
            if let Some(h) = hysteresis.get_mut(&key) {
                h.destruction.reset();
            }
            return RebalanceDecision::Skipped;
        }
        let values: Vec<u32> = counts.iter().map(|&(_, c)| c).collect();
        let cv = coefficient_of_variation(&values);
        if !should_rebalance(&counts, &cfg.rebalance) {
            if hysteresis.get_mut(&key).is_some_and(|h| h.destruction.reset()) {
                tracing::debug!(target: "map.partition", map = %map, zone = %zone, "destruction cooldown reset, layers balanced");
            }
            return RebalanceDecision::Balanced { cv };
        }
        let Some((source, target)) = plan_consolidation(&counts, cfg.layer.capacity_for(map)) else {
            return RebalanceDecision::NoTarget { cv };
        };
        let ready = hysteresis
            .entry(key)
            .or_default()
            .destruction
            .poll(now, cfg.layer.destruction_cooldown_ms);
        if !ready {
            return RebalanceDecision::Deferred { cv };
        }
        RebalanceDecision::Consolidate { cv, source, target }
    }

    /// Move up to `batch` players from `source` to `target` in (map, zone),
    /// never filling `target` past capacity. Removes `source` if it empties.
    pub fn consolidate_layers(
        &self,
        map: MapId,
        zone: ZoneId,
        source: LayerId,
        target: LayerId,
        batch: u32,
    ) -> ConsolidationReport {
        let capacity = self.config.current().layer.capacity_for(map);
        let mut report = ConsolidationReport {
            map,
            zone,
            source,
            target,
            migrated: Vec::new(),
            removed: None,
        };
        if source == target {
            return report;
        }
        {
            let mut state = write(&self.state);
            let Some(zones) = state.zones.get_mut(&(map, zone)) else {
                return report;
            };
            let (Some(src), Some(dst)) = (zones.get(source), zones.get(target)) else {
                return report;
            };
            let room = capacity.saturating_sub(dst.players().len() as u32);
            let mut movers: Vec<EntityId> = src.players().iter().copied().collect();
            movers.sort_unstable();
            movers.truncate(batch.min(room) as usize);

            for &player in &movers {
                zones.remove_player(source, player);
                zones.insert_player(target, player);
            }
            let to = LayerAssignment { map, zone, layer: target };
            for &player in &movers {
                state.players.insert(player, to);
                self.fast.store(player, map, zone, target);
            }
            report.removed = state.remove_layer_if_empty(map, zone, source);
            report.migrated = movers;
        }
        if !report.migrated.is_empty() {
            let tags = [MetricTag::new("map", map), MetricTag::new("zone", zone)];
            self.metrics
                .counter("layer_players_migrated", report.migrated.len() as u64, &tags);
            if report.removed.is_some() {
                self.metrics.counter("layer_consolidated", 1, &tags);
            }
            self.rebalancing.record(&report);
            tracing::info!(
                target: "map.partition",
                map = %map,
                zone = %zone,
                source = %source,
                target = %target,
                moved = report.migrated.len(),
                removed = report.removed.is_some(),
                "layers consolidated"
            );
        }
        report
    }

    /// Lifetime rebalancing counters.
    pub fn rebalancing_metrics(&self) -> RebalancingSnapshot {
        self.rebalancing.snapshot()
    }

    /// Periodic work: sweep lapsed switch cooldowns (at most once a second)
    /// and evaluate each (map, zone) whose rebalance interval has elapsed,
    /// consolidating where needed.
    pub fn update(&self, now_ms: u64) -> LayerUpdateReport {
        let cfg = self.config.current();
        let mut report = LayerUpdateReport::default();
        if !cfg.layer.enabled {
            return report;
        }

        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms >= last.saturating_add(COOLDOWN_SWEEP_INTERVAL_MS) {
            self.last_sweep_ms.store(now_ms, Ordering::Relaxed);
            report.cooldowns_swept = lock(&self.cooldowns).sweep(now_ms);
        }

        if !cfg.rebalance.enabled {
            return report;
        }
        let mut keys: Vec<ZoneKey> = read(&self.state).zones.keys().copied().collect();
        keys.sort_unstable();
        let due: Vec<ZoneKey> = {
            let mut last = lock(&self.last_rebalance);
            last.retain(|k, _| keys.binary_search(k).is_ok());
            keys.into_iter()
                .filter(|k| {
                    let due = last
                        .get(k)
                        .is_none_or(|&t| now_ms.saturating_sub(t) >= cfg.rebalance.check_interval_ms);
                    if due {
                        last.insert(*k, now_ms);
                    }
                    due
                })
                .collect()
        };
        for (map, zone) in due {
            report.zones_evaluated += 1;
            if let RebalanceDecision::Consolidate { source, target, .. } =
                self.evaluate_layer_rebalancing(map, zone)
            {
                report.consolidations.push(self.consolidate_layers(
                    map,
                    zone,
                    source,
                    target,
                    cfg.rebalance.migration_batch_size,
                ));
            }
        }
        report
    }

    // ── Diagnostics ────────────────────────────────────────────────

    /// Open a diagnostics window of the configured length.
    pub fn enable_runtime_diagnostics(&self) {
        let window = self.config.current().diagnostics.window_ms;
        self.diagnostics.enable(self.clock.now_ms(), window);
    }

    /// Close the diagnostics window.
    pub fn disable_runtime_diagnostics(&self) {
        self.diagnostics.disable();
    }

    /// Whether diagnostics logging is active.
    pub fn runtime_diagnostics_enabled(&self) -> bool {
        self.diag()
    }
}
