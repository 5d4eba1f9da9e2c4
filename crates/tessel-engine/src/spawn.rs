//! Layer-aware spawn loading.
//!
//! When a world grid loads, every static spawn in it is instantiated once
//! per active layer of its zone. The first instance is the original; the
//! rest are clones that may share its spawn key. Zones without players can
//! skip cloning entirely, since layers are only meaningful once someone is
//! there to see them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tessel_core::{
    Clock, ConfigHandle, EntityId, GridCoord, LayerId, MapId, MetricTag, MetricsSink, SpawnError,
    SpawnKind, SpawnRecord, Spawner, WorldDataStore, ZoneId,
};
use tessel_layer::LayerManager;

// ── CloneDiagnostics ─────────────────────────────────────────────

/// Count and time of clone spawns for one (zone, layer, kind).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloneStat {
    /// Clones spawned.
    pub count: u32,
    /// Time spent spawning them.
    pub total_us: u64,
}

impl CloneStat {
    /// What was added on top of an earlier snapshot of the same totals.
    pub fn since(self, earlier: CloneStat) -> CloneStat {
        CloneStat {
            count: self.count.saturating_sub(earlier.count),
            total_us: self.total_us.saturating_sub(earlier.total_us),
        }
    }
}

/// Clone spawn totals, accumulated across a grid load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloneDiagnostics {
    entries: BTreeMap<(ZoneId, LayerId, SpawnKind), CloneStat>,
}

impl CloneDiagnostics {
    /// No clones recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one clone spawn.
    pub fn record(&mut self, zone: ZoneId, layer: LayerId, kind: SpawnKind, elapsed_us: u64) {
        let stat = self.entries.entry((zone, layer, kind)).or_default();
        stat.count += 1;
        stat.total_us += elapsed_us;
    }

    /// Totals for one (zone, layer, kind).
    pub fn get(&self, zone: ZoneId, layer: LayerId, kind: SpawnKind) -> Option<CloneStat> {
        self.entries.get(&(zone, layer, kind)).copied()
    }

    /// Clones recorded across all keys.
    pub fn total_clones(&self) -> u32 {
        self.entries.values().map(|s| s.count).sum()
    }

    /// Count and time summed across all keys.
    pub fn totals(&self) -> CloneStat {
        self.entries.values().fold(CloneStat::default(), |acc, s| CloneStat {
            count: acc.count + s.count,
            total_us: acc.total_us + s.total_us,
        })
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in (zone, layer, kind) order.
    pub fn iter(&self) -> impl Iterator<Item = ((ZoneId, LayerId, SpawnKind), CloneStat)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }
}

// ── GridLoad ─────────────────────────────────────────────────────

/// One instance created by a grid load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpawnedInstance {
    /// Source record.
    pub spawn_id: u64,
    /// Creature or game object.
    pub kind: SpawnKind,
    /// Created entity.
    pub entity: EntityId,
    /// Layer it was created for; `None` when unlayered.
    pub layer: Option<LayerId>,
    /// Whether it is a clone of the record's first instance.
    pub clone: bool,
}

/// Result of [`SpawnLoader::load_grid`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridLoad {
    /// Instances created.
    pub spawned: Vec<SpawnedInstance>,
    /// Records skipped because of a missing template or spawn failure.
    pub skipped: u32,
    /// Clone diagnostics, with this load's clones folded in.
    pub diagnostics: CloneDiagnostics,
}

// ── SpawnLoader ──────────────────────────────────────────────────

/// Instantiates static spawns for loaded grid cells.
pub struct SpawnLoader {
    world: Arc<dyn WorldDataStore>,
    spawner: Arc<dyn Spawner>,
    layers: Arc<LayerManager>,
    metrics: Arc<dyn MetricsSink>,
    config: Arc<ConfigHandle>,
}

impl std::fmt::Debug for SpawnLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnLoader").finish_non_exhaustive()
    }
}

impl SpawnLoader {
    /// Build a loader over the given collaborators.
    pub fn new(
        world: Arc<dyn WorldDataStore>,
        spawner: Arc<dyn Spawner>,
        layers: Arc<LayerManager>,
        metrics: Arc<dyn MetricsSink>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        Self {
            world,
            spawner,
            layers,
            metrics,
            config,
        }
    }

    fn layering_enabled(&self, kind: SpawnKind) -> bool {
        match kind {
            SpawnKind::Creature => self.layers.is_npc_layering_enabled(),
            SpawnKind::GameObject => self.layers.is_go_layering_enabled(),
        }
    }

    /// Layers `record` should be instantiated for. `None` entries are
    /// unlayered spawns.
    fn target_layers(&self, map: MapId, record: &SpawnRecord, skip_empty: bool) -> Vec<Option<LayerId>> {
        if !self.layering_enabled(record.kind) {
            return vec![None];
        }
        if skip_empty && !self.layers.has_players(map, record.zone) {
            return vec![Some(LayerId::BASE)];
        }
        self.layers
            .active_layer_ids(map, record.zone)
            .into_iter()
            .map(Some)
            .collect()
    }

    /// Spawn every record of grid `cell` on `map`.
    pub fn load_grid(&self, map: MapId, cell: GridCoord, diagnostics: CloneDiagnostics) -> GridLoad {
        let cfg = self.config.current();
        let skip_empty = cfg.spawn.skip_clone_spawns_if_no_players;
        let mut load = GridLoad {
            diagnostics,
            ..GridLoad::default()
        };
        let before = load.diagnostics.totals();

        for record in self.world.spawns_in_cell(map, cell) {
            let targets = self.target_layers(map, &record, skip_empty);
            self.spawn_record(map, &record, &targets, true, &mut load);
        }

        self.log_grid(map, cell, &load, before);
        load
    }

    /// Spawn the clones a freshly created `layer` needs in grid `cell`:
    /// one per record of a zone that has that layer.
    pub fn load_layer_clones(
        &self,
        map: MapId,
        cell: GridCoord,
        layer: LayerId,
        diagnostics: CloneDiagnostics,
    ) -> GridLoad {
        let mut load = GridLoad {
            diagnostics,
            ..GridLoad::default()
        };
        let before = load.diagnostics.totals();
        for record in self.world.spawns_in_cell(map, cell) {
            if !self.layering_enabled(record.kind)
                || !self.layers.active_layer_ids(map, record.zone).contains(&layer)
            {
                continue;
            }
            self.spawn_record(map, &record, &[Some(layer)], false, &mut load);
        }
        self.log_grid(map, cell, &load, before);
        load
    }

    fn spawn_record(
        &self,
        map: MapId,
        record: &SpawnRecord,
        targets: &[Option<LayerId>],
        first_is_original: bool,
        load: &mut GridLoad,
    ) {
        if !self.world.template_exists(record.kind, record.template_id) {
            let err = SpawnError::MissingTemplate {
                kind: record.kind,
                template_id: record.template_id,
            };
            tracing::error!(target: "map.partition", map = %map, spawn_id = record.spawn_id, error = %err, "skipping spawn");
            load.skipped += 1;
            return;
        }

        let timed = self.layers.runtime_diagnostics_enabled()
            || self.config.current().spawn.emit_per_layer_clone_metrics;

        for (i, &layer) in targets.iter().enumerate() {
            let clone = !(first_is_original && i == 0);
            let start = timed.then(Instant::now);
            let entity = match self.spawner.spawn(map, record, layer, clone) {
                Ok(e) => e,
                Err(err) => {
                    tracing::error!(
                        target: "map.partition",
                        map = %map,
                        spawn_id = record.spawn_id,
                        layer = ?layer,
                        error = %err,
                        "spawn failed"
                    );
                    load.skipped += 1;
                    continue;
                }
            };

            if let Some(layer) = layer {
                match record.kind {
                    SpawnKind::Creature => self.layers.assign_npc_to_layer(map, record.zone, entity, layer),
                    SpawnKind::GameObject => self.layers.assign_go_to_layer(map, record.zone, entity, layer),
                };
            }

            if let (true, Some(start), Some(layer)) = (clone, start, layer) {
                let us = start.elapsed().as_micros() as u64;
                load.diagnostics.record(record.zone, layer, record.kind, us);
                let tags = [
                    MetricTag::new("map_id", map),
                    MetricTag::new("zone_id", record.zone),
                    MetricTag::new("layer_id", layer),
                    MetricTag::new("type", record.kind.name()),
                ];
                self.metrics
                    .value("layer_clone_spawn_ms", us as f64 / 1_000.0, &tags);
                self.metrics.counter("layer_clone_spawn_count", 1, &tags);
            }

            load.spawned.push(SpawnedInstance {
                spawn_id: record.spawn_id,
                kind: record.kind,
                entity,
                layer,
                clone,
            });
        }
    }

    fn log_grid(&self, map: MapId, cell: GridCoord, load: &GridLoad, before: CloneStat) {
        let this_load = load.diagnostics.totals().since(before);
        if this_load.count == 0 {
            return;
        }
        tracing::info!(
            target: "map.partition",
            map = %map,
            grid_x = cell.x,
            grid_y = cell.y,
            spawned = load.spawned.len(),
            clones = this_load.count,
            clone_us = this_load.total_us,
            skipped = load.skipped,
            "grid clone spawns"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_accumulate_per_key() {
        let mut d = CloneDiagnostics::new();
        assert!(d.is_empty());
        d.record(ZoneId(1), LayerId(1), SpawnKind::Creature, 10);
        d.record(ZoneId(1), LayerId(1), SpawnKind::Creature, 30);
        d.record(ZoneId(1), LayerId(2), SpawnKind::GameObject, 5);
        assert_eq!(
            d.get(ZoneId(1), LayerId(1), SpawnKind::Creature),
            Some(CloneStat { count: 2, total_us: 40 })
        );
        assert_eq!(d.total_clones(), 3);
        assert_eq!(d.get(ZoneId(2), LayerId(1), SpawnKind::Creature), None);
    }

    #[test]
    fn totals_since_snapshot_exclude_earlier_grids() {
        let mut d = CloneDiagnostics::new();
        d.record(ZoneId(1), LayerId(1), SpawnKind::Creature, 700);
        d.record(ZoneId(1), LayerId(2), SpawnKind::Creature, 300);
        let before = d.totals();
        assert_eq!(before, CloneStat { count: 2, total_us: 1_000 });

        d.record(ZoneId(1), LayerId(1), SpawnKind::Creature, 25);
        d.record(ZoneId(4), LayerId(1), SpawnKind::GameObject, 15);
        assert_eq!(d.totals().since(before), CloneStat { count: 2, total_us: 40 });
        assert_eq!(d.totals().since(d.totals()), CloneStat::default());
    }
}
