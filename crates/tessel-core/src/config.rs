//! Fabric configuration, validation, and hot reload.
//!
//! [`FabricConfig`] is deserialized from TOML. Every section is optional
//! and every field has a documented default, so an empty document yields
//! a working configuration. [`FabricConfig::validate`] checks structural
//! invariants; [`ConfigHandle`] publishes validated snapshots to the rest
//! of the fabric and swaps them atomically on reload.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::id::{MapId, ZoneId};

// ── PartitionConfig ────────────────────────────────────────────────

/// Spatial partitioning of maps.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionConfig {
    /// Master switch. When off, every position maps to partition 1. Default: true.
    pub enabled: bool,
    /// Maps that are partitioned at startup. Default: empty.
    pub maps: Vec<MapId>,
    /// Partitions registered per map at startup. Default: 4.
    pub default_count: u32,
    /// Upper bound for density-driven splits. Default: 64.
    pub max_partitions: u32,
    /// Border band (world units) inside which entities count as boundary
    /// objects. Rounded up to whole grids, minimum one. Default: 40.0.
    pub border_overlap: f32,
    /// Zones where partitioning is bypassed (everything in partition 1). Default: empty.
    pub excluded_zones: Vec<ZoneId>,
    /// Lifetime of a single partition override (ms). Default: 2000.
    pub override_duration_ms: u64,
    /// Lifetime of overrides set through the batch path (ms). Default: 500.
    pub batch_override_duration_ms: u64,
    /// Minimum interval between two resizes of the same map (ms). Default: 10000.
    pub resize_cooldown_ms: u64,
    /// Lock stripes for the boundary index and visibility sets. Default: 16.
    pub boundary_lock_stripes: usize,
    /// Minimum interval between approach checks for one entity (ms). Default: 200.
    pub approach_check_interval_ms: u64,
    /// Maximum queued pre-cache requests. Default: 256.
    pub precache_queue_limit: usize,
    /// Duplicate suppression window for pre-cache requests (ms). Default: 30000.
    pub precache_recent_ttl_ms: u64,
    /// Pre-cache requests older than this are discarded unprocessed (ms). Default: 15000.
    pub precache_max_age_ms: u64,
    /// Pre-cache requests processed per map per tick. Default: 2.
    pub precache_per_tick: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maps: Vec::new(),
            default_count: 4,
            max_partitions: 64,
            border_overlap: 40.0,
            excluded_zones: Vec::new(),
            override_duration_ms: 2_000,
            batch_override_duration_ms: 500,
            resize_cooldown_ms: 10_000,
            boundary_lock_stripes: 16,
            approach_check_interval_ms: 200,
            precache_queue_limit: 256,
            precache_recent_ttl_ms: 30_000,
            precache_max_age_ms: 15_000,
            precache_per_tick: 2,
        }
    }
}

// ── DensityConfig ──────────────────────────────────────────────────

/// Density-driven partition split/merge.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DensityConfig {
    /// Whether density evaluation may resize maps. Default: true.
    pub enabled: bool,
    /// Mean (players + creatures) per squared grid above which a map splits. Default: 40.0.
    pub split_threshold: f32,
    /// Mean density below which a map merges. Default: 2.0.
    pub merge_threshold: f32,
    /// Consecutive samples a threshold must hold before acting. Default: 3.
    pub sustain_samples: u32,
    /// Minimum interval between density evaluations of one map (ms). Default: 30000.
    pub evaluate_interval_ms: u64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            split_threshold: 40.0,
            merge_threshold: 2.0,
            sustain_samples: 3,
            evaluate_interval_ms: 30_000,
        }
    }
}

// ── RelayConfig ────────────────────────────────────────────────────

/// Cross-partition relay queues.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Events held per (map, partition, kind) queue. Default: 1024.
    pub capacity: usize,
    /// Lock stripes per map. Default: 16.
    pub lock_stripes: usize,
    /// Minimum interval between drop/replace aggregate log lines per (map, kind) (ms). Default: 5000.
    pub log_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            lock_stripes: 16,
            log_interval_ms: 5_000,
        }
    }
}

// ── RelocationConfig ───────────────────────────────────────────────

/// Partition handoff transactions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelocationConfig {
    /// Age after which an unfinished transaction is rolled back (ms). Default: 500.
    pub timeout_ms: u64,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self { timeout_ms: 500 }
    }
}

// ── SchedulerConfig ────────────────────────────────────────────────

/// Parallel per-partition tick scheduling.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Run partitions on the worker pool. When off, every partition runs
    /// serially on the calling thread and the cycle completes within one
    /// call. Default: true.
    pub parallel: bool,
    /// Worker threads. `None` = auto-detect
    /// (`available_parallelism`, clamped to `[2, 32]`).
    pub worker_threads: Option<usize>,
    /// Maximum partition tasks one map may have in flight. Default: 8.
    pub contention_cap: u32,
    /// Cycle duration that triggers a slow-cycle warning (ms). Default: 40.
    pub slow_cycle_ms: u64,
    /// Minimum interval between slow-cycle warnings per map (ms). Default: 5000.
    pub slow_cycle_log_interval_ms: u64,
    /// Partition task duration that triggers a phase breakdown warning (ms). Default: 80.
    pub slow_phase_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            worker_threads: None,
            contention_cap: 8,
            slow_cycle_ms: 40,
            slow_cycle_log_interval_ms: 5_000,
            slow_phase_ms: 80,
        }
    }
}

impl SchedulerConfig {
    /// Resolve the actual worker count, applying auto-detection if `None`.
    ///
    /// Explicit values are clamped to `[1, 64]`.
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_threads {
            Some(n) => n.clamp(1, 64),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4);
                cpus.clamp(2, 32)
            }
        }
    }
}

// ── LayerConfig ────────────────────────────────────────────────────

/// Per-map override of the layer capacity.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MapCapacity {
    /// Map the override applies to.
    pub map: MapId,
    /// Players per layer on that map.
    pub capacity: u32,
}

/// Population layering.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerConfig {
    /// Master switch. When off, everyone lives on layer 0. Default: true.
    pub enabled: bool,
    /// Players per layer before a new layer is opened. Default: 100.
    pub capacity: u32,
    /// Per-map capacity overrides. Default: empty.
    pub map_capacity: Vec<MapCapacity>,
    /// Maximum layers per (map, zone), base layer included. Default: 4.
    pub max_layers: u32,
    /// Track NPC layer membership. Default: true.
    pub npc_layering: bool,
    /// Track game-object layer membership. Default: true.
    pub go_layering: bool,
    /// Pressure must persist this long before a new layer opens (ms). Default: 0.
    pub creation_warmup_ms: u64,
    /// Sparse layers must stay sparse this long before consolidation (ms). Default: 0.
    pub destruction_cooldown_ms: u64,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            map_capacity: Vec::new(),
            max_layers: 4,
            npc_layering: true,
            go_layering: true,
            creation_warmup_ms: 0,
            destruction_cooldown_ms: 0,
        }
    }
}

impl LayerConfig {
    /// Capacity for `map`, falling back to the global capacity.
    pub fn capacity_for(&self, map: MapId) -> u32 {
        self.map_capacity
            .iter()
            .find(|c| c.map == map)
            .map(|c| c.capacity)
            .unwrap_or(self.capacity)
    }
}

// ── RebalanceConfig ────────────────────────────────────────────────

/// Layer consolidation.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RebalanceConfig {
    /// Whether rebalancing runs at all. Default: true.
    pub enabled: bool,
    /// Minimum interval between evaluations of one (map, zone) (ms). Default: 300000.
    pub check_interval_ms: u64,
    /// Layers below this population are candidates for draining. Default: 5.
    pub min_players_per_layer: u32,
    /// Coefficient of variation of layer populations that counts as imbalanced. Default: 0.3.
    pub imbalance_threshold: f32,
    /// Players migrated per evaluation. Default: 10.
    pub migration_batch_size: u32,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 300_000,
            min_players_per_layer: 5,
            imbalance_threshold: 0.3,
            migration_batch_size: 10,
        }
    }
}

// ── SpawnConfig ────────────────────────────────────────────────────

/// Layer-aware spawn loading.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpawnConfig {
    /// Spawn only the base instance in zones without players. Default: false.
    pub skip_clone_spawns_if_no_players: bool,
    /// Emit `layer_clone_spawn_*` metrics even outside a diagnostics window. Default: false.
    pub emit_per_layer_clone_metrics: bool,
}

// ── DiagnosticsConfig ──────────────────────────────────────────────

/// Runtime diagnostics window.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Turn diagnostics on at startup. Default: false.
    pub enabled_at_start: bool,
    /// How long an enable request lasts (ms); zero means no expiry. Default: 60000.
    pub window_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled_at_start: false,
            window_ms: 60_000,
        }
    }
}

// ── FabricConfig ───────────────────────────────────────────────────

/// Complete configuration of the partitioning fabric.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FabricConfig {
    /// Partition registry and boundary handling.
    pub partition: PartitionConfig,
    /// Density-driven resizing.
    pub density: DensityConfig,
    /// Relay queues.
    pub relay: RelayConfig,
    /// Relocation transactions.
    pub relocation: RelocationConfig,
    /// Parallel scheduling.
    pub scheduler: SchedulerConfig,
    /// Layering.
    pub layer: LayerConfig,
    /// Layer rebalancing.
    pub rebalance: RebalanceConfig,
    /// Spawn loading.
    pub spawn: SpawnConfig,
    /// Diagnostics window.
    pub diagnostics: DiagnosticsConfig,
}

impl FabricConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FabricConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.partition;
        if p.default_count == 0 {
            return Err(ConfigError::invalid("partition", "default_count must be at least 1"));
        }
        if p.max_partitions == 0 || p.default_count > p.max_partitions {
            return Err(ConfigError::invalid(
                "partition",
                format!(
                    "default_count ({}) must be within [1, max_partitions ({})]",
                    p.default_count, p.max_partitions
                ),
            ));
        }
        if !p.border_overlap.is_finite() || p.border_overlap < 0.0 {
            return Err(ConfigError::invalid(
                "partition",
                format!("border_overlap must be finite and >= 0, got {}", p.border_overlap),
            ));
        }
        if p.boundary_lock_stripes == 0 {
            return Err(ConfigError::invalid("partition", "boundary_lock_stripes must be at least 1"));
        }

        let d = &self.density;
        if !d.split_threshold.is_finite() || !d.merge_threshold.is_finite() {
            return Err(ConfigError::invalid("density", "thresholds must be finite"));
        }
        if d.merge_threshold >= d.split_threshold {
            return Err(ConfigError::invalid(
                "density",
                format!(
                    "merge_threshold ({}) must be below split_threshold ({})",
                    d.merge_threshold, d.split_threshold
                ),
            ));
        }
        if d.sustain_samples == 0 {
            return Err(ConfigError::invalid("density", "sustain_samples must be at least 1"));
        }

        if self.relay.capacity == 0 {
            return Err(ConfigError::invalid("relay", "capacity must be at least 1"));
        }
        if self.relay.lock_stripes == 0 {
            return Err(ConfigError::invalid("relay", "lock_stripes must be at least 1"));
        }

        if self.relocation.timeout_ms == 0 {
            return Err(ConfigError::invalid("relocation", "timeout_ms must be at least 1"));
        }

        if self.scheduler.contention_cap == 0 {
            return Err(ConfigError::invalid("scheduler", "contention_cap must be at least 1"));
        }
        if self.scheduler.slow_cycle_ms == 0 {
            return Err(ConfigError::invalid("scheduler", "slow_cycle_ms must be at least 1"));
        }

        let l = &self.layer;
        if l.capacity == 0 || l.map_capacity.iter().any(|c| c.capacity == 0) {
            return Err(ConfigError::invalid("layer", "capacities must be at least 1"));
        }
        if l.max_layers == 0 {
            return Err(ConfigError::invalid("layer", "max_layers must be at least 1"));
        }

        let r = &self.rebalance;
        if !r.imbalance_threshold.is_finite() || r.imbalance_threshold < 0.0 {
            return Err(ConfigError::invalid(
                "rebalance",
                format!("imbalance_threshold must be finite and >= 0, got {}", r.imbalance_threshold),
            ));
        }
        if r.migration_batch_size == 0 {
            return Err(ConfigError::invalid("rebalance", "migration_batch_size must be at least 1"));
        }

        Ok(())
    }
}

// ── ConfigHandle ───────────────────────────────────────────────────

/// Shared, hot-reloadable view of the active [`FabricConfig`].
///
/// Readers take a cheap `Arc` snapshot with [`current`](Self::current) and
/// keep using it for the rest of their operation, so a reload never changes
/// settings underneath a running cycle.
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<FabricConfig>>,
    version: AtomicU64,
}

impl ConfigHandle {
    /// Validate `config` and wrap it.
    pub fn new(config: FabricConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            version: AtomicU64::new(1),
        })
    }

    /// Snapshot of the active configuration.
    pub fn current(&self) -> Arc<FabricConfig> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Monotonic version, bumped on every successful reload.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Replace the active configuration.
    ///
    /// The new config is validated first; on failure the previous config
    /// stays active and the error is returned. Returns the new version.
    pub fn reload(&self, config: FabricConfig) -> Result<u64, ConfigError> {
        if let Err(e) = config.validate() {
            tracing::warn!(target: "map.partition", error = %e, "rejected config reload");
            return Err(e);
        }
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(config);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(target: "map.partition", version, "configuration reloaded");
        Ok(version)
    }

    /// Parse a TOML document and [`reload`](Self::reload) with it.
    pub fn reload_from_str(&self, text: &str) -> Result<u64, ConfigError> {
        let config: FabricConfig = toml::from_str(text)?;
        self.reload(config)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(FabricConfig::default())),
            version: AtomicU64::new(1),
        }
    }
}
