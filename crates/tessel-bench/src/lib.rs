//! Benchmark profiles and workloads for the Tessel partitioning fabric.
//!
//! - [`bench_config`]: a validated config partitioning one map
//! - [`partition_manager`] / [`layer_manager`]: managers on a manual clock
//! - [`boundary_workload`]: deterministic boundary moves around the quadrant seams

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use tessel_core::{ConfigError, ConfigHandle, EntityId, FabricConfig, MapId, NoopMetrics, PartitionConfig};
use tessel_layer::LayerManager;
use tessel_partition::PartitionManager;
use tessel_space::BoundaryUpdate;
use tessel_test_utils::{seeded_positions, ManualClock};

/// Map every profile partitions.
pub const BENCH_MAP: MapId = MapId(571);

/// Config partitioning [`BENCH_MAP`] into `partitions` cells.
pub fn bench_config(partitions: u32) -> Result<Arc<ConfigHandle>, ConfigError> {
    let config = FabricConfig {
        partition: PartitionConfig {
            maps: vec![BENCH_MAP],
            default_count: partitions,
            max_partitions: partitions.max(64),
            ..PartitionConfig::default()
        },
        ..FabricConfig::default()
    };
    Ok(Arc::new(ConfigHandle::new(config)?))
}

/// An initialized partition manager on a clock frozen at zero.
pub fn partition_manager(partitions: u32) -> Result<PartitionManager, ConfigError> {
    let manager = PartitionManager::new(bench_config(partitions)?, Arc::new(ManualClock::new(0)));
    manager.initialize();
    Ok(manager)
}

/// A layer manager with metrics discarded, on a clock frozen at zero.
pub fn layer_manager() -> Result<LayerManager, ConfigError> {
    Ok(LayerManager::new(
        bench_config(4)?,
        Arc::new(ManualClock::new(0)),
        Arc::new(NoopMetrics),
    ))
}

/// `n` boundary moves, each within `band` world units of the map origin
/// seams, reproducible from `seed`.
///
/// Entity ids run from 1 to `n`, so consecutive calls with the same `n`
/// move the same population.
pub fn boundary_workload(seed: u64, n: usize, band: f32) -> Vec<BoundaryUpdate> {
    seeded_positions(seed, n, 16_000.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            // Fold one axis into the seam band so every move stays a boundary object.
            let (x, y) = if i % 2 == 0 {
                (p.x % band, p.y)
            } else {
                (p.x, p.y % band)
            };
            BoundaryUpdate {
                entity: EntityId(i as u64 + 1),
                x,
                y,
            }
        })
        .collect()
}
