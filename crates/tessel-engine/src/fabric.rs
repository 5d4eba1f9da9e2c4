//! The fabric service object.
//!
//! [`Fabric`] wires the managers to the host's collaborators and keeps one
//! [`MapRuntime`] per loaded map. Everything is built explicitly from the
//! handles passed to [`Fabric::new`]; there is no global state.

use std::sync::{Arc, PoisonError, RwLock};

use ahash::AHashMap;
use tessel_core::{
    Clock, ConfigHandle, MapId, MetricsSink, Spawner, WorkerPool, WorldDataStore,
};
use tessel_layer::{LayerManager, LayerUpdateReport};
use tessel_partition::{DensityDecision, MaintenanceReport, PartitionManager};

use crate::error::EngineError;
use crate::handler::TickHandler;
use crate::runtime::MapRuntime;
use crate::scheduler::PartitionScheduler;
use crate::spawn::SpawnLoader;
use crate::update::UpdateEnv;

/// What one [`Fabric::maintenance`] pass did.
#[derive(Clone, Debug, Default)]
pub struct FabricMaintenance {
    /// Partition manager sweeps.
    pub partition: MaintenanceReport,
    /// Layer manager sweeps and rebalancing.
    pub layer: LayerUpdateReport,
    /// Density decision per loaded map, in map id order.
    pub density: Vec<(MapId, DensityDecision)>,
}

/// Partition and layer services plus the loaded maps.
pub struct Fabric {
    config: Arc<ConfigHandle>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    pool: Arc<dyn WorkerPool>,
    partitions: Arc<PartitionManager>,
    layers: Arc<LayerManager>,
    maps: RwLock<AHashMap<MapId, Arc<MapRuntime>>>,
}

// Compile-time assertion: Fabric must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Fabric>();
};

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("loaded_maps", &self.loaded_maps())
            .finish_non_exhaustive()
    }
}

impl Fabric {
    /// Build the managers and register the configured partitioned maps.
    pub fn new(
        config: Arc<ConfigHandle>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
        pool: Arc<dyn WorkerPool>,
    ) -> Self {
        let partitions = Arc::new(PartitionManager::new(Arc::clone(&config), Arc::clone(&clock)));
        let maps = partitions.initialize();
        let layers = Arc::new(LayerManager::new(
            Arc::clone(&config),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        tracing::info!(
            target: "map.partition",
            partitioned_maps = maps,
            workers = pool.worker_count(),
            config_version = config.version(),
            "fabric initialised"
        );
        Self {
            config,
            clock,
            metrics,
            pool,
            partitions,
            layers,
            maps: RwLock::new(AHashMap::new()),
        }
    }

    /// Create the runtime of `map`, driven by `handler`.
    pub fn load_map(
        &self,
        map: MapId,
        handler: Arc<dyn TickHandler>,
    ) -> Result<Arc<MapRuntime>, EngineError> {
        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        if maps.contains_key(&map) {
            return Err(EngineError::MapLoaded(map));
        }
        let env = UpdateEnv {
            partitions: Arc::clone(&self.partitions),
            handler,
            metrics: Arc::clone(&self.metrics),
            clock: Arc::clone(&self.clock),
        };
        let scheduler = PartitionScheduler::new(map, Arc::clone(&self.pool), Arc::clone(&self.clock));
        let runtime = Arc::new(MapRuntime::new(map, Arc::clone(&self.config), env, scheduler));
        maps.insert(map, Arc::clone(&runtime));
        tracing::info!(
            target: "map.partition",
            map = %map,
            partitions = self.partitions.partition_count(map),
            "map loaded"
        );
        Ok(runtime)
    }

    /// Drop the runtime of `map`, cancelling any running cycle.
    pub fn unload_map(&self, map: MapId) -> bool {
        let removed = self
            .maps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&map);
        match removed {
            Some(runtime) => {
                runtime.cancel_cycle();
                tracing::info!(target: "map.partition", map = %map, "map unloaded");
                true
            }
            None => false,
        }
    }

    /// Runtime of `map`, if loaded.
    pub fn map(&self, map: MapId) -> Option<Arc<MapRuntime>> {
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&map)
            .cloned()
    }

    /// Loaded maps in id order.
    pub fn loaded_maps(&self) -> Vec<MapId> {
        let mut ids: Vec<MapId> = self
            .maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drive `map`'s partition cycle. Maps that are not loaded have nothing
    /// to wait for and report `true`.
    pub fn schedule_partition_updates(&self, map: MapId, tick_delta_ms: u32, step_delta_ms: u32) -> bool {
        match self.map(map) {
            Some(runtime) => runtime.schedule_partition_updates(tick_delta_ms, step_delta_ms),
            None => true,
        }
    }

    /// A spawn loader sharing this fabric's layer manager.
    pub fn spawn_loader(
        &self,
        world: Arc<dyn WorldDataStore>,
        spawner: Arc<dyn Spawner>,
    ) -> SpawnLoader {
        SpawnLoader::new(
            world,
            spawner,
            Arc::clone(&self.layers),
            Arc::clone(&self.metrics),
            Arc::clone(&self.config),
        )
    }

    /// Periodic sweeps of both managers plus density evaluation of every
    /// loaded map.
    pub fn maintenance(&self) -> FabricMaintenance {
        let partition = self.partitions.run_maintenance();
        let layer = self.layers.update(self.clock.now_ms());
        let density = self
            .loaded_maps()
            .into_iter()
            .map(|m| (m, self.partitions.evaluate_partition_density(m)))
            .collect();
        FabricMaintenance {
            partition,
            layer,
            density,
        }
    }

    /// Partition manager.
    pub fn partitions(&self) -> &Arc<PartitionManager> {
        &self.partitions
    }

    /// Layer manager.
    pub fn layers(&self) -> &Arc<LayerManager> {
        &self.layers
    }

    /// Configuration handle.
    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    /// Worker pool.
    pub fn pool(&self) -> &Arc<dyn WorkerPool> {
        &self.pool
    }
}
