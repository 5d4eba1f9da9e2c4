//! Per-map runtime: the object the world tick loop talks to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tessel_core::{ConfigHandle, MapId, PartitionId, TaskFn};

use crate::buckets::{BucketSet, PlayerBuckets};
use crate::handler::TickContext;
use crate::metrics::CycleMetrics;
use crate::scheduler::{PartitionScheduler, SchedulerPhase};
use crate::update::{PartitionUpdate, UpdateEnv};

/// Relay latency metrics are emitted on every Nth partition update.
const RELAY_METRICS_EVERY: u64 = 10;

/// One loaded world map.
pub struct MapRuntime {
    map: MapId,
    config: Arc<ConfigHandle>,
    env: UpdateEnv,
    buckets: Arc<PlayerBuckets>,
    scheduler: Mutex<PartitionScheduler>,
    update_counter: AtomicU64,
}

impl std::fmt::Debug for MapRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapRuntime")
            .field("map", &self.map)
            .finish_non_exhaustive()
    }
}

impl MapRuntime {
    /// Runtime for `map`, scheduling through `scheduler`.
    pub fn new(
        map: MapId,
        config: Arc<ConfigHandle>,
        env: UpdateEnv,
        scheduler: PartitionScheduler,
    ) -> Self {
        Self {
            map,
            config,
            env,
            buckets: Arc::new(PlayerBuckets::new()),
            scheduler: Mutex::new(scheduler),
            update_counter: AtomicU64::new(0),
        }
    }

    /// The map.
    pub fn map(&self) -> MapId {
        self.map
    }

    /// Drive this map's partition cycle one step. Call once per world
    /// tick; `true` means the cycle for this tick is complete.
    pub fn schedule_partition_updates(&self, tick_delta_ms: u32, step_delta_ms: u32) -> bool {
        let cfg = self.config.current();
        let map = self.map;
        let env = &self.env;
        let buckets = &self.buckets;
        let slow_phase_ms = cfg.scheduler.slow_phase_ms;

        let mut scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Option<Arc<BucketSet>> = None;
        let done = scheduler.poll(
            tick_delta_ms,
            &cfg.scheduler,
            || {
                env.handler.begin_cycle(map);
                for request in env.partitions.take_precache_requests(map) {
                    env.handler.precache(&request);
                }
                let count = env.partitions.partition_count(map);
                let players = env.handler.players(map);
                buckets.rebuild(
                    count,
                    players.iter().map(|s| {
                        (
                            s.player,
                            env.partitions
                                .partition_for_entity(map, s.position, s.zone, s.player),
                        )
                    }),
                );
                count
            },
            |partition: PartitionId| -> TaskFn {
                let set = snapshot.get_or_insert_with(|| buckets.snapshot());
                let n = self.update_counter.fetch_add(1, Ordering::Relaxed);
                let update = PartitionUpdate::new(
                    env.clone(),
                    TickContext {
                        map,
                        partition,
                        diff_ms: tick_delta_ms,
                        step_ms: step_delta_ms,
                    },
                    Arc::clone(set),
                    n % RELAY_METRICS_EVERY == 0,
                    slow_phase_ms,
                );
                Box::new(move || {
                    update.run();
                })
            },
        );
        if done {
            buckets.clear();
        }
        done
    }

    /// Abandon the running cycle. Returns `false` if none was running.
    pub fn cancel_cycle(&self) -> bool {
        let cancelled = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_cycle();
        if cancelled {
            self.buckets.clear();
        }
        cancelled
    }

    /// Metrics of the last completed cycle.
    pub fn last_cycle_metrics(&self) -> Option<CycleMetrics> {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_cycle()
            .cloned()
    }

    /// Whether a cycle is running.
    pub fn in_progress(&self) -> bool {
        self.phase() != SchedulerPhase::Idle
    }

    /// Scheduler phase.
    pub fn phase(&self) -> SchedulerPhase {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase()
    }

    /// Cycles completed since the map was loaded.
    pub fn cycles_completed(&self) -> u64 {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cycles_completed()
    }

    /// Player buckets of the running cycle; empty between cycles.
    pub fn player_buckets(&self) -> Arc<BucketSet> {
        self.buckets.snapshot()
    }
}
