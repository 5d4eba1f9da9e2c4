//! Generation-gated partition scheduler.
//!
//! One [`PartitionScheduler`] drives the partition tasks of one map. The
//! map's tick thread calls [`PartitionScheduler::poll`] once per world tick
//! and never blocks: each call tops the pool up to the in-flight limit and
//! reports whether every partition of the current cycle has finished.
//!
//! ```text
//!   Idle ──poll──▶ Scheduling ──all scheduled──▶ Draining ──all done──▶ Idle
//! ```
//!
//! A cycle is stamped with a generation when it starts. Tasks carry the
//! generation they were created under and their completions only count
//! while that generation is still armed, so a cancelled cycle's stragglers
//! cannot complete the next one.

use std::sync::Arc;

use tessel_core::{
    Clock, MapId, PartitionId, PartitionTask, PoolError, SchedulerConfig, TaskFn, WorkerPool,
};

use crate::generation::{CompletionCounter, GenerationCounter};
use crate::metrics::{CycleMetrics, CycleTimings};

/// In-flight limit for a tick of `tick_delta_ms`.
///
/// Long ticks mean the server is already behind, so fewer partitions run
/// at once to leave room for the rest of the world update.
pub fn adaptive_in_flight_limit(tick_delta_ms: u32) -> u32 {
    match tick_delta_ms {
        d if d >= 200 => 3,
        d if d >= 120 => 4,
        d if d <= 35 => 6,
        _ => 5,
    }
}

/// Where a map's scheduler is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// No cycle running.
    Idle,
    /// Some partitions not yet handed to the pool.
    Scheduling,
    /// Everything scheduled; waiting for completions.
    Draining,
}

#[derive(Debug, Default)]
struct CycleShared {
    generation: GenerationCounter,
    completions: CompletionCounter,
    timings: CycleTimings,
}

#[derive(Debug)]
struct Cycle {
    generation: u64,
    total: u32,
    scheduled: u32,
    max_in_flight: u32,
    started_ms: u64,
    polls: u32,
    inline: bool,
}

/// Per-map scheduling state machine.
pub struct PartitionScheduler {
    map: MapId,
    pool: Arc<dyn WorkerPool>,
    clock: Arc<dyn Clock>,
    shared: Arc<CycleShared>,
    cycle: Option<Cycle>,
    next_slow_log_ms: u64,
    last: Option<CycleMetrics>,
    cycles_completed: u64,
}

impl std::fmt::Debug for PartitionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionScheduler")
            .field("map", &self.map)
            .field("phase", &self.phase())
            .field("generation", &self.generation())
            .field("cycles_completed", &self.cycles_completed)
            .finish_non_exhaustive()
    }
}

impl PartitionScheduler {
    /// An idle scheduler for `map`.
    pub fn new(map: MapId, pool: Arc<dyn WorkerPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            map,
            pool,
            clock,
            shared: Arc::new(CycleShared::default()),
            cycle: None,
            next_slow_log_ms: 0,
            last: None,
            cycles_completed: 0,
        }
    }

    /// Advance the current cycle, starting one if idle.
    ///
    /// `begin` runs once at the start of a cycle and returns the number of
    /// partitions to update. `job` builds the work for one partition. Returns
    /// `true` exactly once per cycle, on the call that observes every
    /// partition complete.
    pub fn poll<B, J>(
        &mut self,
        tick_delta_ms: u32,
        config: &SchedulerConfig,
        begin: B,
        mut job: J,
    ) -> bool
    where
        B: FnOnce() -> u32,
        J: FnMut(PartitionId) -> TaskFn,
    {
        let mut cycle = match self.cycle.take() {
            Some(c) => c,
            None => self.start_cycle(tick_delta_ms, config, begin),
        };
        cycle.polls += 1;

        if cycle.inline {
            while cycle.scheduled < cycle.total {
                cycle.scheduled += 1;
                self.task(&cycle, PartitionId(cycle.scheduled), &mut job).run();
            }
        } else {
            while cycle.scheduled < cycle.total {
                let done = self.shared.completions.completed(cycle.generation);
                if cycle.scheduled.saturating_sub(done) >= cycle.max_in_flight {
                    break;
                }
                cycle.scheduled += 1;
                let task = self.task(&cycle, PartitionId(cycle.scheduled), &mut job);
                if let Err(PoolError::ShutDown(task)) = self.pool.schedule(task) {
                    tracing::warn!(
                        target: "map.partition",
                        map = %self.map,
                        partition = %task.partition,
                        "worker pool rejected partition task, running inline"
                    );
                    task.run();
                }
            }
        }

        if self.shared.completions.completed(cycle.generation) >= cycle.total {
            self.finish_cycle(cycle, config);
            true
        } else {
            self.cycle = Some(cycle);
            false
        }
    }

    fn start_cycle<B: FnOnce() -> u32>(
        &mut self,
        tick_delta_ms: u32,
        config: &SchedulerConfig,
        begin: B,
    ) -> Cycle {
        let total = begin().max(1);
        let generation = self.shared.generation.advance();
        self.shared.timings.reset();
        self.shared.completions.arm(generation);

        let inline = !config.parallel;
        let max_in_flight = if inline {
            total
        } else {
            let capacity = config
                .resolved_worker_count()
                .max(self.pool.worker_count())
                .max(1) as u32;
            let mut limit = total
                .min(config.contention_cap.max(1))
                .min(adaptive_in_flight_limit(tick_delta_ms))
                .min(capacity);
            if self.pool.health().pending > 2 * capacity as usize {
                limit /= 2;
            }
            limit.max(1)
        };

        tracing::trace!(
            target: "map.partition",
            map = %self.map,
            generation,
            partitions = total,
            max_in_flight,
            "partition cycle started"
        );
        Cycle {
            generation,
            total,
            scheduled: 0,
            max_in_flight,
            started_ms: self.clock.now_ms(),
            polls: 0,
            inline,
        }
    }

    fn task<J: FnMut(PartitionId) -> TaskFn>(
        &self,
        cycle: &Cycle,
        partition: PartitionId,
        job: &mut J,
    ) -> PartitionTask {
        let shared = Arc::clone(&self.shared);
        let generation = cycle.generation;
        PartitionTask::new(
            self.map,
            partition,
            job(partition),
            Box::new(move |timing| {
                if shared.generation.is_current(generation) {
                    shared.timings.record(&timing);
                }
                shared.completions.complete(generation);
            }),
        )
    }

    fn finish_cycle(&mut self, cycle: Cycle, config: &SchedulerConfig) {
        let now = self.clock.now_ms();
        let cycle_ms = now.saturating_sub(cycle.started_ms);
        let totals = self.shared.timings.totals();
        let completed = self.shared.completions.completed(cycle.generation);

        let threshold = config.slow_cycle_ms.max(1);
        let interval = config.slow_cycle_log_interval_ms;
        let logged_slow = cycle_ms >= threshold && (interval == 0 || now >= self.next_slow_log_ms);
        if logged_slow {
            self.next_slow_log_ms = now.saturating_add(interval);
            let health = self.pool.health();
            tracing::warn!(
                target: "map.partition.slow",
                map = %self.map,
                partitions = cycle.total,
                completed,
                in_flight_limit = cycle.max_in_flight,
                cycle_ms,
                queue_wait_total_us = totals.queue_wait_total_us,
                queue_wait_max_us = totals.queue_wait_max_us,
                run_total_us = totals.run_total_us,
                run_max_us = totals.run_max_us,
                barrier_blocked_us = (cycle_ms * 1_000).saturating_sub(totals.busy_window_us),
                active_workers = health.active,
                pending_jobs = health.pending,
                "slow partition update cycle"
            );
        }

        self.last = Some(CycleMetrics {
            generation: cycle.generation,
            partitions: cycle.total,
            max_in_flight: cycle.max_in_flight,
            polls: cycle.polls,
            cycle_ms,
            queue_wait_total_us: totals.queue_wait_total_us,
            queue_wait_max_us: totals.queue_wait_max_us,
            run_total_us: totals.run_total_us,
            run_max_us: totals.run_max_us,
            busy_window_us: totals.busy_window_us,
            logged_slow,
        });
        self.cycles_completed += 1;
    }

    /// Abandon the running cycle. Tasks already handed to the pool still
    /// run, but their completions no longer count. Returns `false` if no
    /// cycle was running.
    pub fn cancel_cycle(&mut self) -> bool {
        let Some(cycle) = self.cycle.take() else {
            return false;
        };
        let next = self.shared.generation.advance();
        self.shared.completions.arm(next);
        tracing::debug!(
            target: "map.partition",
            map = %self.map,
            generation = cycle.generation,
            scheduled = cycle.scheduled,
            total = cycle.total,
            "partition cycle cancelled"
        );
        true
    }

    /// Current phase.
    pub fn phase(&self) -> SchedulerPhase {
        match &self.cycle {
            None => SchedulerPhase::Idle,
            Some(c) if c.scheduled < c.total => SchedulerPhase::Scheduling,
            Some(_) => SchedulerPhase::Draining,
        }
    }

    /// Whether a cycle is running.
    pub fn in_progress(&self) -> bool {
        self.cycle.is_some()
    }

    /// The live generation.
    pub fn generation(&self) -> u64 {
        self.shared.generation.current()
    }

    /// Metrics of the last completed cycle.
    pub fn last_cycle(&self) -> Option<&CycleMetrics> {
        self.last.as_ref()
    }

    /// Cycles completed since creation.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Map this scheduler drives.
    pub fn map(&self) -> MapId {
        self.map
    }
}
