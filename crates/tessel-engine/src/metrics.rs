//! Per-cycle timing for the partition scheduler.
//!
//! [`CycleTimings`] is filled concurrently by task completions that match
//! the live generation; when the cycle ends the scheduler folds it into a
//! [`CycleMetrics`] value that stays readable until the next cycle ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tessel_core::TaskTiming;

/// Timing of one completed scheduling cycle.
///
/// Durations measured from task timings are in microseconds; `cycle_ms`
/// is game-clock time from the first poll of the cycle to the poll that
/// saw it complete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    /// Generation of the cycle.
    pub generation: u64,
    /// Partitions updated.
    pub partitions: u32,
    /// In-flight limit the cycle ran under.
    pub max_in_flight: u32,
    /// Scheduler polls the cycle took, the completing one included.
    pub polls: u32,
    /// Game-clock duration of the cycle.
    pub cycle_ms: u64,
    /// Sum of task queue waits.
    pub queue_wait_total_us: u64,
    /// Longest task queue wait.
    pub queue_wait_max_us: u64,
    /// Sum of task run times.
    pub run_total_us: u64,
    /// Longest task run time.
    pub run_max_us: u64,
    /// From the first task start to the last task finish.
    pub busy_window_us: u64,
    /// Whether the cycle produced a slow-cycle warning.
    pub logged_slow: bool,
}

/// Lock-free accumulator of task timings for the live cycle.
#[derive(Debug)]
pub struct CycleTimings {
    origin: Instant,
    queue_wait_total_us: AtomicU64,
    queue_wait_max_us: AtomicU64,
    run_total_us: AtomicU64,
    run_max_us: AtomicU64,
    first_start_us: AtomicU64,
    last_end_us: AtomicU64,
}

impl Default for CycleTimings {
    fn default() -> Self {
        Self::new()
    }
}

/// Totals read out of a [`CycleTimings`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimingTotals {
    /// Sum of queue waits.
    pub queue_wait_total_us: u64,
    /// Longest queue wait.
    pub queue_wait_max_us: u64,
    /// Sum of run times.
    pub run_total_us: u64,
    /// Longest run time.
    pub run_max_us: u64,
    /// First start to last finish; zero if nothing was recorded.
    pub busy_window_us: u64,
}

impl CycleTimings {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            queue_wait_total_us: AtomicU64::new(0),
            queue_wait_max_us: AtomicU64::new(0),
            run_total_us: AtomicU64::new(0),
            run_max_us: AtomicU64::new(0),
            first_start_us: AtomicU64::new(u64::MAX),
            last_end_us: AtomicU64::new(0),
        }
    }

    /// Zero every total.
    pub fn reset(&self) {
        self.queue_wait_total_us.store(0, Ordering::Release);
        self.queue_wait_max_us.store(0, Ordering::Release);
        self.run_total_us.store(0, Ordering::Release);
        self.run_max_us.store(0, Ordering::Release);
        self.first_start_us.store(u64::MAX, Ordering::Release);
        self.last_end_us.store(0, Ordering::Release);
    }

    /// Fold in one finished task.
    pub fn record(&self, timing: &TaskTiming) {
        let wait = timing.queue_wait().as_micros() as u64;
        let run = timing.run_time().as_micros() as u64;
        self.queue_wait_total_us.fetch_add(wait, Ordering::AcqRel);
        self.queue_wait_max_us.fetch_max(wait, Ordering::AcqRel);
        self.run_total_us.fetch_add(run, Ordering::AcqRel);
        self.run_max_us.fetch_max(run, Ordering::AcqRel);
        let start = self.offset_us(timing.started);
        let end = self.offset_us(timing.finished);
        self.first_start_us.fetch_min(start, Ordering::AcqRel);
        self.last_end_us.fetch_max(end, Ordering::AcqRel);
    }

    /// Current totals.
    pub fn totals(&self) -> TimingTotals {
        let first = self.first_start_us.load(Ordering::Acquire);
        let last = self.last_end_us.load(Ordering::Acquire);
        TimingTotals {
            queue_wait_total_us: self.queue_wait_total_us.load(Ordering::Acquire),
            queue_wait_max_us: self.queue_wait_max_us.load(Ordering::Acquire),
            run_total_us: self.run_total_us.load(Ordering::Acquire),
            run_max_us: self.run_max_us.load(Ordering::Acquire),
            busy_window_us: if first == u64::MAX { 0 } else { last.saturating_sub(first) },
        }
    }

    fn offset_us(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_micros() as u64
    }
}
