//! Worker-pool abstraction consumed by the partition scheduler.
//!
//! The scheduler hands a [`PartitionTask`] to a [`WorkerPool`] and never
//! waits for it. The pool runs `job` on some worker and then calls
//! `on_complete` with the task's timing, even when `job` panicked.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::id::{MapId, PartitionId};

/// Work closure of a partition task.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Completion callback of a partition task.
pub type CompletionFn = Box<dyn FnOnce(TaskTiming) + Send + 'static>;

/// One partition's update for one cycle.
pub struct PartitionTask {
    /// Map being updated.
    pub map: MapId,
    /// Partition being updated.
    pub partition: PartitionId,
    /// When the scheduler created the task.
    pub enqueued: Instant,
    /// The update itself.
    pub job: TaskFn,
    /// Called exactly once after `job` returns or unwinds.
    pub on_complete: CompletionFn,
}

impl PartitionTask {
    /// Build a task stamped with the current instant.
    pub fn new(map: MapId, partition: PartitionId, job: TaskFn, on_complete: CompletionFn) -> Self {
        Self {
            map,
            partition,
            enqueued: Instant::now(),
            job,
            on_complete,
        }
    }

    /// Run the job on the calling thread and report completion.
    ///
    /// Returns `false` if the job panicked. Completion is reported either way.
    pub fn run(self) -> bool {
        let started = Instant::now();
        let ok = std::panic::catch_unwind(std::panic::AssertUnwindSafe(self.job)).is_ok();
        let finished = Instant::now();
        if !ok {
            tracing::error!(
                target: "map.partition",
                map = %self.map,
                partition = %self.partition,
                "partition task panicked"
            );
        }
        (self.on_complete)(TaskTiming {
            enqueued: self.enqueued,
            started,
            finished,
        });
        ok
    }
}

impl fmt::Debug for PartitionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionTask")
            .field("map", &self.map)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// When a task was queued, started, and finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskTiming {
    /// Handed to the pool.
    pub enqueued: Instant,
    /// Picked up by a worker.
    pub started: Instant,
    /// Job returned or unwound.
    pub finished: Instant,
}

impl TaskTiming {
    /// Time spent waiting for a worker.
    pub fn queue_wait(&self) -> Duration {
        self.started.saturating_duration_since(self.enqueued)
    }

    /// Time spent running.
    pub fn run_time(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }
}

/// Point-in-time load of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolHealth {
    /// Worker threads.
    pub workers: usize,
    /// Tasks queued but not started.
    pub pending: usize,
    /// Tasks currently running.
    pub active: usize,
}

/// Errors returned by [`WorkerPool::schedule`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool no longer accepts work. The task is handed back unrun.
    #[error("worker pool is shut down")]
    ShutDown(PartitionTask),
}

/// Executes partition tasks.
pub trait WorkerPool: Send + Sync {
    /// Queue `task` for execution. Must not block on the task itself.
    fn schedule(&self, task: PartitionTask) -> Result<(), PoolError>;

    /// Number of workers.
    fn worker_count(&self) -> usize;

    /// Current load.
    fn health(&self) -> PoolHealth;
}
