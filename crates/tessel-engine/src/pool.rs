//! Fixed-size worker pool for partition tasks.
//!
//! Workers pull [`PartitionTask`]s from an unbounded crossbeam channel and
//! run them to completion. Shutdown closes the channel; workers finish
//! whatever is still queued (so every task still reports completion) and
//! then exit, and the pool joins them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tessel_core::{PartitionTask, PoolError, PoolHealth, SchedulerConfig, WorkerPool};

use crate::error::EngineError;

#[derive(Debug, Default)]
struct PoolCounters {
    pending: AtomicUsize,
    active: AtomicUsize,
}

// ── ShutdownState ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    Running,
    Stopped,
}

/// Report from [`ThreadPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolShutdownReport {
    /// Time spent draining the queue and joining workers.
    pub elapsed_ms: u64,
    /// Workers joined cleanly.
    pub workers_joined: usize,
}

// ── ThreadPool ───────────────────────────────────────────────────

/// Named worker threads fed by a crossbeam channel.
pub struct ThreadPool {
    sender: RwLock<Option<Sender<PartitionTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<ShutdownState>,
    counters: Arc<PoolCounters>,
    workers: usize,
}

// Compile-time assertion: ThreadPool must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ThreadPool>();
};

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers)
            .field("health", &self.health())
            .finish()
    }
}

impl ThreadPool {
    /// Start `workers` threads named `tessel-worker-{i}`.
    pub fn new(workers: usize) -> Result<Self, EngineError> {
        if workers == 0 {
            return Err(EngineError::NoWorkers);
        }
        let (tx, rx) = crossbeam_channel::unbounded::<PartitionTask>();
        let counters = Arc::new(PoolCounters::default());
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let c = Arc::clone(&counters);
            let spawned = thread::Builder::new()
                .name(format!("tessel-worker-{i}"))
                .spawn(move || worker_loop(rx, c));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    drop(tx);
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(EngineError::WorkerSpawn { index: i, source });
                }
            }
        }
        tracing::info!(target: "map.partition", workers, "partition worker pool started");
        Ok(Self {
            sender: RwLock::new(Some(tx)),
            handles: Mutex::new(handles),
            state: Mutex::new(ShutdownState::Running),
            counters,
            workers,
        })
    }

    /// Start a pool sized by [`SchedulerConfig::resolved_worker_count`].
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, EngineError> {
        Self::new(config.resolved_worker_count())
    }

    /// Stop accepting tasks, let queued tasks finish, and join every
    /// worker. Later calls return an empty report.
    pub fn shutdown(&self) -> PoolShutdownReport {
        let start = Instant::now();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == ShutdownState::Stopped {
                return PoolShutdownReport {
                    elapsed_ms: 0,
                    workers_joined: 0,
                };
            }
            *state = ShutdownState::Stopped;
        }

        // Dropping the only sender disconnects the channel once drained.
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut workers_joined = 0;
        for h in handles {
            if h.join().is_ok() {
                workers_joined += 1;
            }
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(target: "map.partition", workers_joined, elapsed_ms, "partition worker pool stopped");
        PoolShutdownReport {
            elapsed_ms,
            workers_joined,
        }
    }

    /// Whether the pool still accepts tasks.
    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) == ShutdownState::Running
    }
}

impl WorkerPool for ThreadPool {
    fn schedule(&self, task: PartitionTask) -> Result<(), PoolError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(PoolError::ShutDown(task));
        };
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        tx.send(task).map_err(|e| {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
            PoolError::ShutDown(e.into_inner())
        })
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn health(&self) -> PoolHealth {
        PoolHealth {
            workers: self.workers,
            pending: self.counters.pending.load(Ordering::Acquire),
            active: self.counters.active.load(Ordering::Acquire),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}

fn worker_loop(rx: Receiver<PartitionTask>, counters: Arc<PoolCounters>) {
    while let Ok(task) = rx.recv() {
        counters.pending.fetch_sub(1, Ordering::AcqRel);
        counters.active.fetch_add(1, Ordering::AcqRel);
        task.run();
        counters.active.fetch_sub(1, Ordering::AcqRel);
    }
}
