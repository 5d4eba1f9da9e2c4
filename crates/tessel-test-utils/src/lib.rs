//! Test doubles for Tessel development.
//!
//! Provides implementations of the collaborator traits from
//! `tessel-core` that make time, metrics, worker scheduling, and spawning
//! observable and deterministic:
//!
//! - [`ManualClock`]: a clock that only moves when told to.
//! - [`RecordingMetrics`]: a metrics sink that keeps every sample.
//! - [`InlinePool`] / [`DeferredPool`]: worker pools that run tasks on the
//!   calling thread, immediately or on demand.
//! - [`MemoryWorldData`] / [`RecordingSpawner`]: in-memory spawn data and
//!   a spawner that records what it was asked to create.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tessel_core::{
    Clock, EntityId, GridCoord, LayerId, MapId, MetricTag, MetricsSink, PartitionTask, PoolError,
    PoolHealth, SpawnError, SpawnKind, SpawnRecord, Spawner, WorkerPool, WorldDataStore,
};

pub use fixtures::{init_test_tracing, seeded_positions, spawn_record};

// ── ManualClock ─────────────────────────────────────────────────

/// Clock driven explicitly by the test.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ── RecordingMetrics ────────────────────────────────────────────

/// One captured metric emission.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub name: &'static str,
    pub value: f64,
    pub counter: bool,
    pub tags: Vec<MetricTag>,
}

impl MetricSample {
    /// Value of tag `key`, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Metrics sink that keeps every sample for inspection.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    samples: Mutex<Vec<MetricSample>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Samples named `name`, in emission order.
    pub fn named(&self, name: &str) -> Vec<MetricSample> {
        self.samples()
            .into_iter()
            .filter(|s| s.name == name)
            .collect()
    }

    /// Sum of all counter deltas named `name`.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.named(name)
            .iter()
            .filter(|s| s.counter)
            .map(|s| s.value as u64)
            .sum()
    }

    pub fn clear(&self) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, sample: MetricSample) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }
}

impl MetricsSink for RecordingMetrics {
    fn value(&self, name: &'static str, value: f64, tags: &[MetricTag]) {
        self.push(MetricSample {
            name,
            value,
            counter: false,
            tags: tags.to_vec(),
        });
    }

    fn counter(&self, name: &'static str, delta: u64, tags: &[MetricTag]) {
        self.push(MetricSample {
            name,
            value: delta as f64,
            counter: true,
            tags: tags.to_vec(),
        });
    }
}

// ── InlinePool ──────────────────────────────────────────────────

/// Pool that runs every task synchronously inside `schedule`.
#[derive(Debug)]
pub struct InlinePool {
    workers: usize,
    executed: AtomicUsize,
}

impl InlinePool {
    /// A pool reporting `workers` workers.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            executed: AtomicUsize::new(0),
        }
    }

    /// Tasks run so far.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

impl Default for InlinePool {
    fn default() -> Self {
        Self::new(4)
    }
}

impl WorkerPool for InlinePool {
    fn schedule(&self, task: PartitionTask) -> Result<(), PoolError> {
        task.run();
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn health(&self) -> PoolHealth {
        PoolHealth {
            workers: self.workers,
            pending: 0,
            active: 0,
        }
    }
}

// ── DeferredPool ────────────────────────────────────────────────

/// Pool that parks tasks until the test runs them.
///
/// Lets a test interleave scheduler calls with task completion, including
/// completing tasks from a superseded cycle.
#[derive(Debug)]
pub struct DeferredPool {
    workers: usize,
    queue: Mutex<VecDeque<PartitionTask>>,
    closed: std::sync::atomic::AtomicBool,
}

impl DeferredPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            queue: Mutex::new(VecDeque::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run the oldest parked task. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        let task = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match task {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }

    /// Run every parked task, including ones queued while running.
    /// Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut n = 0;
        while self.run_next() {
            n += 1;
        }
        n
    }

    /// Take the parked tasks without running them.
    pub fn take_all(&self) -> Vec<PartitionTask> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Refuse all further tasks.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl WorkerPool for DeferredPool {
    fn schedule(&self, task: PartitionTask) -> Result<(), PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown(task));
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
        Ok(())
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn health(&self) -> PoolHealth {
        PoolHealth {
            workers: self.workers,
            pending: self.pending(),
            active: 0,
        }
    }
}

// ── MemoryWorldData ─────────────────────────────────────────────

/// In-memory spawn records keyed by (map, grid cell).
#[derive(Debug, Default)]
pub struct MemoryWorldData {
    cells: HashMap<(MapId, GridCoord), Vec<SpawnRecord>>,
    missing_templates: HashSet<(SpawnKind, u32)>,
}

impl MemoryWorldData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `record` to the grid cell containing its position.
    pub fn add(&mut self, map: MapId, record: SpawnRecord) {
        let cell = record.position.grid();
        self.cells.entry((map, cell)).or_default().push(record);
    }

    /// Make `template_id` unknown.
    pub fn remove_template(&mut self, kind: SpawnKind, template_id: u32) {
        self.missing_templates.insert((kind, template_id));
    }
}

impl WorldDataStore for MemoryWorldData {
    fn spawns_in_cell(&self, map: MapId, cell: GridCoord) -> Vec<SpawnRecord> {
        self.cells.get(&(map, cell)).cloned().unwrap_or_default()
    }

    fn template_exists(&self, kind: SpawnKind, template_id: u32) -> bool {
        !self.missing_templates.contains(&(kind, template_id))
    }
}

// ── RecordingSpawner ────────────────────────────────────────────

/// One spawn request seen by [`RecordingSpawner`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnCall {
    pub map: MapId,
    pub spawn_id: u64,
    pub kind: SpawnKind,
    pub layer: Option<LayerId>,
    pub clone: bool,
    pub entity: Option<EntityId>,
}

/// Spawner that hands out sequential entity ids and records every call.
#[derive(Debug)]
pub struct RecordingSpawner {
    next_id: AtomicU64,
    calls: Mutex<Vec<SpawnCall>>,
    failing: Mutex<HashSet<u64>>,
}

impl Default for RecordingSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSpawner {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1_000_000),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every spawn of `spawn_id` fail.
    pub fn fail_spawn(&self, spawn_id: u64) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spawn_id);
    }

    pub fn calls(&self) -> Vec<SpawnCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Successful spawns only.
    pub fn spawned(&self) -> Vec<SpawnCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.entity.is_some())
            .collect()
    }
}

impl Spawner for RecordingSpawner {
    fn spawn(
        &self,
        map: MapId,
        record: &SpawnRecord,
        layer: Option<LayerId>,
        clone: bool,
    ) -> Result<EntityId, SpawnError> {
        let fails = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&record.spawn_id);
        let entity = (!fails).then(|| EntityId(self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SpawnCall {
                map,
                spawn_id: record.spawn_id,
                kind: record.kind,
                layer,
                clone,
                entity,
            });
        entity.ok_or_else(|| SpawnError::Failed {
            spawn_id: record.spawn_id,
            reason: "spawner configured to fail".into(),
        })
    }
}
