//! Parallel partition tick scheduling for Tessel.
//!
//! [`Fabric`] owns the partition and layer managers and one [`MapRuntime`]
//! per loaded map. The world tick loop calls
//! [`MapRuntime::schedule_partition_updates`] once per tick; the runtime
//! buckets the map's players by partition, hands one [`PartitionUpdate`]
//! per partition to the [`WorkerPool`](tessel_core::WorkerPool), and
//! reports when every partition of the cycle has finished.
//!
//! Gameplay is supplied by the host through [`TickHandler`]. Static spawns
//! are instantiated per layer by [`SpawnLoader`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buckets;
pub mod error;
pub mod fabric;
pub mod generation;
pub mod handler;
pub mod metrics;
pub mod pool;
pub mod runtime;
pub mod scheduler;
pub mod spawn;
pub mod update;

pub use buckets::{BucketSet, PlayerBuckets};
pub use error::EngineError;
pub use fabric::{Fabric, FabricMaintenance};
pub use generation::{CompletionCounter, GenerationCounter};
pub use handler::{ObjectTick, PlayerSample, RelayDisposition, TickContext, TickHandler};
pub use metrics::{CycleMetrics, CycleTimings, TimingTotals};
pub use pool::{PoolShutdownReport, ThreadPool};
pub use runtime::MapRuntime;
pub use scheduler::{adaptive_in_flight_limit, PartitionScheduler, SchedulerPhase};
pub use spawn::{CloneDiagnostics, CloneStat, GridLoad, SpawnLoader, SpawnedInstance};
pub use update::{PartitionReport, PartitionUpdate, PhaseTimings, UpdateEnv};
