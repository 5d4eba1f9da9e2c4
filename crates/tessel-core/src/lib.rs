//! Core types and traits for the Tessel partitioning fabric.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every other crate in the workspace: typed
//! identifiers, world-grid constants, the configuration tree, and the
//! collaborator traits ([`Clock`], [`MetricsSink`], [`WorkerPool`],
//! [`WorldDataStore`], [`Spawner`]) that the fabric consumes from its
//! host server.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod id;
pub mod metrics;
pub mod pool;
pub mod position;
pub mod world;

pub use clock::{Clock, SystemClock};
pub use config::{
    ConfigHandle, DensityConfig, DiagnosticsConfig, FabricConfig, LayerConfig, PartitionConfig,
    MapCapacity, RebalanceConfig, RelayConfig, RelocationConfig, SchedulerConfig, SpawnConfig,
};
pub use diagnostics::RuntimeDiagnostics;
pub use error::ConfigError;
pub use id::{EntityId, LayerId, MapId, PartitionId, ZoneId};
pub use metrics::{MetricTag, MetricsSink, NoopMetrics};
pub use pool::{CompletionFn, PartitionTask, PoolError, PoolHealth, TaskFn, TaskTiming, WorkerPool};
pub use position::{GridCoord, Position};
pub use world::{SpawnError, SpawnKind, SpawnRecord, Spawner, WorldDataStore};
