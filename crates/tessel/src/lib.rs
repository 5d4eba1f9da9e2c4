//! Tessel: spatial partitioning and population layering for MMO world servers.
//!
//! This is the facade crate that re-exports the public API from all Tessel
//! sub-crates. For most hosts, adding `tessel` as a single dependency is
//! sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tessel::prelude::*;
//!
//! let config = FabricConfig::from_toml_str(
//!     r#"
//!     [partition]
//!     maps = [0]
//!     default_count = 4
//!     "#,
//! )
//! .unwrap();
//! let handle = Arc::new(ConfigHandle::new(config).unwrap());
//! let partitions = PartitionManager::new(handle, Arc::new(SystemClock));
//! assert_eq!(partitions.initialize(), 1);
//!
//! let map = MapId(0);
//! assert_eq!(partitions.partition_count(map), 4);
//! assert_eq!(partitions.partition_for_position(map, -8_000.0, -8_000.0), PartitionId(1));
//! assert_eq!(partitions.partition_for_position(map, 8_000.0, 8_000.0), PartitionId(4));
//!
//! // Cross-partition work goes through the map's relay queues.
//! let relays = partitions.relay_store(map).unwrap();
//! assert!(relays
//!     .queue_combat(PartitionId(4), EntityId(1), EntityId(2), true)
//!     .is_queued());
//! assert_eq!(relays.drain(PartitionId(4)).len(), 1);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tessel-core` | Ids, positions, config, collaborator traits |
//! | [`space`] | `tessel-space` | Grid layouts and the boundary hash grid |
//! | [`relay`] | `tessel-relay` | Relay events, bounded queues, per-map relay store |
//! | [`partition`] | `tessel-partition` | Partition registry, relocation, density, pre-cache |
//! | [`layer`] | `tessel-layer` | Layers, switch cooldowns, rebalancing |
//! | [`engine`] | `tessel-engine` | Worker pool, partition scheduler, spawn loader, `Fabric` |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core ids, configuration, and collaborator traits (`tessel-core`).
///
/// The host implements [`types::Clock`], [`types::MetricsSink`],
/// [`types::WorldDataStore`] and [`types::Spawner`]; the fabric consumes
/// them.
pub use tessel_core as types;

/// Partition layout math and the boundary index (`tessel-space`).
pub use tessel_space as space;

/// Cross-partition relay queues (`tessel-relay`).
///
/// Every relay kind has a typed `queue_*` helper on
/// [`relay::RelayStore`].
pub use tessel_relay as relay;

/// Partition registry and coordination (`tessel-partition`).
pub use tessel_partition as partition;

/// Population layering (`tessel-layer`).
pub use tessel_layer as layer;

/// Scheduling and the fabric service object (`tessel-engine`).
///
/// [`engine::Fabric`] owns the managers; [`engine::MapRuntime`] is what the
/// world tick loop polls.
pub use tessel_engine as engine;

/// Common imports for typical Tessel usage.
///
/// ```rust
/// use tessel::prelude::*;
/// ```
pub mod prelude {
    // Ids and geometry
    pub use tessel_core::{EntityId, GridCoord, LayerId, MapId, PartitionId, Position, ZoneId};

    // Configuration
    pub use tessel_core::{ConfigHandle, FabricConfig};

    // Collaborators
    pub use tessel_core::{
        Clock, MetricTag, MetricsSink, NoopMetrics, SpawnKind, SpawnRecord, Spawner, SystemClock,
        WorkerPool, WorldDataStore,
    };

    // Errors
    pub use tessel_core::{ConfigError, PoolError, SpawnError};
    pub use tessel_layer::{LayerError, SwitchDenied};
    pub use tessel_partition::{PartitionError, RelocationError};

    // Relays
    pub use tessel_relay::{EnqueueOutcome, RelayEnvelope, RelayEvent, RelayKind, RelayStore};

    // Managers
    pub use tessel_layer::{LayerManager, SwitchContext};
    pub use tessel_partition::PartitionManager;

    // Engine
    pub use tessel_engine::{
        Fabric, MapRuntime, ObjectTick, PlayerSample, RelayDisposition, SpawnLoader, ThreadPool,
        TickContext, TickHandler,
    };
}
