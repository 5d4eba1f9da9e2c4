//! Partition registry and cross-partition coordination for Tessel.
//!
//! [`PartitionManager`] owns, per map:
//!
//! - the partition arena and its cached [`GridLayout`](tessel_space::GridLayout),
//! - the map's [`RelayStore`](tessel_relay::RelayStore),
//! - boundary and visibility sets, striped by map id,
//! - partition overrides and persisted ownership,
//! - the relocation transaction table,
//! - density history and the resize throttle,
//! - the boundary-approach pre-cache queue.
//!
//! Registry mutation (`register`, `clear`, `resize`) always rebuilds the
//! layout and boundary index of the affected map in one step.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod boundary;
pub mod density;
pub mod error;
pub mod handoff;
pub mod manager;
pub mod ownership;
pub mod precache;
pub mod registry;
pub mod relocation;
pub mod stripes;

pub use density::{partition_density, DensityDecision, DensityState};
pub use error::{PartitionError, RelocationError};
pub use manager::{MaintenanceReport, PartitionManager, ResizeOutcome};
pub use ownership::OwnershipRecord;
pub use precache::{ApproachOutcome, PrecacheRequest};
pub use registry::{Partition, StatsSnapshot};
pub use relocation::{RelocationState, RelocationTxn};
