//! Error types for registry mutation and relocation.

use tessel_core::{EntityId, MapId};
use tessel_space::LayoutError;
use thiserror::Error;

use crate::relocation::RelocationState;

/// Errors from registry mutation (`register`, `resize`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    /// Partitioning is switched off in the configuration.
    #[error("partitioning is disabled")]
    Disabled,
    /// The map has no registered partitions.
    #[error("map {0} is not partitioned")]
    NotPartitioned(MapId),
    /// The map was resized too recently.
    #[error("map {map} resize throttled for another {remaining_ms}ms")]
    Throttled {
        /// Map whose resize was refused.
        map: MapId,
        /// Time until the next resize is allowed.
        remaining_ms: u64,
    },
    /// The requested partition count has no valid layout.
    #[error("map {map}: {source}")]
    Layout {
        /// Map being rebuilt.
        map: MapId,
        /// Layout failure.
        #[source]
        source: LayoutError,
    },
}

/// Protocol violations in the relocation transaction table.
///
/// Every variant leaves the table unchanged. Callers should treat them as
/// "try again later".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelocationError {
    /// The entity already has an open transaction.
    #[error("entity {0} already has a relocation in progress")]
    AlreadyInProgress(EntityId),
    /// The entity has no open transaction.
    #[error("entity {0} has no relocation in progress")]
    NotFound(EntityId),
    /// The transaction is not in a state that allows the operation.
    #[error("cannot {op} relocation of entity {entity} in state {state:?}")]
    InvalidState {
        /// Entity being relocated.
        entity: EntityId,
        /// Current state.
        state: RelocationState,
        /// Attempted operation.
        op: &'static str,
    },
}
