//! Error types for layout construction.

use thiserror::Error;

/// Errors from building a [`GridLayout`](crate::GridLayout).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// A layout needs at least one partition.
    #[error("partition count must be at least 1")]
    Empty,
    /// More partitions were requested than there are world grids.
    #[error("partition count {count} exceeds the maximum of {max}")]
    TooManyPartitions {
        /// Requested partition count.
        count: u32,
        /// Largest supported count.
        max: u32,
    },
}
