//! Spatial structures for the Tessel partitioning fabric.
//!
//! Two pieces live here:
//!
//! - [`GridLayout`]: the row/column tiling of a map's 64×64 world grids
//!   into partitions. Owns partition lookup, the near-boundary test, and
//!   8-neighbour adjacency.
//! - [`BoundaryGrid`]: a coarse hash grid over boundary-adjacent entities
//!   answering exact radius queries by scanning only nearby cells.
//!
//! Both are plain single-threaded data structures; the partition manager
//! wraps them in its own locks.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod boundary;
pub mod error;
pub mod layout;

pub use boundary::{BoundaryGrid, BoundaryUpdate, BOUNDARY_CELL_SIZE};
pub use error::LayoutError;
pub use layout::{CellBounds, GridLayout};
