//! Row/column tiling of a map's world grids into partitions.
//!
//! A layout for `count` partitions uses `cols = floor(sqrt(count))`
//! columns and `rows = ceil(count / cols)` rows. Each layout cell spans
//! `ceil(64 / cols)` × `ceil(64 / rows)` world grids. Cells are numbered
//! row-major; indices past `count - 1` fold into the last partition, so
//! every grid maps to exactly one partition id in `1..=count`.

use smallvec::SmallVec;
use tessel_core::position::{GridCoord, MAX_NUMBER_OF_GRIDS, SIZE_OF_GRIDS};
use tessel_core::PartitionId;

use crate::error::LayoutError;

/// Inclusive world-grid rectangle covered by one layout cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellBounds {
    /// First grid column.
    pub start_x: u32,
    /// Last grid column (inclusive).
    pub end_x: u32,
    /// First grid row.
    pub start_y: u32,
    /// Last grid row (inclusive).
    pub end_y: u32,
}

impl CellBounds {
    /// Whether `g` lies inside the rectangle.
    pub fn contains(&self, g: GridCoord) -> bool {
        (self.start_x..=self.end_x).contains(&g.x) && (self.start_y..=self.end_y).contains(&g.y)
    }
}

/// Cached partition layout for one map.
///
/// Immutable once built. A resize builds a fresh layout rather than
/// mutating this one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridLayout {
    count: u32,
    cols: u32,
    rows: u32,
    cell_width: u32,
    cell_height: u32,
    /// Number of world grids owned by each partition, indexed by `id - 1`.
    areas: Vec<u32>,
}

impl GridLayout {
    /// Largest supported partition count (one partition per world grid).
    pub const MAX_PARTITIONS: u32 = MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_GRIDS;

    /// Build the layout for `count` partitions.
    pub fn new(count: u32) -> Result<Self, LayoutError> {
        if count == 0 {
            return Err(LayoutError::Empty);
        }
        if count > Self::MAX_PARTITIONS {
            return Err(LayoutError::TooManyPartitions {
                count,
                max: Self::MAX_PARTITIONS,
            });
        }

        let cols = ((count as f64).sqrt().floor() as u32).max(1);
        let rows = count.div_ceil(cols);
        let cell_width = MAX_NUMBER_OF_GRIDS.div_ceil(cols);
        let cell_height = MAX_NUMBER_OF_GRIDS.div_ceil(rows);

        let mut layout = Self {
            count,
            cols,
            rows,
            cell_width,
            cell_height,
            areas: vec![0; count as usize],
        };

        let mut areas = vec![0u32; count as usize];
        for y in 0..MAX_NUMBER_OF_GRIDS {
            for x in 0..MAX_NUMBER_OF_GRIDS {
                let index = layout.index_for_grid(GridCoord { x, y });
                areas[index as usize] += 1;
            }
        }
        layout.areas = areas;
        Ok(layout)
    }

    /// Number of partitions.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Layout columns.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Layout rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Width of one layout cell, in world grids.
    pub fn cell_width(&self) -> u32 {
        self.cell_width
    }

    /// Height of one layout cell, in world grids.
    pub fn cell_height(&self) -> u32 {
        self.cell_height
    }

    /// All partition ids of this layout, ascending.
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> {
        (1..=self.count).map(PartitionId)
    }

    /// Whether `id` is a valid partition of this layout.
    pub fn contains(&self, id: PartitionId) -> bool {
        id.0 >= 1 && id.0 <= self.count
    }

    fn cell_for_grid(&self, g: GridCoord) -> (u32, u32) {
        let col = (g.x / self.cell_width).min(self.cols - 1);
        let row = (g.y / self.cell_height).min(self.rows - 1);
        (col, row)
    }

    fn index_for_grid(&self, g: GridCoord) -> u32 {
        let (col, row) = self.cell_for_grid(g);
        (row * self.cols + col).min(self.count - 1)
    }

    /// Partition owning world grid `g`.
    pub fn partition_for_grid(&self, g: GridCoord) -> PartitionId {
        PartitionId(self.index_for_grid(g) + 1)
    }

    /// Partition owning world position `(x, y)`.
    ///
    /// Total and deterministic: positions outside the map clamp onto the
    /// border grids.
    pub fn partition_for_position(&self, x: f32, y: f32) -> PartitionId {
        self.partition_for_grid(GridCoord::from_world(x, y))
    }

    /// Grid rectangle of the layout cell containing `g`.
    pub fn cell_bounds_for_grid(&self, g: GridCoord) -> CellBounds {
        let (col, row) = self.cell_for_grid(g);
        self.bounds_of_cell(col, row)
    }

    fn bounds_of_cell(&self, col: u32, row: u32) -> CellBounds {
        let last = MAX_NUMBER_OF_GRIDS - 1;
        let start_x = (col * self.cell_width).min(last);
        let start_y = (row * self.cell_height).min(last);
        CellBounds {
            start_x,
            end_x: (start_x + self.cell_width - 1).min(last),
            start_y,
            end_y: (start_y + self.cell_height - 1).min(last),
        }
    }

    /// Whether `(x, y)` lies within `overlap` world units of the edge of
    /// its layout cell.
    ///
    /// `overlap` is rounded up to whole grids, minimum one. Layouts with a
    /// single partition have no boundaries.
    pub fn is_near_boundary(&self, x: f32, y: f32, overlap: f32) -> bool {
        if self.count <= 1 {
            return false;
        }
        let overlap_grids = overlap_in_grids(overlap);
        let g = GridCoord::from_world(x, y);
        let b = self.cell_bounds_for_grid(g);

        g.x - b.start_x < overlap_grids
            || b.end_x.saturating_sub(g.x) < overlap_grids
            || g.y - b.start_y < overlap_grids
            || b.end_y.saturating_sub(g.y) < overlap_grids
    }

    /// Partitions whose layout cell touches `id`'s cell, including
    /// diagonals. Empty for invalid ids and single-partition layouts.
    pub fn adjacent_partitions(&self, id: PartitionId) -> SmallVec<[PartitionId; 8]> {
        let mut out = SmallVec::new();
        if self.count <= 1 || !self.contains(id) {
            return out;
        }
        let index = id.0 - 1;
        let row = (index / self.cols) as i64;
        let col = (index % self.cols) as i64;

        for d_row in -1i64..=1 {
            for d_col in -1i64..=1 {
                if d_row == 0 && d_col == 0 {
                    continue;
                }
                let (r, c) = (row + d_row, col + d_col);
                if r < 0 || c < 0 || r >= self.rows as i64 || c >= self.cols as i64 {
                    continue;
                }
                let neighbour = r as u32 * self.cols + c as u32;
                if neighbour < self.count {
                    out.push(PartitionId(neighbour + 1));
                }
            }
        }
        out
    }

    /// Number of world grids owned by `id`, zero for invalid ids.
    ///
    /// Folded indices make the last partition larger than the others and
    /// can leave trailing partitions with no grids at all.
    pub fn area_in_grids(&self, id: PartitionId) -> u32 {
        id.index()
            .and_then(|i| self.areas.get(i).copied())
            .unwrap_or(0)
    }
}

/// Border overlap in world units, rounded up to whole grids (minimum one).
pub fn overlap_in_grids(overlap: f32) -> u32 {
    let grids = (overlap / SIZE_OF_GRIDS).ceil();
    if grids.is_finite() && grids >= 1.0 {
        (grids as u32).min(MAX_NUMBER_OF_GRIDS)
    } else {
        1
    }
}
