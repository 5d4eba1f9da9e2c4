//! Coarse spatial hash over boundary-adjacent entities.
//!
//! Entities near a partition edge are bucketed into square cells of
//! [`BOUNDARY_CELL_SIZE`] world units. Coordinates are shifted by half the
//! map size and clamped to non-negative before bucketing, so every world
//! position hashes to a well-defined cell. A radius query scans only the
//! cells overlapping the query square and filters by true distance.

use ahash::AHashMap;
use tessel_core::position::MAP_HALFSIZE;
use tessel_core::EntityId;

/// Edge length of one boundary cell, in world units.
pub const BOUNDARY_CELL_SIZE: f32 = 100.0;

type CellKey = u64;

#[derive(Clone, Copy, Debug)]
struct Entry {
    entity: EntityId,
    x: f32,
    y: f32,
}

/// One position change in a batched update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryUpdate {
    /// Entity that moved.
    pub entity: EntityId,
    /// New x coordinate.
    pub x: f32,
    /// New y coordinate.
    pub y: f32,
}

/// Hash grid of boundary entities for one (map, partition).
///
/// Empty cells are removed eagerly so memory tracks the live entry count,
/// not the area ever visited.
#[derive(Clone, Debug, Default)]
pub struct BoundaryGrid {
    cells: AHashMap<CellKey, Vec<Entry>>,
    entity_cells: AHashMap<EntityId, CellKey>,
}

fn axis_cell(v: f32) -> u32 {
    // `as` saturates: NaN and negatives land in cell 0.
    ((v + MAP_HALFSIZE) / BOUNDARY_CELL_SIZE) as u32
}

fn cell_key(cx: u32, cy: u32) -> CellKey {
    (u64::from(cx) << 32) | u64::from(cy)
}

impl BoundaryGrid {
    /// An empty grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entity_cells.len()
    }

    /// Whether no entity is tracked.
    pub fn is_empty(&self) -> bool {
        self.entity_cells.is_empty()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Whether `entity` is tracked.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entity_cells.contains_key(&entity)
    }

    /// Last known position of `entity`.
    pub fn position_of(&self, entity: EntityId) -> Option<(f32, f32)> {
        let key = self.entity_cells.get(&entity)?;
        self.cells
            .get(key)?
            .iter()
            .find(|e| e.entity == entity)
            .map(|e| (e.x, e.y))
    }

    /// Track `entity` at `(x, y)`. An already tracked entity is moved.
    pub fn insert(&mut self, entity: EntityId, x: f32, y: f32) {
        if self.entity_cells.contains_key(&entity) {
            self.update(entity, x, y);
            return;
        }
        let key = cell_key(axis_cell(x), axis_cell(y));
        self.cells.entry(key).or_default().push(Entry { entity, x, y });
        self.entity_cells.insert(entity, key);
    }

    /// Move `entity` to `(x, y)`, inserting it if untracked.
    pub fn update(&mut self, entity: EntityId, x: f32, y: f32) {
        let Some(&old_key) = self.entity_cells.get(&entity) else {
            self.insert(entity, x, y);
            return;
        };
        let new_key = cell_key(axis_cell(x), axis_cell(y));
        if new_key != old_key {
            self.remove(entity);
            self.insert(entity, x, y);
            return;
        }
        if let Some(entry) = self
            .cells
            .get_mut(&old_key)
            .and_then(|cell| cell.iter_mut().find(|e| e.entity == entity))
        {
            entry.x = x;
            entry.y = y;
        }
    }

    /// Stop tracking `entity`. Returns whether it was tracked.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        let Some(key) = self.entity_cells.remove(&entity) else {
            return false;
        };
        if let Some(cell) = self.cells.get_mut(&key) {
            cell.retain(|e| e.entity != entity);
            if cell.is_empty() {
                self.cells.remove(&key);
            }
        }
        true
    }

    /// Apply a tick's worth of position changes.
    pub fn update_batch(&mut self, updates: &[BoundaryUpdate]) {
        for u in updates {
            self.update(u.entity, u.x, u.y);
        }
    }

    /// Remove many entities. Returns how many were tracked.
    pub fn remove_batch(&mut self, entities: &[EntityId]) -> usize {
        entities.iter().filter(|&&e| self.remove(e)).count()
    }

    /// Entities within planar distance `radius` of `(x, y)`, inclusive.
    ///
    /// A negative or non-finite radius matches nothing.
    pub fn query_nearby(&self, x: f32, y: f32, radius: f32) -> Vec<EntityId> {
        let mut out = Vec::new();
        if !radius.is_finite() || radius < 0.0 || self.cells.is_empty() {
            return out;
        }
        let radius_sq = radius * radius;
        let (cx0, cx1) = (axis_cell(x - radius), axis_cell(x + radius));
        let (cy0, cy1) = (axis_cell(y - radius), axis_cell(y + radius));

        // Sparse grids: walking the entries beats probing many empty cells.
        // Huge radii saturate the cell range to the whole u32 axis.
        let width = u64::from(cx1) - u64::from(cx0) + 1;
        let height = u64::from(cy1) - u64::from(cy0) + 1;
        let span = width.saturating_mul(height);
        if span > self.cells.len() as u64 {
            for (&key, cell) in &self.cells {
                let (cx, cy) = ((key >> 32) as u32, key as u32);
                if (cx0..=cx1).contains(&cx) && (cy0..=cy1).contains(&cy) {
                    collect_within(cell, x, y, radius_sq, &mut out);
                }
            }
            return out;
        }

        for cx in cx0..=cx1 {
            for cy in cy0..=cy1 {
                if let Some(cell) = self.cells.get(&cell_key(cx, cy)) {
                    collect_within(cell, x, y, radius_sq, &mut out);
                }
            }
        }
        out
    }

    /// All tracked entities, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entity_cells.keys().copied()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.entity_cells.clear();
    }
}

fn collect_within(cell: &[Entry], x: f32, y: f32, radius_sq: f32, out: &mut Vec<EntityId>) {
    for e in cell {
        let (dx, dy) = (e.x - x, e.y - y);
        if dx * dx + dy * dy <= radius_sq {
            out.push(e.entity);
        }
    }
}

// Compile-time assertion: BoundaryGrid must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<BoundaryGrid>();
};
