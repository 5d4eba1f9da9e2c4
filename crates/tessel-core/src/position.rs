//! World positions and the fixed world-grid geometry.
//!
//! Every map is a square of [`MAX_NUMBER_OF_GRIDS`] × [`MAX_NUMBER_OF_GRIDS`]
//! grids, each [`SIZE_OF_GRIDS`] world units wide, centred on the origin.
//! Partition layouts are expressed in grid coordinates.

use serde::{Deserialize, Serialize};

/// Number of grids along each axis of a map.
pub const MAX_NUMBER_OF_GRIDS: u32 = 64;

/// Edge length of one grid, in world units.
pub const SIZE_OF_GRIDS: f32 = 533.333_33;

/// Grid index of the map centre along each axis.
pub const CENTER_GRID_ID: u32 = MAX_NUMBER_OF_GRIDS / 2;

/// Half the edge length of a map, in world units.
pub const MAP_HALFSIZE: f32 = SIZE_OF_GRIDS * MAX_NUMBER_OF_GRIDS as f32 / 2.0;

/// A point in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// East-west coordinate.
    pub x: f32,
    /// North-south coordinate.
    pub y: f32,
    /// Height.
    pub z: f32,
}

impl Position {
    /// Build a position from its three coordinates.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Build a ground position (`z = 0`).
    pub fn xy(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Planar squared distance to `other`, ignoring height.
    pub fn distance_sq_2d(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// World-grid cell containing this position.
    pub fn grid(&self) -> GridCoord {
        GridCoord::from_world(self.x, self.y)
    }
}

/// Column/row of a world grid, both in `[0, MAX_NUMBER_OF_GRIDS)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    /// Grid column (x axis).
    pub x: u32,
    /// Grid row (y axis).
    pub y: u32,
}

impl GridCoord {
    /// Grid cell for a world position.
    ///
    /// Positions outside the map are clamped onto the border grids so the
    /// lookup is total. Non-finite coordinates land on grid 0.
    pub fn from_world(x: f32, y: f32) -> Self {
        Self {
            x: axis_grid(x),
            y: axis_grid(y),
        }
    }
}

fn axis_grid(v: f32) -> u32 {
    let g = (f64::from(v) / f64::from(SIZE_OF_GRIDS) + f64::from(CENTER_GRID_ID)).floor();
    if !g.is_finite() || g < 0.0 {
        return 0;
    }
    (g as u32).min(MAX_NUMBER_OF_GRIDS - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn origin_is_centre_grid() {
        assert_eq!(
            GridCoord::from_world(0.0, 0.0),
            GridCoord {
                x: CENTER_GRID_ID,
                y: CENTER_GRID_ID
            }
        );
    }

    #[test]
    fn out_of_map_positions_clamp() {
        let far = GridCoord::from_world(1.0e9, -1.0e9);
        assert_eq!(far.x, MAX_NUMBER_OF_GRIDS - 1);
        assert_eq!(far.y, 0);
        assert_eq!(GridCoord::from_world(f32::NAN, 0.0).x, 0);
    }

    #[test]
    fn one_grid_west_of_centre() {
        let g = GridCoord::from_world(-1.0, 0.0);
        assert_eq!(g.x, CENTER_GRID_ID - 1);
    }

    #[test]
    fn distance_ignores_height() {
        let a = Position::new(0.0, 0.0, 100.0);
        let b = Position::new(3.0, 4.0, -50.0);
        assert_eq!(a.distance_sq_2d(&b), 25.0);
    }

    proptest! {
        #[test]
        fn grid_lookup_is_total_and_monotone(
            x in prop::num::f32::ANY,
            y in prop::num::f32::ANY,
            step in 0.0f32..5_000.0,
        ) {
            let g = GridCoord::from_world(x, y);
            prop_assert!(g.x < MAX_NUMBER_OF_GRIDS);
            prop_assert!(g.y < MAX_NUMBER_OF_GRIDS);
            if x.is_finite() && (x + step).is_finite() {
                prop_assert!(GridCoord::from_world(x + step, y).x >= g.x);
            }
        }

        #[test]
        fn in_map_positions_land_in_their_own_grid(
            x in -MAP_HALFSIZE + 1.0..MAP_HALFSIZE - 1.0,
        ) {
            let g = GridCoord::from_world(x, 0.0);
            let west = (g.x as f32 - CENTER_GRID_ID as f32) * SIZE_OF_GRIDS;
            prop_assert!(west <= x + 0.01);
            prop_assert!(x < west + SIZE_OF_GRIDS + 0.01);
        }
    }
}
