//! Partition lookup and boundary queries against seeded random workloads.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessel_core::position::MAP_HALFSIZE;
use tessel_core::{EntityId, PartitionId};
use tessel_space::{BoundaryGrid, BoundaryUpdate, GridLayout};

#[test]
fn lookup_is_stable_across_repeated_calls() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x7e55e1);
    for count in [1u32, 2, 3, 4, 7, 9, 16, 25, 64] {
        let layout = GridLayout::new(count).unwrap();
        for _ in 0..2_000 {
            let x = rng.random_range(-MAP_HALFSIZE..MAP_HALFSIZE);
            let y = rng.random_range(-MAP_HALFSIZE..MAP_HALFSIZE);
            let first = layout.partition_for_position(x, y);
            for _ in 0..3 {
                assert_eq!(layout.partition_for_position(x, y), first);
            }
            assert!(first.0 >= 1 && first.0 <= count);
        }
    }
}

#[test]
fn every_partition_of_a_square_layout_is_reachable() {
    let layout = GridLayout::new(16).unwrap();
    let mut seen = [false; 16];
    let step = MAP_HALFSIZE / 32.0;
    let mut y = -MAP_HALFSIZE + 1.0;
    while y < MAP_HALFSIZE {
        let mut x = -MAP_HALFSIZE + 1.0;
        while x < MAP_HALFSIZE {
            let p = layout.partition_for_position(x, y);
            seen[(p.0 - 1) as usize] = true;
            x += step;
        }
        y += step;
    }
    assert!(seen.iter().all(|s| *s));
}

#[test]
fn boundary_positions_neighbour_their_other_side() {
    let layout = GridLayout::new(4).unwrap();
    // Just west and east of the vertical centre line.
    let west = layout.partition_for_position(-1.0, -100.0);
    let east = layout.partition_for_position(1.0, -100.0);
    assert_ne!(west, east);
    assert!(layout.is_near_boundary(-1.0, -100.0, 40.0));
    assert!(layout.adjacent_partitions(west).contains(&east));
    assert_eq!(layout.partition_for_position(-1.0, -100.0), PartitionId(1));
}

#[test]
fn boundary_grid_survives_a_tick_of_churn() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut grid = BoundaryGrid::new();
    let mut positions = Vec::new();
    for id in 1..=500u64 {
        let (x, y) = (rng.random_range(-3_000.0..3_000.0), rng.random_range(-3_000.0..3_000.0));
        grid.insert(EntityId(id), x, y);
        positions.push((EntityId(id), x, y));
    }

    let updates: Vec<BoundaryUpdate> = positions
        .iter()
        .map(|&(entity, x, y)| BoundaryUpdate {
            entity,
            x: x + rng.random_range(-50.0..50.0),
            y: y + rng.random_range(-50.0..50.0),
        })
        .collect();
    grid.update_batch(&updates);
    assert_eq!(grid.len(), 500);

    let gone: Vec<EntityId> = (1..=250u64).map(EntityId).collect();
    assert_eq!(grid.remove_batch(&gone), 250);

    for u in &updates[250..] {
        let hits = grid.query_nearby(u.x, u.y, 0.0);
        assert!(hits.contains(&u.entity));
    }
    for u in &updates[..250] {
        assert!(!grid.contains(u.entity));
    }
}
