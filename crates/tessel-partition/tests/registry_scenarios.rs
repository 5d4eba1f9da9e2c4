//! Registry, relocation, and density scenarios driven through the
//! public `PartitionManager` API.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use tessel_core::{
    ConfigHandle, DensityConfig, EntityId, FabricConfig, MapId, PartitionConfig, PartitionId,
    Position, RelocationConfig,
};
use tessel_partition::{
    DensityDecision, PartitionManager, RelocationError, RelocationState, ResizeOutcome,
};
use tessel_test_utils::{init_test_tracing, seeded_positions, ManualClock};

const MAP: MapId = MapId(0);

fn fabric(config: FabricConfig) -> (Arc<PartitionManager>, Arc<ManualClock>) {
    init_test_tracing();
    let clock = Arc::new(ManualClock::new(0));
    let handle = Arc::new(ConfigHandle::new(config).unwrap());
    let mgr = Arc::new(PartitionManager::new(handle, clock.clone()));
    mgr.initialize();
    (mgr, clock)
}

fn default_fabric() -> (Arc<PartitionManager>, Arc<ManualClock>) {
    fabric(FabricConfig {
        partition: PartitionConfig {
            maps: vec![MAP],
            ..PartitionConfig::default()
        },
        ..FabricConfig::default()
    })
}

#[test]
fn lookup_is_stable_under_fixed_layout() {
    let (mgr, _) = default_fabric();
    for p in seeded_positions(11, 2_000, 17_000.0) {
        let first = mgr.partition_for_position(MAP, p.x, p.y);
        assert!((1..=4).contains(&first.0));
        for _ in 0..3 {
            assert_eq!(mgr.partition_for_position(MAP, p.x, p.y), first);
        }
    }
}

#[test]
fn stale_relocation_is_swept_never_stuck() {
    let (mgr, clock) = fabric(FabricConfig {
        partition: PartitionConfig {
            maps: vec![MAP],
            ..PartitionConfig::default()
        },
        relocation: RelocationConfig { timeout_ms: 500 },
        ..FabricConfig::default()
    });
    let e = EntityId(10);
    mgr.begin_relocation(e, MAP, PartitionId(1), PartitionId(2), Position::default())
        .unwrap();
    mgr.lock_relocation(e).unwrap();
    assert_eq!(mgr.relocation_state(e), Some(RelocationState::Locked));

    clock.advance(500);
    assert!(mgr.run_maintenance().relocations_rolled_back.is_empty());

    clock.advance(1);
    let report = mgr.run_maintenance();
    assert_eq!(report.relocations_rolled_back.len(), 1);
    assert_eq!(report.relocations_rolled_back[0].state, RelocationState::RolledBack);
    assert_eq!(mgr.relocation_state(e), None);
    assert_eq!(mgr.commit_relocation(e), Err(RelocationError::NotFound(e)));
    assert_eq!(mgr.persisted_partition(e, MAP), Some(PartitionId(1)));

    mgr.begin_relocation(e, MAP, PartitionId(1), PartitionId(2), Position::default())
        .unwrap();
}

#[test]
fn sustained_density_splits_then_merges() {
    let (mgr, clock) = fabric(FabricConfig {
        partition: PartitionConfig {
            maps: vec![MAP],
            default_count: 2,
            resize_cooldown_ms: 0,
            ..PartitionConfig::default()
        },
        density: DensityConfig {
            split_threshold: 10.0,
            merge_threshold: 1.0,
            sustain_samples: 2,
            evaluate_interval_ms: 1_000,
            ..DensityConfig::default()
        },
        ..FabricConfig::default()
    });

    // Two partitions of 32×64 grids: 2048 grids each.
    for p in [PartitionId(1), PartitionId(2)] {
        mgr.update_partition_stats(MAP, p, 0, 2048 * 20);
    }
    assert!(matches!(mgr.evaluate_partition_density(MAP), DensityDecision::Hold { .. }));
    clock.advance(1_000);
    assert!(matches!(
        mgr.evaluate_partition_density(MAP),
        DensityDecision::Split { to: 3, .. }
    ));
    assert_eq!(mgr.partition_count(MAP), 3);

    // Stats reset with the rebuild: the map is now empty.
    clock.advance(1_000);
    mgr.evaluate_partition_density(MAP);
    clock.advance(1_000);
    assert!(matches!(
        mgr.evaluate_partition_density(MAP),
        DensityDecision::Merge { to: 2, .. }
    ));
    assert_eq!(mgr.partition_count(MAP), 2);
}

#[test]
fn density_resize_respects_cooldown() {
    let (mgr, clock) = fabric(FabricConfig {
        partition: PartitionConfig {
            maps: vec![MAP],
            default_count: 2,
            ..PartitionConfig::default()
        },
        density: DensityConfig {
            merge_threshold: 1.0,
            sustain_samples: 1,
            evaluate_interval_ms: 0,
            ..DensityConfig::default()
        },
        ..FabricConfig::default()
    });
    assert_eq!(
        mgr.resize_map_partitions(MAP, 3),
        Ok(ResizeOutcome::Resized { from: 2, to: 3 })
    );
    clock.advance(10);
    assert!(matches!(
        mgr.evaluate_partition_density(MAP),
        DensityDecision::Merge { to: 2, .. }
    ));
    assert_eq!(mgr.partition_count(MAP), 3);
}

#[test]
fn boundary_sets_under_concurrent_maps() {
    let (mgr, _) = fabric(FabricConfig {
        partition: PartitionConfig {
            maps: (0..8).map(MapId).collect(),
            ..PartitionConfig::default()
        },
        ..FabricConfig::default()
    });
    let handles: Vec<_> = (0..8u32)
        .map(|m| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                for n in 0..200u64 {
                    let pos = Position::xy(n as f32, 0.0);
                    mgr.register_boundary_object(MapId(m), PartitionId(1), EntityId(n + 1), pos);
                }
                for n in (0..200u64).step_by(2) {
                    mgr.unregister_boundary_object(MapId(m), PartitionId(1), EntityId(n + 1));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    for m in 0..8 {
        assert_eq!(mgr.boundary_count(MapId(m), PartitionId(1)), 100);
    }
    let near = mgr.query_boundary_nearby(MapId(3), PartitionId(1), 0.0, 0.0, 10.0);
    assert_eq!(near.len(), 5);
    assert_eq!(
        mgr.cleanup_boundary_objects(MapId(3), |e| e.0 <= 100),
        50
    );
}

#[test]
fn boundary_query_accepts_any_finite_radius() {
    let (mgr, _) = default_fabric();
    let p = PartitionId(1);
    mgr.register_boundary_object(MAP, p, EntityId(1), Position::xy(10.0, 10.0));
    mgr.register_boundary_object(MAP, p, EntityId(2), Position::xy(5_000.0, 5_000.0));

    for radius in [1.0e12, 1.0e20, f32::MAX] {
        let mut near = mgr.query_boundary_nearby(MAP, p, 0.0, 0.0, radius);
        near.sort();
        assert_eq!(near, vec![EntityId(1), EntityId(2)], "radius {radius}");
    }
    assert!(mgr
        .query_boundary_nearby(MAP, p, 0.0, 0.0, f32::INFINITY)
        .is_empty());
}

#[test]
fn handoff_counters_and_visibility() {
    let (mgr, _) = default_fabric();
    mgr.record_combat_handoff(MAP);
    mgr.record_path_handoff(MAP);
    mgr.record_path_handoff(MAP);
    assert_eq!(mgr.consume_combat_handoffs(MAP), 1);
    assert_eq!(mgr.consume_path_handoffs(MAP), 2);
    assert_eq!(mgr.consume_path_handoffs(MAP), 0);

    mgr.notify_visibility_attach(EntityId(1), MAP, PartitionId(2));
    mgr.notify_visibility_attach(EntityId(2), MAP, PartitionId(2));
    mgr.notify_visibility_detach(EntityId(1), MAP, PartitionId(2));
    assert_eq!(mgr.visibility_count(MAP, PartitionId(2)), 1);
}

proptest! {
    #[test]
    fn relocation_protocol_never_double_begins(ops in prop::collection::vec(0u8..5, 1..60)) {
        let (mgr, _) = default_fabric();
        let e = EntityId(5);
        let mut open = false;
        for op in ops {
            match op {
                0 => {
                    let r = mgr.begin_relocation(e, MAP, PartitionId(1), PartitionId(2), Position::default());
                    prop_assert_eq!(r.is_ok(), !open);
                    open = true;
                }
                1 => { let _ = mgr.lock_relocation(e); }
                2 => { let _ = mgr.validate_relocation(e); }
                3 => {
                    let state = mgr.relocation_state(e);
                    let r = mgr.commit_relocation(e);
                    let allowed = matches!(state, Some(RelocationState::Locked | RelocationState::Validated));
                    prop_assert_eq!(r.is_ok(), allowed);
                    if allowed { open = false; }
                }
                _ => {
                    prop_assert_eq!(mgr.rollback_relocation(e).is_ok(), open);
                    open = false;
                }
            }
            prop_assert_eq!(mgr.relocation_state(e).is_some(), open);
        }
    }
}
