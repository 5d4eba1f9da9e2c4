//! Switching, rebalancing, and concurrency scenarios driven through the
//! public `LayerManager` API.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use tessel_core::{
    Clock, ConfigHandle, EntityId, FabricConfig, LayerConfig, LayerId, MapId, NoopMetrics,
    RebalanceConfig, ZoneId,
};
use tessel_layer::{
    LayerError, LayerManager, RebalanceDecision, RebalancingSnapshot, SwitchContext, SwitchDenied,
};
use tessel_test_utils::{init_test_tracing, ManualClock};

const MAP: MapId = MapId(0);
const ZONE: ZoneId = ZoneId(40);
const MINUTE: u64 = 60_000;

fn manager(layer: LayerConfig, rebalance: RebalanceConfig) -> (Arc<LayerManager>, Arc<ManualClock>) {
    init_test_tracing();
    let clock = Arc::new(ManualClock::new(1_000));
    let handle = Arc::new(
        ConfigHandle::new(FabricConfig {
            layer,
            rebalance,
            ..FabricConfig::default()
        })
        .unwrap(),
    );
    (
        Arc::new(LayerManager::new(handle, clock.clone(), Arc::new(NoopMetrics))),
        clock,
    )
}

fn layers(capacity: u32, max_layers: u32) -> LayerConfig {
    LayerConfig {
        capacity,
        max_layers,
        ..LayerConfig::default()
    }
}

#[test]
fn switch_cooldown_escalates_and_resets() {
    let (m, clock) = manager(layers(1, 4), RebalanceConfig::default());
    let me = EntityId(1);
    m.auto_assign_player(MAP, ZONE, me).unwrap();
    m.auto_assign_player(MAP, ZONE, EntityId(2)).unwrap();
    let ok = SwitchContext::default();
    let mut target = LayerId(1);
    let mut flip = || {
        let r = m.switch_player_to_layer(me, target, ok);
        if r.is_ok() {
            target = if target == LayerId(1) { LayerId(0) } else { LayerId(1) };
        }
        r.is_ok()
    };

    // First switch is immediate.
    assert!(flip());

    // Second needs a minute.
    clock.advance(MINUTE - 1);
    assert!(!flip());
    clock.advance(1);
    assert!(flip());

    clock.advance(2 * MINUTE);
    assert!(flip());
    clock.advance(5 * MINUTE);
    assert!(flip());

    // Fifth needs five minutes.
    clock.advance(5 * MINUTE - 1);
    assert_eq!(
        m.can_switch_layer(me, ok),
        Err(SwitchDenied::Cooldown { remaining_ms: 1 })
    );
    assert!(!flip());
    clock.advance(1);
    assert!(flip());

    // After 61 idle minutes the next switch is immediate again.
    clock.advance(61 * MINUTE);
    assert!(flip());
    assert_eq!(m.switch_cooldown_remaining_ms(me), MINUTE);
}

#[test]
fn dead_players_cannot_switch() {
    let (m, _) = manager(layers(1, 4), RebalanceConfig::default());
    m.auto_assign_player(MAP, ZONE, EntityId(1)).unwrap();
    m.auto_assign_player(MAP, ZONE, EntityId(2)).unwrap();
    assert_eq!(
        m.switch_player_to_layer(EntityId(1), LayerId(1), SwitchContext { in_combat: false, dead: true }),
        Err(LayerError::Switch(SwitchDenied::Dead))
    );
    assert_eq!(m.switch_cooldown_remaining_ms(EntityId(1)), 0);
}

#[test]
fn update_drains_sparse_layer_in_batches() {
    let (m, clock) = manager(
        layers(10, 4),
        RebalanceConfig {
            check_interval_ms: 1_000,
            min_players_per_layer: 5,
            imbalance_threshold: 0.3,
            migration_batch_size: 2,
            ..RebalanceConfig::default()
        },
    );
    for p in 1..=13 {
        m.auto_assign_player(MAP, ZONE, EntityId(p)).unwrap();
    }
    assert_eq!(m.layer_player_counts(MAP, ZONE), vec![(LayerId(0), 10), (LayerId(1), 3)]);
    assert!(matches!(
        m.evaluate_layer_rebalancing(MAP, ZONE),
        RebalanceDecision::NoTarget { .. }
    ));

    for p in 1..=4 {
        m.force_remove_player(EntityId(p));
    }
    let now = clock.now_ms();
    let report = m.update(now);
    assert_eq!(report.zones_evaluated, 1);
    assert_eq!(report.consolidations.len(), 1);
    assert_eq!(report.consolidations[0].migrated, vec![EntityId(11), EntityId(12)]);
    assert!(report.consolidations[0].removed.is_none());

    assert_eq!(m.update(now + 500).zones_evaluated, 0);

    let report = m.update(now + 1_000);
    let pass = &report.consolidations[0];
    assert_eq!(pass.migrated, vec![EntityId(13)]);
    assert_eq!(pass.removed.as_ref().map(|r| r.layer), Some(LayerId(1)));
    assert_eq!(m.active_layer_ids(MAP, ZONE), vec![LayerId(0)]);
    assert_eq!(m.layer_for_player_fast(EntityId(13)).unwrap().layer, LayerId(0));
    assert_eq!(
        m.rebalancing_metrics(),
        RebalancingSnapshot {
            total_rebalances: 2,
            players_migrated: 3,
            layers_consolidated: 1,
        }
    );
}

#[test]
fn destruction_cooldown_defers_consolidation() {
    let (m, clock) = manager(
        LayerConfig {
            destruction_cooldown_ms: 5_000,
            ..layers(2, 4)
        },
        RebalanceConfig {
            min_players_per_layer: 2,
            ..RebalanceConfig::default()
        },
    );
    for p in 1..=3 {
        m.auto_assign_player(MAP, ZONE, EntityId(p)).unwrap();
    }
    m.force_remove_player(EntityId(1));
    // Layer 0 has one player, layer 1 has one: balanced.
    assert!(matches!(
        m.evaluate_layer_rebalancing(MAP, ZONE),
        RebalanceDecision::Balanced { .. }
    ));

    for p in [1, 4, 5] {
        m.auto_assign_player(MAP, ZONE, EntityId(p)).unwrap();
    }
    assert_eq!(m.layer_for_player(EntityId(5)).unwrap().layer, LayerId(2));
    m.force_remove_player(EntityId(2));
    assert_eq!(
        m.layer_player_counts(MAP, ZONE),
        vec![(LayerId(0), 1), (LayerId(1), 2), (LayerId(2), 1)]
    );
    assert!(matches!(
        m.evaluate_layer_rebalancing(MAP, ZONE),
        RebalanceDecision::Deferred { .. }
    ));
    clock.advance(4_999);
    assert!(matches!(
        m.evaluate_layer_rebalancing(MAP, ZONE),
        RebalanceDecision::Deferred { .. }
    ));
    clock.advance(1);
    assert_eq!(
        m.evaluate_layer_rebalancing(MAP, ZONE),
        RebalanceDecision::Consolidate {
            cv: cv_of(&[1, 2, 1]),
            source: LayerId(2),
            target: LayerId(0),
        }
    );
}

fn cv_of(counts: &[u32]) -> f32 {
    tessel_layer::rebalance::coefficient_of_variation(counts)
}

#[test]
fn concurrent_assignment_keeps_mirror_consistent() {
    let (m, _) = manager(layers(5, 4), RebalanceConfig::default());
    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for n in 0..25u64 {
                    let p = EntityId(t * 100 + n + 1);
                    m.auto_assign_player(MAP, ZONE, p).unwrap();
                    let _ = m.layer_for_player_fast(p);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let counts = m.layer_player_counts(MAP, ZONE);
    assert_eq!(counts.len(), 4);
    assert_eq!(counts.iter().map(|&(_, c)| c).sum::<u32>(), 200);
    for t in 0..8u64 {
        for n in 0..25u64 {
            let p = EntityId(t * 100 + n + 1);
            assert_eq!(m.layer_for_player_fast(p), m.layer_for_player(p));
        }
    }
}

#[test]
fn contended_writes_leave_mirror_matching_table() {
    let (m, _) = manager(layers(50, 4), RebalanceConfig::default());
    let opened: Vec<LayerId> = (0..3).map(|_| m.create_layer(MAP, ZONE).unwrap()).collect();
    // One resident per opened layer keeps it from being reclaimed when empty.
    for (i, &layer) in opened.iter().enumerate() {
        m.assign_player_to_layer(MAP, ZONE, EntityId(100 + i as u64), layer).unwrap();
    }
    let targets = [LayerId::BASE, opened[0], opened[1], opened[2]];
    let players: Vec<EntityId> = (1..=6).map(EntityId).collect();

    for round in 0..200u64 {
        let handles: Vec<_> = (0..4usize)
            .map(|t| {
                let m = Arc::clone(&m);
                let players = players.clone();
                thread::spawn(move || {
                    for (i, &p) in players.iter().enumerate() {
                        if (round as usize + i + t) % 5 == 0 {
                            m.force_remove_player(p);
                        } else {
                            let layer = targets[(t + i) % targets.len()];
                            m.assign_player_to_layer(MAP, ZONE, p, layer).unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for &p in &players {
            assert_eq!(m.layer_for_player_fast(p), m.layer_for_player(p), "round {round}, {p}");
        }
    }
}

#[derive(Clone, Debug)]
enum Op {
    Assign(u64, u32),
    Remove(u64),
    Cleanup(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u64..30, 0u32..3).prop_map(|(p, z)| Op::Assign(p, z)),
        2 => (1u64..30).prop_map(Op::Remove),
        1 => (0u32..3).prop_map(Op::Cleanup),
    ]
}

proptest! {
    #[test]
    fn membership_stays_consistent(ops in prop::collection::vec(op(), 1..120)) {
        let (m, _) = manager(layers(3, 3), RebalanceConfig::default());
        for op in ops {
            match op {
                Op::Assign(p, z) => { m.auto_assign_player(MAP, ZoneId(z), EntityId(p)).unwrap(); }
                Op::Remove(p) => { m.force_remove_player(EntityId(p)); }
                Op::Cleanup(z) => { m.cleanup_empty_layers(MAP, ZoneId(z)); }
            }
        }
        let mut total = 0;
        for z in 0..3 {
            let zone = ZoneId(z);
            prop_assert!(m.layer_count(MAP, zone) <= 3);
            let counts = m.layer_player_counts(MAP, zone);
            prop_assert_eq!(counts[0].0, LayerId::BASE);
            total += counts.iter().map(|&(_, c)| c as usize).sum::<usize>();
        }
        prop_assert_eq!(total, m.assigned_players());
        for p in 1..30 {
            let a = m.layer_for_player(EntityId(p));
            prop_assert_eq!(m.layer_for_player_fast(EntityId(p)), a);
            if let Some(a) = a {
                prop_assert!(m.active_layer_ids(a.map, a.zone).contains(&a.layer));
            }
        }
    }
}
