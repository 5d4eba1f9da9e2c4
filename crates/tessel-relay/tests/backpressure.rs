//! End-to-end relay scenarios: delivery, overflow policy, concurrency.

use std::sync::Arc;
use std::thread;

use tessel_core::{EntityId, MapId, PartitionId, RelayConfig};
use tessel_relay::{
    EnqueueOutcome, MotionAction, MotionRelay, RelayCounters, RelayEvent, RelayKind, RelayStore,
};
use tessel_test_utils::ManualClock;

fn store() -> RelayStore {
    let store = RelayStore::new(
        MapId(1),
        &RelayConfig::default(),
        Arc::new(ManualClock::new(0)),
    );
    store.set_partitioned(true);
    store
}

#[test]
fn combat_relay_reaches_its_partition_once() {
    let s = store();
    let (owner, victim) = (EntityId(100), EntityId(200));
    assert_eq!(
        s.queue_combat(PartitionId(3), owner, victim, true),
        EnqueueOutcome::Accepted
    );

    for other in [1, 2, 4] {
        assert!(s.drain(PartitionId(other)).is_empty());
    }
    let drained = s.drain(PartitionId(3));
    assert_eq!(drained.len(), 1);
    match &drained[0].event {
        RelayEvent::Combat(c) => {
            assert_eq!(c.owner, owner);
            assert_eq!(c.victim, victim);
            assert!(c.initial_aggro);
        }
        other => panic!("expected combat relay, got {other:?}"),
    }
    assert!(s.drain(PartitionId(3)).is_empty());
}

#[test]
fn motion_overflow_keeps_newest_1024() {
    let s = store();
    let p = PartitionId(2);
    let mut outcomes = Vec::new();
    for n in 1..=1025u32 {
        let mut m = MotionRelay::new(EntityId(1), MotionAction::Charge);
        m.id = n;
        outcomes.push(s.queue_motion(p, m));
    }
    assert!(outcomes[..1024].iter().all(|o| *o == EnqueueOutcome::Accepted));
    assert_eq!(outcomes[1024], EnqueueOutcome::ReplacedOldest);
    assert_eq!(
        s.counters(RelayKind::Motion),
        RelayCounters {
            dropped: 0,
            replaced: 1
        }
    );

    let ids: Vec<u32> = s
        .drain(p)
        .into_iter()
        .map(|e| match e.event {
            RelayEvent::Motion(m) => m.id,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(ids, (2..=1025).collect::<Vec<_>>());
}

#[test]
fn threat_overflow_drops_newest() {
    let s = store();
    let p = PartitionId(1);
    for n in 0..1025u64 {
        s.queue_threat(p, EntityId(n), EntityId(1), 1.0, 0, 0);
    }
    assert_eq!(
        s.counters(RelayKind::Threat),
        RelayCounters {
            dropped: 1,
            replaced: 0
        }
    );
    let drained = s.drain(p);
    assert_eq!(drained.len(), 1024);
    assert_eq!(drained.last().unwrap().event.subject(), EntityId(1023));
}

#[test]
fn concurrent_producers_one_consumer() {
    let s = Arc::new(store());
    let producers: Vec<_> = (0..8u64)
        .map(|t| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                for n in 0..100u64 {
                    let partition = PartitionId(1 + ((t + n) % 4) as u32);
                    s.queue_loot(partition, EntityId(t * 1_000 + n), EntityId(0), false);
                }
            })
        })
        .collect();
    for h in producers {
        h.join().unwrap();
    }

    let total: usize = (1..=4).map(|p| s.drain(PartitionId(p)).len()).sum();
    assert_eq!(total, 800);
    assert_eq!(s.total_pending(), 0);
}
