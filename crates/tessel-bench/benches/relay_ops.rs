//! Criterion micro-benchmarks for cross-partition relay queues.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessel_bench::BENCH_MAP;
use tessel_core::{EntityId, PartitionId, RelayConfig};
use tessel_relay::RelayStore;
use tessel_test_utils::ManualClock;

fn store() -> RelayStore {
    RelayStore::new(BENCH_MAP, &RelayConfig::default(), Arc::new(ManualClock::new(0)))
}

/// Benchmark: Enqueue 1K combat relays over 4 partitions, then drain them.
fn bench_enqueue_drain_1k(c: &mut Criterion) {
    let relays = store();

    c.bench_function("relay_enqueue_drain_1k", |b| {
        b.iter(|| {
            for i in 0..1_000u64 {
                let p = PartitionId((i % 4) as u32 + 1);
                relays.queue_combat(p, EntityId(i), EntityId(i + 1), i % 7 == 0);
            }
            for p in 1..=4 {
                black_box(relays.drain(PartitionId(p)));
            }
        });
    });
}

/// Benchmark: Mixed threat traffic into one partition, then drain.
fn bench_mixed_kinds_1k(c: &mut Criterion) {
    let relays = store();
    let p = PartitionId(2);

    c.bench_function("relay_mixed_kinds_1k", |b| {
        b.iter(|| {
            for i in 0..1_000u64 {
                match i % 3 {
                    0 => relays.queue_threat(p, EntityId(i), EntityId(i + 1), 12.5, 1, 0),
                    1 => relays.queue_combat(p, EntityId(i), EntityId(i + 1), false),
                    _ => relays.queue_threat_clear_all(p, EntityId(i)),
                };
            }
            black_box(relays.drain(p));
        });
    });
}

criterion_group!(benches, bench_enqueue_drain_1k, bench_mixed_kinds_1k);
criterion_main!(benches);
