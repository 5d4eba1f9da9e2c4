//! Criterion micro-benchmarks for player layer lookups.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessel_bench::{layer_manager, BENCH_MAP};
use tessel_core::{EntityId, ZoneId};

const ZONE: ZoneId = ZoneId(3_524);

/// Benchmark: Authoritative versus packed-mirror lookups for 2K assigned players.
fn bench_player_lookup_2k(c: &mut Criterion) {
    let layers = layer_manager().unwrap();
    for i in 1..=2_000u64 {
        layers.auto_assign_player(BENCH_MAP, ZONE, EntityId(i)).unwrap();
    }

    c.bench_function("layer_for_player_2k", |b| {
        b.iter(|| {
            for i in 1..=2_000u64 {
                black_box(layers.layer_for_player(EntityId(i)));
            }
        });
    });

    c.bench_function("layer_for_player_fast_2k", |b| {
        b.iter(|| {
            for i in 1..=2_000u64 {
                black_box(layers.layer_for_player_fast(EntityId(i)));
            }
        });
    });
}

criterion_group!(benches, bench_player_lookup_2k);
criterion_main!(benches);
