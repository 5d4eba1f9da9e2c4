//! Criterion micro-benchmarks for partition layout lookups.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessel_bench::{partition_manager, BENCH_MAP};
use tessel_space::GridLayout;
use tessel_test_utils::seeded_positions;

/// Benchmark: Resolve the owning partition for 10K positions on a 16-way layout.
fn bench_partition_for_position_10k(c: &mut Criterion) {
    let layout = GridLayout::new(16).unwrap();
    let positions = seeded_positions(1, 10_000, 17_000.0);

    c.bench_function("partition_for_position_10k", |b| {
        b.iter(|| {
            for p in &positions {
                black_box(layout.partition_for_position(p.x, p.y));
            }
        });
    });
}

/// Benchmark: Border-band test for 10K positions.
fn bench_is_near_boundary_10k(c: &mut Criterion) {
    let layout = GridLayout::new(16).unwrap();
    let positions = seeded_positions(2, 10_000, 17_000.0);

    c.bench_function("is_near_boundary_10k", |b| {
        b.iter(|| {
            for p in &positions {
                black_box(layout.is_near_boundary(p.x, p.y, 40.0));
            }
        });
    });
}

/// Benchmark: Layout construction for counts seen during density splits.
fn bench_layout_build(c: &mut Criterion) {
    c.bench_function("layout_build_4_to_64", |b| {
        b.iter(|| {
            for count in [4u32, 9, 16, 25, 36, 64] {
                black_box(GridLayout::new(count).unwrap());
            }
        });
    });
}

/// Benchmark: Manager-level lookup, including the config snapshot and registry read.
fn bench_manager_lookup_10k(c: &mut Criterion) {
    let manager = partition_manager(16).unwrap();
    let positions = seeded_positions(3, 10_000, 17_000.0);

    c.bench_function("manager_partition_for_position_10k", |b| {
        b.iter(|| {
            for p in &positions {
                black_box(manager.partition_for_position(BENCH_MAP, p.x, p.y));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_partition_for_position_10k,
    bench_is_near_boundary_10k,
    bench_layout_build,
    bench_manager_lookup_10k
);
criterion_main!(benches);
