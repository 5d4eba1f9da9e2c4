//! Deterministic inputs and logging setup for tests and benches.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessel_core::{Position, SpawnKind, SpawnRecord, ZoneId};

/// `n` positions uniformly inside `[-half_extent, half_extent)²`,
/// reproducible from `seed`.
pub fn seeded_positions(seed: u64, n: usize, half_extent: f32) -> Vec<Position> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Position::xy(
                rng.random_range(-half_extent..half_extent),
                rng.random_range(-half_extent..half_extent),
            )
        })
        .collect()
}

/// A spawn record with the given identity at `position`.
pub fn spawn_record(
    spawn_id: u64,
    kind: SpawnKind,
    template_id: u32,
    zone: ZoneId,
    position: Position,
) -> SpawnRecord {
    SpawnRecord {
        spawn_id,
        kind,
        template_id,
        zone,
        position,
    }
}

/// Route `tracing` output through the test harness. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_reproducible() {
        let a = seeded_positions(7, 32, 100.0);
        let b = seeded_positions(7, 32, 100.0);
        assert_eq!(a, b);
        assert!(a.iter().all(|p| p.x.abs() <= 100.0 && p.y.abs() <= 100.0));
        assert_ne!(a, seeded_positions(8, 32, 100.0));
    }
}
