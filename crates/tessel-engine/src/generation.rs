//! Cycle generation counter.
//!
//! Every scheduling cycle of a map stamps a new generation. Partition tasks
//! capture the generation they were scheduled under and only count toward
//! the cycle that is still current when they finish, so a completion
//! arriving after [`cancel`](crate::PartitionScheduler::cancel_cycle) or
//! after a newer cycle began is ignored.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic per-map cycle counter. Starts at 0; the first cycle is 1.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: AtomicU64,
}

// Compile-time assertion: GenerationCounter must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<GenerationCounter>();
};

impl GenerationCounter {
    /// Create a counter at generation 0.
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Start a new generation and return it.
    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The live generation.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Whether `generation` is still the live one.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

/// Completion count tagged with the generation it belongs to.
///
/// The tag (low 32 bits of the generation) and the count share one word,
/// so a completion can only land if the tag still matches at the moment
/// it is added. Re-arming for a new generation zeroes the count in the
/// same store.
#[derive(Debug, Default)]
pub struct CompletionCounter {
    word: AtomicU64,
}

impl CompletionCounter {
    fn tag(generation: u64) -> u64 {
        (generation & 0xFFFF_FFFF) << 32
    }

    /// Start counting for `generation`.
    pub fn arm(&self, generation: u64) {
        self.word.store(Self::tag(generation), Ordering::Release);
    }

    /// Count one completion of `generation`. Returns `false` without
    /// counting when another generation is armed.
    pub fn complete(&self, generation: u64) -> bool {
        let tag = Self::tag(generation);
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                (w & !0xFFFF_FFFF == tag).then_some(w + 1)
            })
            .is_ok()
    }

    /// Completions counted for `generation`; zero if it is not armed.
    pub fn completed(&self, generation: u64) -> u32 {
        let w = self.word.load(Ordering::Acquire);
        if w & !0xFFFF_FFFF == Self::tag(generation) {
            (w & 0xFFFF_FFFF) as u32
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn completions_only_count_for_the_armed_generation() {
        let c = CompletionCounter::default();
        c.arm(1);
        assert!(c.complete(1));
        assert!(c.complete(1));
        assert_eq!(c.completed(1), 2);

        c.arm(2);
        assert!(!c.complete(1));
        assert_eq!(c.completed(2), 0);
        assert_eq!(c.completed(1), 0);
        assert!(c.complete(2));
        assert_eq!(c.completed(2), 1);
    }

    #[test]
    fn starts_at_zero_and_advances() {
        let g = GenerationCounter::new();
        assert_eq!(g.current(), 0);
        assert_eq!(g.advance(), 1);
        assert_eq!(g.advance(), 2);
        assert!(g.is_current(2));
        assert!(!g.is_current(1));
    }

    #[test]
    fn concurrent_advances_are_unique() {
        let g = Arc::new(GenerationCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = Arc::clone(&g);
                std::thread::spawn(move || (0..250).map(|_| g.advance()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1_000);
        assert_eq!(g.current(), 1_000);
    }
}
