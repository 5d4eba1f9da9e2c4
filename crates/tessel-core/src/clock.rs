//! Millisecond clock source consumed by every time-driven component.
//!
//! Overrides, relocation timeouts, cooldowns, throttles, and slow-cycle
//! detection all read time through [`Clock`] so tests can drive them with
//! a manual clock instead of sleeping.

use std::sync::OnceLock;
use std::time::Instant;

/// Source of monotonic game time in milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds. Must never go backwards.
    fn now_ms(&self) -> u64;
}

/// Process-monotonic clock backed by [`Instant`].
///
/// Time zero is the first call to [`now_ms`](Clock::now_ms) anywhere in
/// the process, so all `SystemClock` instances agree with each other.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = EPOCH.get_or_init(Instant::now);
        Instant::now().duration_since(*epoch).as_millis() as u64
    }
}

// Compile-time assertion: SystemClock must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SystemClock>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let mut prev = clock.now_ms();
        for _ in 0..1000 {
            let now = clock.now_ms();
            assert!(now >= prev);
            prev = now;
        }
    }
}
