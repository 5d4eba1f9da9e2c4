//! Time-boxed runtime diagnostics switch.
//!
//! Operators turn verbose diagnostics on for a bounded window; the switch
//! turns itself off once the window elapses so a forgotten toggle cannot
//! flood the logs indefinitely.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Diagnostics flag with an expiry timestamp.
#[derive(Debug, Default)]
pub struct RuntimeDiagnostics {
    enabled: AtomicBool,
    until_ms: AtomicU64,
}

impl RuntimeDiagnostics {
    /// A disabled switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable diagnostics until `now_ms + window_ms`.
    ///
    /// A `window_ms` of zero enables diagnostics with no expiry.
    pub fn enable(&self, now_ms: u64, window_ms: u64) {
        let until = if window_ms == 0 {
            u64::MAX
        } else {
            now_ms.saturating_add(window_ms)
        };
        self.until_ms.store(until, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
    }

    /// Disable diagnostics immediately.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.until_ms.store(0, Ordering::Release);
    }

    /// Whether diagnostics are active at `now_ms`.
    pub fn is_enabled(&self, now_ms: u64) -> bool {
        self.enabled.load(Ordering::Acquire) && now_ms < self.until_ms.load(Ordering::Acquire)
    }

    /// Milliseconds left in the current window, zero when inactive.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        if !self.enabled.load(Ordering::Acquire) {
            return 0;
        }
        self.until_ms.load(Ordering::Acquire).saturating_sub(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_expires() {
        let d = RuntimeDiagnostics::new();
        assert!(!d.is_enabled(0));
        d.enable(1_000, 500);
        assert!(d.is_enabled(1_000));
        assert!(d.is_enabled(1_499));
        assert!(!d.is_enabled(1_500));
        assert_eq!(d.remaining_ms(1_200), 300);
    }

    #[test]
    fn zero_window_never_expires() {
        let d = RuntimeDiagnostics::new();
        d.enable(10, 0);
        assert!(d.is_enabled(u64::MAX - 1));
        d.disable();
        assert!(!d.is_enabled(11));
        assert_eq!(d.remaining_ms(11), 0);
    }
}
