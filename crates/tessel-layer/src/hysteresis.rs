//! Warm-up and cool-down gates that keep layer counts from oscillating.

/// A condition must hold for `window_ms` before the gate opens.
///
/// The first [`poll`](Gate::poll) that sees the condition starts the
/// timer; the gate opens once the window has elapsed and then re-arms.
/// [`reset`](Gate::reset) cancels a pending timer when the condition
/// stops holding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Gate {
    requested_ms: Option<u64>,
}

impl Gate {
    /// Whether the gate is open at `now_ms`. A zero window is always open.
    pub fn poll(&mut self, now_ms: u64, window_ms: u64) -> bool {
        if window_ms == 0 {
            return true;
        }
        match self.requested_ms {
            None => {
                self.requested_ms = Some(now_ms);
                false
            }
            Some(start) if now_ms < start.saturating_add(window_ms) => false,
            Some(_) => {
                self.requested_ms = None;
                true
            }
        }
    }

    /// Cancel a running timer. Returns whether one was running.
    pub fn reset(&mut self) -> bool {
        self.requested_ms.take().is_some()
    }

    /// When the running timer started.
    pub fn pending_since(&self) -> Option<u64> {
        self.requested_ms
    }
}

/// Creation and destruction gates of one (map, zone).
#[derive(Clone, Copy, Debug, Default)]
pub struct Hysteresis {
    /// Opens a new layer after sustained capacity pressure.
    pub creation: Gate,
    /// Consolidates sparse layers after they stay sparse.
    pub destruction: Gate,
}
