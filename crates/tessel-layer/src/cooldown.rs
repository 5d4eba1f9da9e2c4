//! Escalating per-player layer switch cooldown.
//!
//! Switches inside a rolling one-hour window escalate the wait before the
//! next one:
//!
//! | switches so far | cooldown |
//! |-----------------|----------|
//! | 0               | none     |
//! | 1               | 1 min    |
//! | 2               | 2 min    |
//! | 3 to 5          | 5 min    |
//! | 6 or more       | 10 min   |
//!
//! A switch recorded more than one window after the previous one starts
//! the count over.

use ahash::AHashMap;
use tessel_core::EntityId;

/// Rolling window after which the switch count resets (ms).
pub const SWITCH_WINDOW_MS: u64 = 3_600_000;

const MINUTE_MS: u64 = 60_000;

/// Cooldown imposed after `switches` switches in the current window.
pub fn cooldown_for(switches: u32) -> u64 {
    match switches {
        0 => 0,
        1 => MINUTE_MS,
        2 => 2 * MINUTE_MS,
        3..=5 => 5 * MINUTE_MS,
        _ => 10 * MINUTE_MS,
    }
}

/// Switch history of one player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayerSwitchCooldown {
    /// Time of the most recent switch.
    pub last_switch_ms: u64,
    /// Switches in the current window.
    pub switch_count: u32,
}

impl LayerSwitchCooldown {
    /// Cooldown that applies after the switches recorded so far.
    pub fn cooldown_ms(&self) -> u64 {
        cooldown_for(self.switch_count)
    }

    /// Whether a switch is allowed at `now_ms`.
    pub fn can_switch(&self, now_ms: u64) -> bool {
        self.switch_count == 0
            || now_ms.saturating_sub(self.last_switch_ms) >= self.cooldown_ms()
    }

    /// Time left before [`can_switch`](Self::can_switch) holds.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        if self.switch_count == 0 {
            return 0;
        }
        self.cooldown_ms()
            .saturating_sub(now_ms.saturating_sub(self.last_switch_ms))
    }

    /// Record a switch at `now_ms`.
    pub fn record_switch(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_switch_ms) > SWITCH_WINDOW_MS {
            self.switch_count = 0;
        }
        self.last_switch_ms = now_ms;
        self.switch_count = self.switch_count.saturating_add(1);
    }

    /// Whether more than `window_ms` has passed since the last switch.
    pub fn is_ready(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_switch_ms) > window_ms
    }
}

/// Cooldown state of every player who has switched recently.
#[derive(Debug, Default)]
pub struct CooldownTable {
    entries: AHashMap<EntityId, LayerSwitchCooldown>,
}

impl CooldownTable {
    /// State of `player`; a player who never switched has a default entry.
    pub fn get(&self, player: EntityId) -> LayerSwitchCooldown {
        self.entries.get(&player).copied().unwrap_or_default()
    }

    /// Record a switch by `player`.
    pub fn record(&mut self, player: EntityId, now_ms: u64) {
        self.entries.entry(player).or_default().record_switch(now_ms);
    }

    /// Forget `player`.
    pub fn remove(&mut self, player: EntityId) {
        self.entries.remove(&player);
    }

    /// Drop entries whose window has lapsed. Returns how many were removed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, c| !c.is_ready(now_ms, SWITCH_WINDOW_MS));
        before - self.entries.len()
    }

    /// Tracked players.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no player is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
