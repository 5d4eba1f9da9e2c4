//! Per-map counters of combat and path handoffs, read-and-reset by the
//! map's telemetry.

use std::sync::{Mutex, PoisonError};

use ahash::AHashMap;
use tessel_core::MapId;

#[derive(Clone, Copy, Debug, Default)]
struct Counts {
    combat: u32,
    path: u32,
}

/// Handoff tallies since the last `consume_*` call.
#[derive(Debug, Default)]
pub struct HandoffCounters {
    maps: Mutex<AHashMap<MapId, Counts>>,
}

impl HandoffCounters {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, map: MapId, f: impl FnOnce(&mut Counts) -> R) -> R {
        let mut maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        f(maps.entry(map).or_default())
    }

    /// Count one combat-triggered handoff on `map`.
    pub fn record_combat(&self, map: MapId) {
        self.with(map, |c| c.combat = c.combat.saturating_add(1));
    }

    /// Count one path-triggered handoff on `map`.
    pub fn record_path(&self, map: MapId) {
        self.with(map, |c| c.path = c.path.saturating_add(1));
    }

    /// Combat handoffs since the last call; resets the tally.
    pub fn consume_combat(&self, map: MapId) -> u32 {
        self.with(map, |c| std::mem::take(&mut c.combat))
    }

    /// Path handoffs since the last call; resets the tally.
    pub fn consume_path(&self, map: MapId) -> u32 {
        self.with(map, |c| std::mem::take(&mut c.path))
    }

    /// Forget `map`.
    pub fn clear_map(&self, map: MapId) {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_resets() {
        let h = HandoffCounters::new();
        h.record_combat(MapId(1));
        h.record_combat(MapId(1));
        h.record_path(MapId(1));
        h.record_path(MapId(2));
        assert_eq!(h.consume_combat(MapId(1)), 2);
        assert_eq!(h.consume_combat(MapId(1)), 0);
        assert_eq!(h.consume_path(MapId(1)), 1);
        assert_eq!(h.consume_path(MapId(2)), 1);
    }
}
