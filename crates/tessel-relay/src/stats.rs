//! Backpressure accounting and rate-limited reporting.

use std::fmt::Write as _;

use tessel_core::MapId;

use crate::kind::RelayKind;
use crate::queue::EnqueueOutcome;

/// Overflow counts for one relay kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayCounters {
    /// Events discarded because their queue was full.
    pub dropped: u64,
    /// Events evicted to make room for a newer one.
    pub replaced: u64,
}

impl RelayCounters {
    fn is_zero(&self) -> bool {
        self.dropped == 0 && self.replaced == 0
    }
}

/// Aggregates drops and replacements for one map and emits at most one
/// warning per interval summarising every kind seen since the last one.
#[derive(Debug)]
pub struct BackpressureLog {
    map: MapId,
    interval_ms: u64,
    pending: [RelayCounters; RelayKind::COUNT],
    last_emit_ms: Option<u64>,
}

impl BackpressureLog {
    /// A log for `map` emitting at most once per `interval_ms`.
    pub fn new(map: MapId, interval_ms: u64) -> Self {
        Self {
            map,
            interval_ms,
            pending: [RelayCounters::default(); RelayKind::COUNT],
            last_emit_ms: None,
        }
    }

    /// Account one enqueue outcome. Returns `true` if a warning was emitted.
    pub fn record(&mut self, kind: RelayKind, outcome: EnqueueOutcome, now_ms: u64) -> bool {
        let slot = &mut self.pending[kind.index()];
        match outcome {
            EnqueueOutcome::DroppedNewest => slot.dropped += 1,
            EnqueueOutcome::ReplacedOldest => slot.replaced += 1,
            EnqueueOutcome::Accepted | EnqueueOutcome::Ignored => return false,
        }
        let due = match self.last_emit_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        if due {
            self.emit(now_ms);
        }
        due
    }

    /// Counts accumulated since the last emitted warning.
    pub fn pending(&self, kind: RelayKind) -> RelayCounters {
        self.pending[kind.index()]
    }

    fn emit(&mut self, now_ms: u64) {
        let mut summary = String::new();
        for kind in RelayKind::ALL {
            let c = &mut self.pending[kind.index()];
            if c.is_zero() {
                continue;
            }
            if !summary.is_empty() {
                summary.push_str(", ");
            }
            let _ = write!(summary, "{kind}: dropped={} replaced={}", c.dropped, c.replaced);
            *c = RelayCounters::default();
        }
        tracing::warn!(
            target: "map.partition.relay",
            map = %self.map,
            interval_ms = self.interval_ms,
            "relay queue backpressure: {summary}"
        );
        self.last_emit_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_overflow_emits_then_rate_limits() {
        let mut log = BackpressureLog::new(MapId(0), 5_000);
        assert!(log.record(RelayKind::Motion, EnqueueOutcome::ReplacedOldest, 100));
        assert_eq!(log.pending(RelayKind::Motion), RelayCounters::default());

        assert!(!log.record(RelayKind::Motion, EnqueueOutcome::ReplacedOldest, 200));
        assert!(!log.record(RelayKind::Loot, EnqueueOutcome::DroppedNewest, 4_000));
        assert_eq!(log.pending(RelayKind::Motion).replaced, 1);
        assert_eq!(log.pending(RelayKind::Loot).dropped, 1);

        assert!(log.record(RelayKind::Loot, EnqueueOutcome::DroppedNewest, 5_100));
        assert_eq!(log.pending(RelayKind::Loot), RelayCounters::default());
        assert_eq!(log.pending(RelayKind::Motion), RelayCounters::default());
    }

    #[test]
    fn accepted_is_not_counted() {
        let mut log = BackpressureLog::new(MapId(1), 5_000);
        assert!(!log.record(RelayKind::Threat, EnqueueOutcome::Accepted, 0));
        assert!(!log.record(RelayKind::Threat, EnqueueOutcome::Ignored, 0));
        assert_eq!(log.pending(RelayKind::Threat), RelayCounters::default());
    }
}
