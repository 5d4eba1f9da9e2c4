//! Bounded FIFO for one (map, partition, kind).
//!
//! [`RelayQueue`] buffers events between the producing partition's tick
//! and the consuming partition's next tick. It enforces its capacity
//! through the kind's [`BackpressurePolicy`] and never grows past it.

use std::collections::VecDeque;

use crate::event::RelayEnvelope;
use crate::kind::{BackpressurePolicy, RelayKind};

/// Result of pushing one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued; nothing was lost.
    Accepted,
    /// Queued after evicting the oldest event.
    ReplacedOldest,
    /// The queue was full and the new event was discarded.
    DroppedNewest,
    /// Addressed to an unpartitioned map or partition 0; discarded.
    Ignored,
}

impl EnqueueOutcome {
    /// Whether the new event is now in a queue.
    pub fn is_queued(self) -> bool {
        matches!(self, EnqueueOutcome::Accepted | EnqueueOutcome::ReplacedOldest)
    }
}

/// Bounded relay queue for a single kind.
#[derive(Debug)]
pub struct RelayQueue {
    queue: VecDeque<RelayEnvelope>,
    capacity: usize,
    kind: RelayKind,
}

impl RelayQueue {
    /// Create an empty queue for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(kind: RelayKind, capacity: usize) -> Self {
        assert!(capacity > 0, "RelayQueue capacity must be at least 1");
        Self {
            queue: VecDeque::new(),
            capacity,
            kind,
        }
    }

    /// Kind this queue holds.
    pub fn kind(&self) -> RelayKind {
        self.kind
    }

    /// Push `envelope`, applying the kind's overflow policy when full.
    pub fn push(&mut self, envelope: RelayEnvelope) -> EnqueueOutcome {
        debug_assert_eq!(envelope.kind(), self.kind);
        if self.queue.len() < self.capacity {
            self.queue.push_back(envelope);
            return EnqueueOutcome::Accepted;
        }
        match self.kind.policy() {
            BackpressurePolicy::ReplaceOldest => {
                self.queue.pop_front();
                self.queue.push_back(envelope);
                EnqueueOutcome::ReplacedOldest
            }
            BackpressurePolicy::DropNewest => EnqueueOutcome::DroppedNewest,
        }
    }

    /// Move every queued event, oldest first, onto the end of `out`.
    pub fn drain_into(&mut self, out: &mut Vec<RelayEnvelope>) {
        out.extend(self.queue.drain(..));
    }

    /// Number of events buffered.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of events this queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest buffered event.
    pub fn front(&self) -> Option<&RelayEnvelope> {
        self.queue.front()
    }

    /// Discard all buffered events, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}
