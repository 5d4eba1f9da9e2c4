//! All relay queues of one map.
//!
//! Queues are grouped by partition and the partitions are spread over a
//! fixed number of lock stripes (`partition % stripes`), so producers
//! targeting different partitions rarely contend. Each partition is
//! drained by exactly one consumer (its own tick), which only needs the
//! stripe lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use tessel_core::{Clock, EntityId, MapId, PartitionId, Position, RelayConfig};

use crate::event::{
    AssistDistractRelay, AssistRelay, AttackRelay, AuraRelay, CharmRelay, CombatRelay,
    CombatStateRelay, DynObjectRelay, EvadeRelay, GameObjectRelay, LootRelay, MinionRelay,
    MotionRelay, PathRelay, PointRelay, ProcRelay, RelayEnvelope, RelayEvent, TauntAction,
    TauntRelay, ThreatAction, ThreatActionRelay, ThreatRelay, ThreatTargetRelay,
};
use crate::kind::RelayKind;
use crate::queue::{EnqueueOutcome, RelayQueue};
use crate::stats::{BackpressureLog, RelayCounters};

/// How many times one event may be forwarded between partitions before it
/// is discarded.
pub const MAX_RELAY_BOUNCES: u8 = 3;

#[derive(Debug)]
struct PartitionQueues {
    queues: Vec<Option<RelayQueue>>,
    pending: usize,
}

impl PartitionQueues {
    fn new() -> Self {
        Self {
            queues: (0..RelayKind::COUNT).map(|_| None).collect(),
            pending: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Stripe {
    partitions: AHashMap<PartitionId, PartitionQueues>,
}

/// Relay queues for one map.
pub struct RelayStore {
    map: MapId,
    capacity: usize,
    stripes: Box<[Mutex<Stripe>]>,
    partitioned: AtomicBool,
    dropped: [AtomicU64; RelayKind::COUNT],
    replaced: [AtomicU64; RelayKind::COUNT],
    log: Mutex<BackpressureLog>,
    clock: Arc<dyn Clock>,
}

// Compile-time assertion: RelayStore must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<RelayStore>();
};

impl std::fmt::Debug for RelayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStore")
            .field("map", &self.map)
            .field("capacity", &self.capacity)
            .field("stripes", &self.stripes.len())
            .field("partitioned", &self.is_partitioned())
            .finish()
    }
}

impl RelayStore {
    /// Create the store for `map`. It starts unpartitioned: every enqueue
    /// is ignored until [`set_partitioned`](Self::set_partitioned) is called.
    pub fn new(map: MapId, config: &RelayConfig, clock: Arc<dyn Clock>) -> Self {
        let stripes = config.lock_stripes.max(1);
        Self {
            map,
            capacity: config.capacity.max(1),
            stripes: (0..stripes).map(|_| Mutex::new(Stripe::default())).collect(),
            partitioned: AtomicBool::new(false),
            dropped: std::array::from_fn(|_| AtomicU64::new(0)),
            replaced: std::array::from_fn(|_| AtomicU64::new(0)),
            log: Mutex::new(BackpressureLog::new(map, config.log_interval_ms)),
            clock,
        }
    }

    /// Map this store belongs to.
    pub fn map(&self) -> MapId {
        self.map
    }

    /// Per-queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Turn relaying on or off for the map.
    pub fn set_partitioned(&self, partitioned: bool) {
        self.partitioned.store(partitioned, Ordering::Release);
    }

    /// Whether the map currently accepts relays.
    pub fn is_partitioned(&self) -> bool {
        self.partitioned.load(Ordering::Acquire)
    }

    fn stripe(&self, partition: PartitionId) -> MutexGuard<'_, Stripe> {
        let index = partition.0 as usize % self.stripes.len();
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `event` for `partition`'s next tick.
    pub fn enqueue(&self, partition: PartitionId, event: RelayEvent) -> EnqueueOutcome {
        let now = self.clock.now_ms();
        self.push(partition, RelayEnvelope::new(event, now), now)
    }

    /// Forward an already-queued envelope to another partition, e.g. when
    /// its subject moved before the event was applied.
    ///
    /// Returns `None` without queueing once the envelope has been forwarded
    /// [`MAX_RELAY_BOUNCES`] times.
    pub fn bounce(&self, partition: PartitionId, mut envelope: RelayEnvelope) -> Option<EnqueueOutcome> {
        if envelope.bounces >= MAX_RELAY_BOUNCES {
            tracing::debug!(
                target: "map.partition.relay",
                map = %self.map,
                kind = %envelope.kind(),
                subject = %envelope.event.subject(),
                "relay bounce limit reached, discarding"
            );
            return None;
        }
        envelope.bounces += 1;
        Some(self.push(partition, envelope, self.clock.now_ms()))
    }

    fn push(&self, partition: PartitionId, envelope: RelayEnvelope, now_ms: u64) -> EnqueueOutcome {
        if !partition.is_partitioned() || !self.is_partitioned() {
            return EnqueueOutcome::Ignored;
        }
        let kind = envelope.kind();
        let outcome = {
            let mut stripe = self.stripe(partition);
            let slots = stripe
                .partitions
                .entry(partition)
                .or_insert_with(PartitionQueues::new);
            let queue = slots.queues[kind.index()]
                .get_or_insert_with(|| RelayQueue::new(kind, self.capacity));
            let outcome = queue.push(envelope);
            if outcome == EnqueueOutcome::Accepted {
                slots.pending += 1;
            }
            outcome
        };

        match outcome {
            EnqueueOutcome::ReplacedOldest => {
                self.replaced[kind.index()].fetch_add(1, Ordering::Relaxed);
            }
            EnqueueOutcome::DroppedNewest => {
                self.dropped[kind.index()].fetch_add(1, Ordering::Relaxed);
            }
            EnqueueOutcome::Accepted | EnqueueOutcome::Ignored => return outcome,
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(kind, outcome, now_ms);
        outcome
    }

    /// Take every event queued for `partition`, grouped by kind in drain
    /// order and FIFO within a kind.
    ///
    /// Events enqueued while the caller processes the result land in the
    /// queues again and are seen on the next drain.
    pub fn drain(&self, partition: PartitionId) -> Vec<RelayEnvelope> {
        let mut out = Vec::new();
        let mut stripe = self.stripe(partition);
        if let Some(slots) = stripe.partitions.get_mut(&partition) {
            if slots.pending == 0 {
                return out;
            }
            out.reserve(slots.pending);
            for queue in slots.queues.iter_mut().flatten() {
                queue.drain_into(&mut out);
            }
            slots.pending = 0;
        }
        out
    }

    /// Whether `partition` has anything to drain.
    pub fn has_pending(&self, partition: PartitionId) -> bool {
        self.pending_len(partition) > 0
    }

    /// Number of events queued for `partition`.
    pub fn pending_len(&self, partition: PartitionId) -> usize {
        self.stripe(partition)
            .partitions
            .get(&partition)
            .map_or(0, |slots| slots.pending)
    }

    /// Number of `kind` events queued for `partition`.
    pub fn len(&self, partition: PartitionId, kind: RelayKind) -> usize {
        self.stripe(partition)
            .partitions
            .get(&partition)
            .and_then(|slots| slots.queues[kind.index()].as_ref())
            .map_or(0, RelayQueue::len)
    }

    /// Events queued across all partitions.
    pub fn total_pending(&self) -> usize {
        self.stripes
            .iter()
            .map(|s| {
                s.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .partitions
                    .values()
                    .map(|slots| slots.pending)
                    .sum::<usize>()
            })
            .sum()
    }

    /// Cumulative overflow counts for `kind`.
    pub fn counters(&self, kind: RelayKind) -> RelayCounters {
        RelayCounters {
            dropped: self.dropped[kind.index()].load(Ordering::Relaxed),
            replaced: self.replaced[kind.index()].load(Ordering::Relaxed),
        }
    }

    /// Discard queues of partitions outside `1..=count`, e.g. after a
    /// resize. Returns how many events were discarded.
    pub fn retain_partitions(&self, count: u32) -> usize {
        let mut discarded = 0;
        for stripe in self.stripes.iter() {
            let mut stripe = stripe.lock().unwrap_or_else(PoisonError::into_inner);
            stripe.partitions.retain(|id, slots| {
                let keep = id.0 >= 1 && id.0 <= count;
                if !keep {
                    discarded += slots.pending;
                }
                keep
            });
        }
        if discarded > 0 {
            tracing::warn!(
                target: "map.partition.relay",
                map = %self.map,
                count,
                discarded,
                "discarded relays addressed to removed partitions"
            );
        }
        discarded
    }

    /// Discard everything. Returns how many events were discarded.
    pub fn clear(&self) -> usize {
        let mut discarded = 0;
        for stripe in self.stripes.iter() {
            let mut stripe = stripe.lock().unwrap_or_else(PoisonError::into_inner);
            discarded += stripe.partitions.values().map(|s| s.pending).sum::<usize>();
            stripe.partitions.clear();
        }
        discarded
    }

    // ── Typed producers ───────────────────────────────────────────

    /// Add threat from `owner` against `victim`.
    pub fn queue_threat(
        &self,
        partition: PartitionId,
        owner: EntityId,
        victim: EntityId,
        threat: f32,
        school_mask: u32,
        spell_id: u32,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Threat(ThreatRelay {
                owner,
                victim,
                threat,
                school_mask,
                spell_id,
            }),
        )
    }

    /// Clear `owner`'s whole threat list.
    pub fn queue_threat_clear_all(&self, partition: PartitionId, owner: EntityId) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::ThreatAction(ThreatActionRelay {
                owner,
                action: ThreatAction::ClearAll,
            }),
        )
    }

    /// Reset `owner`'s whole threat list.
    pub fn queue_threat_reset_all(&self, partition: PartitionId, owner: EntityId) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::ThreatAction(ThreatActionRelay {
                owner,
                action: ThreatAction::ResetAll,
            }),
        )
    }

    /// Clear one entry of `owner`'s threat list.
    pub fn queue_threat_target_clear(
        &self,
        partition: PartitionId,
        owner: EntityId,
        target: EntityId,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::ThreatTarget(ThreatTargetRelay {
                owner,
                target,
                action: ThreatAction::ClearAll,
            }),
        )
    }

    /// Reset one entry of `owner`'s threat list.
    pub fn queue_threat_target_reset(
        &self,
        partition: PartitionId,
        owner: EntityId,
        target: EntityId,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::ThreatTarget(ThreatTargetRelay {
                owner,
                target,
                action: ThreatAction::ResetAll,
            }),
        )
    }

    /// Taunt applied by `taunter` on `owner`.
    pub fn queue_taunt_apply(
        &self,
        partition: PartitionId,
        owner: EntityId,
        taunter: EntityId,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Taunt(TauntRelay {
                owner,
                taunter,
                action: TauntAction::Apply,
            }),
        )
    }

    /// Taunt by `taunter` on `owner` faded.
    pub fn queue_taunt_fade(
        &self,
        partition: PartitionId,
        owner: EntityId,
        taunter: EntityId,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Taunt(TauntRelay {
                owner,
                taunter,
                action: TauntAction::Fade,
            }),
        )
    }

    /// `owner` enters combat with `victim`.
    pub fn queue_combat(
        &self,
        partition: PartitionId,
        owner: EntityId,
        victim: EntityId,
        initial_aggro: bool,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Combat(CombatRelay {
                owner,
                victim,
                initial_aggro,
            }),
        )
    }

    /// Loot recipient update.
    pub fn queue_loot(
        &self,
        partition: PartitionId,
        creature: EntityId,
        unit: EntityId,
        with_group: bool,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Loot(LootRelay {
                creature,
                unit,
                with_group,
            }),
        )
    }

    /// Dynamic object action.
    pub fn queue_dyn_object(
        &self,
        partition: PartitionId,
        dyn_object: EntityId,
        action: u8,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::DynObject(DynObjectRelay { dyn_object, action }),
        )
    }

    /// Minion bind/unbind.
    pub fn queue_minion(
        &self,
        partition: PartitionId,
        owner: EntityId,
        minion: EntityId,
        apply: bool,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Minion(MinionRelay {
                owner,
                minion,
                apply,
            }),
        )
    }

    /// Charm apply/remove.
    pub fn queue_charm(&self, partition: PartitionId, relay: CharmRelay) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::Charm(relay))
    }

    /// Game object ownership change.
    pub fn queue_game_object(&self, partition: PartitionId, relay: GameObjectRelay) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::GameObject(relay))
    }

    /// Combat state refresh.
    pub fn queue_combat_state(
        &self,
        partition: PartitionId,
        unit: EntityId,
        enemy: EntityId,
        pvp: bool,
        duration_ms: u32,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::CombatState(CombatStateRelay {
                unit,
                enemy,
                pvp,
                duration_ms,
            }),
        )
    }

    /// Start/stop attacking.
    pub fn queue_attack(
        &self,
        partition: PartitionId,
        attacker: EntityId,
        victim: EntityId,
        melee: bool,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Attack(AttackRelay {
                attacker,
                victim,
                melee,
            }),
        )
    }

    /// Evade.
    pub fn queue_evade(&self, partition: PartitionId, unit: EntityId, reason: u8) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::Evade(EvadeRelay { unit, reason }))
    }

    /// Generic movement.
    pub fn queue_motion(&self, partition: PartitionId, relay: MotionRelay) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::Motion(relay))
    }

    /// Proc trigger.
    pub fn queue_proc(&self, partition: PartitionId, relay: ProcRelay) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::Proc(relay))
    }

    /// Aura application or removal.
    pub fn queue_aura(&self, partition: PartitionId, relay: AuraRelay) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::Aura(relay))
    }

    /// Chase/follow path.
    pub fn queue_path(
        &self,
        partition: PartitionId,
        mover: EntityId,
        target: EntityId,
    ) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::Path(PathRelay { mover, target }))
    }

    /// Move to a point.
    pub fn queue_point(&self, partition: PartitionId, relay: PointRelay) -> EnqueueOutcome {
        self.enqueue(partition, RelayEvent::Point(relay))
    }

    /// Move to assist at `destination`.
    pub fn queue_assist(
        &self,
        partition: PartitionId,
        mover: EntityId,
        destination: Position,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::Assist(AssistRelay { mover, destination }),
        )
    }

    /// Distract `mover` for `time_ms`.
    pub fn queue_assist_distract(
        &self,
        partition: PartitionId,
        mover: EntityId,
        time_ms: u32,
    ) -> EnqueueOutcome {
        self.enqueue(
            partition,
            RelayEvent::AssistDistract(AssistDistractRelay { mover, time_ms }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_test_utils::ManualClock;

    fn store(capacity: usize) -> (RelayStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = RelayConfig {
            capacity,
            ..RelayConfig::default()
        };
        let store = RelayStore::new(MapId(0), &config, clock.clone());
        store.set_partitioned(true);
        (store, clock)
    }

    #[test]
    fn unpartitioned_and_zero_are_ignored() {
        let (s, _) = store(8);
        assert_eq!(
            s.queue_combat(PartitionId(0), EntityId(1), EntityId(2), true),
            EnqueueOutcome::Ignored
        );
        s.set_partitioned(false);
        assert_eq!(
            s.queue_combat(PartitionId(1), EntityId(1), EntityId(2), true),
            EnqueueOutcome::Ignored
        );
        assert_eq!(s.total_pending(), 0);
    }

    #[test]
    fn drain_groups_by_kind_in_order() {
        let (s, clock) = store(8);
        let p = PartitionId(2);
        s.queue_taunt_apply(p, EntityId(1), EntityId(2));
        s.queue_combat(p, EntityId(3), EntityId(4), false);
        clock.advance(5);
        s.queue_threat(p, EntityId(5), EntityId(6), 10.0, 1, 0);
        s.queue_combat(p, EntityId(7), EntityId(8), true);

        assert!(s.has_pending(p));
        assert_eq!(s.pending_len(p), 4);
        let kinds: Vec<RelayKind> = s.drain(p).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![RelayKind::Threat, RelayKind::Combat, RelayKind::Combat, RelayKind::Taunt]
        );
        assert!(!s.has_pending(p));
        assert!(s.drain(p).is_empty());
    }

    #[test]
    fn queued_time_comes_from_clock() {
        let (s, clock) = store(8);
        clock.set(42_000);
        s.queue_evade(PartitionId(1), EntityId(1), 3);
        let drained = s.drain(PartitionId(1));
        assert_eq!(drained[0].queued_ms, 42_000);
    }

    #[test]
    fn partitions_are_independent() {
        let (s, _) = store(8);
        s.queue_loot(PartitionId(1), EntityId(1), EntityId(2), false);
        s.queue_loot(PartitionId(17), EntityId(1), EntityId(2), false);
        // 1 and 17 share a stripe but not a queue.
        assert_eq!(s.len(PartitionId(1), RelayKind::Loot), 1);
        assert_eq!(s.len(PartitionId(17), RelayKind::Loot), 1);
        assert_eq!(s.drain(PartitionId(1)).len(), 1);
        assert_eq!(s.pending_len(PartitionId(17)), 1);
    }

    #[test]
    fn overflow_counts_per_kind() {
        let (s, _) = store(2);
        let p = PartitionId(1);
        for _ in 0..3 {
            s.queue_attack(p, EntityId(1), EntityId(2), true);
            s.queue_loot(p, EntityId(1), EntityId(2), true);
        }
        assert_eq!(s.counters(RelayKind::Attack), RelayCounters { dropped: 0, replaced: 1 });
        assert_eq!(s.counters(RelayKind::Loot), RelayCounters { dropped: 1, replaced: 0 });
        assert_eq!(s.pending_len(p), 4);
    }

    #[test]
    fn bounce_is_limited() {
        let (s, _) = store(8);
        s.queue_path(PartitionId(1), EntityId(9), EntityId(10));
        let mut env = s.drain(PartitionId(1)).pop().unwrap();
        for hop in 1..=MAX_RELAY_BOUNCES {
            let target = PartitionId(u32::from(hop) + 1);
            assert_eq!(s.bounce(target, env), Some(EnqueueOutcome::Accepted));
            env = s.drain(target).pop().unwrap();
            assert_eq!(env.bounces, hop);
        }
        assert_eq!(s.bounce(PartitionId(1), env), None);
        assert_eq!(s.total_pending(), 0);
    }

    #[test]
    fn retain_discards_removed_partitions() {
        let (s, _) = store(8);
        for p in 1..=4 {
            s.queue_evade(PartitionId(p), EntityId(1), 0);
        }
        assert_eq!(s.retain_partitions(2), 2);
        assert_eq!(s.total_pending(), 2);
        assert_eq!(s.clear(), 2);
        assert_eq!(s.total_pending(), 0);
    }
}
