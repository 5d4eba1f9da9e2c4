//! Cross-partition relay queues for the Tessel partitioning fabric.
//!
//! Gameplay code running one partition's tick cannot touch state owned by
//! another partition. Instead it enqueues a [`RelayEvent`] addressed to the
//! target partition; that partition drains its queues at the start of its
//! next tick.
//!
//! Queues are bounded per (map, partition, kind). What happens on overflow
//! is decided per kind by [`RelayKind::policy`]: latency-sensitive kinds
//! replace their oldest event, everything else drops the new one. Overflow
//! is never an error; it is reported as an [`EnqueueOutcome`], counted, and
//! logged at a bounded rate.
//!
//! [`RelayStore`] holds all queues of one map behind striped locks.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod event;
pub mod kind;
pub mod queue;
pub mod stats;
pub mod store;

pub use event::{
    AssistDistractRelay, AssistRelay, AttackRelay, AuraRelay, CharmRelay, CombatRelay,
    CombatStateRelay, DynObjectRelay, EvadeRelay, GameObjectRelay, LootRelay, MinionRelay,
    MotionAction, MotionRelay, PathRelay, PointRelay, ProcRelay, RelayEnvelope, RelayEvent,
    TauntAction, TauntRelay, ThreatAction, ThreatActionRelay, ThreatRelay, ThreatTargetRelay,
};
pub use kind::{BackpressurePolicy, RelayKind};
pub use queue::{EnqueueOutcome, RelayQueue};
pub use stats::{BackpressureLog, RelayCounters};
pub use store::{RelayStore, MAX_RELAY_BOUNCES};
