//! Population layering for Tessel.
//!
//! A layer is a parallel copy of a zone's population: players in
//! different layers of the same (map, zone) do not see each other, and
//! NPCs and game objects are spawned once per layer. [`LayerManager`]
//! assigns players to layers, tracks which spawned instances belong to
//! which layer, enforces the escalating switch cooldown, and consolidates
//! sparse layers.
//!
//! Player assignments are readable two ways. The authoritative table
//! ([`LayerManager::layer_for_player`]) is behind a read/write lock;
//! [`LayerManager::layer_for_player_fast`] reads a packed atomic mirror
//! that is updated right after the table and may lag it briefly.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod cooldown;
pub mod error;
pub mod hysteresis;
pub mod manager;
pub mod packed;
pub mod rebalance;
pub mod zone;

pub use cooldown::{LayerSwitchCooldown, SWITCH_WINDOW_MS};
pub use error::{LayerError, SwitchDenied};
pub use manager::{
    AssignOutcome, AssignReason, Detached, LayerAssignment, LayerManager, LayerUpdateReport,
    RemovedLayer, SwitchContext,
};
pub use packed::PackedLayer;
pub use rebalance::{ConsolidationReport, RebalanceDecision, RebalancingSnapshot};
