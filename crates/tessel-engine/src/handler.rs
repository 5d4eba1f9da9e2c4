//! The gameplay side of a partition tick.
//!
//! The engine owns scheduling, relay draining, boundary bookkeeping and
//! stats; everything that touches actual game objects is delegated to the
//! host through [`TickHandler`]. Handler methods for one partition are
//! called from one worker at a time, but different partitions of the same
//! map run concurrently.

use tessel_core::{EntityId, MapId, PartitionId, Position, ZoneId};
use tessel_partition::PrecacheRequest;
use tessel_relay::RelayEnvelope;

/// Which partition is ticking, and by how much.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickContext {
    /// Map being updated.
    pub map: MapId,
    /// Partition being updated.
    pub partition: PartitionId,
    /// World tick delta (ms).
    pub diff_ms: u32,
    /// Fixed step delta (ms), zero when the host does not use one.
    pub step_ms: u32,
}

impl TickContext {
    /// Delta handed to player updates: the step delta when set, else the
    /// tick delta.
    pub fn player_diff_ms(&self) -> u32 {
        if self.step_ms != 0 {
            self.step_ms
        } else {
            self.diff_ms
        }
    }
}

/// A player as seen when a cycle starts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerSample {
    /// The player.
    pub player: EntityId,
    /// Current position.
    pub position: Position,
    /// Current zone.
    pub zone: ZoneId,
}

/// What became of one relay event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayDisposition {
    /// Applied to its subject.
    Applied,
    /// The subject or its counterpart is gone; nothing to do.
    Skipped,
    /// The subject now lives in another partition; forward it there.
    Forward(PartitionId),
}

/// Result of updating a partition's non-player objects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectTick {
    /// Creatures the partition owns.
    pub creatures: u32,
    /// Objects whose position should be checked against the border band.
    pub moved: Vec<(EntityId, Position)>,
}

/// Host callbacks invoked by the engine.
pub trait TickHandler: Send + Sync {
    /// Players on `map`, sampled at the start of each cycle.
    fn players(&self, map: MapId) -> Vec<PlayerSample>;

    /// Called once before a cycle's buckets are built. Hosts flush
    /// structural changes deferred during the previous cycle here.
    fn begin_cycle(&self, _map: MapId) {}

    /// Apply one relayed event owned by `ctx.partition`.
    fn apply_relay(&self, ctx: &TickContext, envelope: &RelayEnvelope) -> RelayDisposition;

    /// Update one player. Returns the position after the update, or
    /// `None` if the player is no longer in the world.
    fn update_player(&self, ctx: &TickContext, player: EntityId) -> Option<Position>;

    /// Update the partition's creatures and other objects.
    fn update_objects(&self, ctx: &TickContext) -> ObjectTick;

    /// Warm the grid named by a boundary-approach request.
    fn precache(&self, _request: &PrecacheRequest) {}
}
