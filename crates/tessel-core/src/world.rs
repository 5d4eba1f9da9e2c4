//! World-data and spawning collaborators used by the spawn loader.

use thiserror::Error;

use crate::id::{EntityId, LayerId, MapId, ZoneId};
use crate::position::{GridCoord, Position};

/// What a spawn record instantiates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpawnKind {
    /// An NPC.
    Creature,
    /// A game object.
    GameObject,
}

impl SpawnKind {
    /// Name used in logs and metric tags.
    pub fn name(self) -> &'static str {
        match self {
            SpawnKind::Creature => "creature",
            SpawnKind::GameObject => "gameobject",
        }
    }
}

/// One static spawn from the world database.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnRecord {
    /// Database key of the spawn.
    pub spawn_id: u64,
    /// Creature or game object.
    pub kind: SpawnKind,
    /// Template to instantiate.
    pub template_id: u32,
    /// Zone the spawn lives in.
    pub zone: ZoneId,
    /// Spawn position.
    pub position: Position,
}

/// Errors from instantiating a spawn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The record names a template that does not exist.
    #[error("{kind:?} template {template_id} not found")]
    MissingTemplate {
        /// Record kind.
        kind: SpawnKind,
        /// Missing template.
        template_id: u32,
    },
    /// The spawner refused or failed to create the instance.
    #[error("spawn {spawn_id} failed: {reason}")]
    Failed {
        /// Record that failed.
        spawn_id: u64,
        /// Why.
        reason: String,
    },
}

/// Read access to static spawn data.
pub trait WorldDataStore: Send + Sync {
    /// Spawn records inside world grid `cell` of `map`.
    fn spawns_in_cell(&self, map: MapId, cell: GridCoord) -> Vec<SpawnRecord>;

    /// Whether a template exists.
    fn template_exists(&self, kind: SpawnKind, template_id: u32) -> bool;
}

/// Creates entity instances.
pub trait Spawner: Send + Sync {
    /// Instantiate `record` on `map`.
    ///
    /// `layer` is `None` for an unlayered spawn. `clone` marks every
    /// instance after the first of a record, which may share its spawn key.
    fn spawn(
        &self,
        map: MapId,
        record: &SpawnRecord,
        layer: Option<LayerId>,
        clone: bool,
    ) -> Result<EntityId, SpawnError>;
}
