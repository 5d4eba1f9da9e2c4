//! Error types for layer assignment and switching.

use tessel_core::{EntityId, LayerId, MapId, ZoneId};
use thiserror::Error;

/// Why a player-initiated layer switch was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SwitchDenied {
    /// Players cannot switch while in combat.
    #[error("cannot switch layers while in combat")]
    InCombat,
    /// Dead players cannot switch.
    #[error("cannot switch layers while dead")]
    Dead,
    /// The escalating switch cooldown has not elapsed.
    #[error("layer switch on cooldown for another {remaining_ms}ms")]
    Cooldown {
        /// Time until the next switch is allowed.
        remaining_ms: u64,
    },
}

/// Errors from [`LayerManager`](crate::LayerManager) operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LayerError {
    /// Layering is switched off in the configuration.
    #[error("layering is disabled")]
    Disabled,
    /// The player has no layer assignment.
    #[error("player {0} is not assigned to a layer")]
    NotAssigned(EntityId),
    /// The target layer does not exist in the player's zone.
    #[error("layer {layer} does not exist on map {map} zone {zone}")]
    UnknownLayer {
        /// Map searched.
        map: MapId,
        /// Zone searched.
        zone: ZoneId,
        /// Missing layer.
        layer: LayerId,
    },
    /// The player is already on the requested layer.
    #[error("player {player} is already on layer {layer}")]
    AlreadyOnLayer {
        /// Player asked to switch.
        player: EntityId,
        /// Their current layer.
        layer: LayerId,
    },
    /// The (map, zone) already has `max_layers` layers.
    #[error("map {map} zone {zone} is at its limit of {max} layers")]
    LayerLimit {
        /// Map at the limit.
        map: MapId,
        /// Zone at the limit.
        zone: ZoneId,
        /// Configured maximum.
        max: u32,
    },
    /// A player-initiated switch was refused.
    #[error(transparent)]
    Switch(#[from] SwitchDenied),
}
