//! Relay kinds and their backpressure policies.

use std::fmt;

/// What a full queue does with one more event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackpressurePolicy {
    /// Pop the head of the queue, then push. Used for state that is only
    /// meaningful in its latest form (movement, attack state).
    ReplaceOldest,
    /// Keep the queue as is and discard the incoming event.
    DropNewest,
}

/// Category of cross-partition interaction.
///
/// Declaration order is drain order: a partition's relays are handed to
/// the gameplay layer kind by kind in this order, FIFO within a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelayKind {
    /// Threat added by one unit against another.
    Threat,
    /// Clear or reset an owner's whole threat list.
    ThreatAction,
    /// Proc trigger evaluated on the target's side.
    Proc,
    /// Aura application or removal.
    Aura,
    /// Chase/follow path towards a target.
    Path,
    /// Move to a point.
    Point,
    /// Generic movement (jump, charge, knockback, ...).
    Motion,
    /// Move to assist at a position.
    Assist,
    /// Distract for a duration.
    AssistDistract,
    /// Clear or reset one threat-list entry.
    ThreatTarget,
    /// Enter combat.
    Combat,
    /// Loot recipient update.
    Loot,
    /// Dynamic object action.
    DynObject,
    /// Minion bind/unbind.
    Minion,
    /// Charm apply/remove.
    Charm,
    /// Game object ownership change.
    GameObject,
    /// Combat state refresh.
    CombatState,
    /// Start or stop attacking.
    Attack,
    /// Evade.
    Evade,
    /// Taunt apply/fade.
    Taunt,
}

impl RelayKind {
    /// Number of relay kinds.
    pub const COUNT: usize = 20;

    /// Every kind, in drain order.
    pub const ALL: [RelayKind; Self::COUNT] = [
        RelayKind::Threat,
        RelayKind::ThreatAction,
        RelayKind::Proc,
        RelayKind::Aura,
        RelayKind::Path,
        RelayKind::Point,
        RelayKind::Motion,
        RelayKind::Assist,
        RelayKind::AssistDistract,
        RelayKind::ThreatTarget,
        RelayKind::Combat,
        RelayKind::Loot,
        RelayKind::DynObject,
        RelayKind::Minion,
        RelayKind::Charm,
        RelayKind::GameObject,
        RelayKind::CombatState,
        RelayKind::Attack,
        RelayKind::Evade,
        RelayKind::Taunt,
    ];

    /// Dense index in `0..COUNT`, matching the position in [`ALL`](Self::ALL).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Overflow policy for this kind.
    ///
    /// A new kind does not compile until it has an arm here.
    pub const fn policy(self) -> BackpressurePolicy {
        match self {
            RelayKind::Motion
            | RelayKind::Path
            | RelayKind::Point
            | RelayKind::CombatState
            | RelayKind::Attack
            | RelayKind::Combat => BackpressurePolicy::ReplaceOldest,
            RelayKind::Threat
            | RelayKind::ThreatAction
            | RelayKind::ThreatTarget
            | RelayKind::Proc
            | RelayKind::Aura
            | RelayKind::Assist
            | RelayKind::AssistDistract
            | RelayKind::Loot
            | RelayKind::DynObject
            | RelayKind::Minion
            | RelayKind::Charm
            | RelayKind::GameObject
            | RelayKind::Evade
            | RelayKind::Taunt => BackpressurePolicy::DropNewest,
        }
    }

    /// Stable name used in logs and metric tags.
    pub const fn name(self) -> &'static str {
        match self {
            RelayKind::Threat => "threat",
            RelayKind::ThreatAction => "threat-action",
            RelayKind::Proc => "proc",
            RelayKind::Aura => "aura",
            RelayKind::Path => "path",
            RelayKind::Point => "point",
            RelayKind::Motion => "motion",
            RelayKind::Assist => "assist",
            RelayKind::AssistDistract => "assist-distract",
            RelayKind::ThreatTarget => "threat-target",
            RelayKind::Combat => "combat",
            RelayKind::Loot => "loot",
            RelayKind::DynObject => "dynobject",
            RelayKind::Minion => "minion",
            RelayKind::Charm => "charm",
            RelayKind::GameObject => "gameobject",
            RelayKind::CombatState => "combat-state",
            RelayKind::Attack => "attack",
            RelayKind::Evade => "evade",
            RelayKind::Taunt => "taunt",
        }
    }
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
