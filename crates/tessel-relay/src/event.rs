//! Relay payloads.
//!
//! Each payload is a plain record of entity ids and parameters. The fabric
//! never interprets them beyond routing; the gameplay layer applies them
//! when the target partition drains its queues.

use tessel_core::{EntityId, Position};

use crate::kind::RelayKind;

/// Whole-list threat operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreatAction {
    /// Drop every entry.
    ClearAll,
    /// Zero every entry but keep the list.
    ResetAll,
}

/// Taunt operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TauntAction {
    /// Taunt applied.
    Apply,
    /// Taunt faded.
    Fade,
}

/// Movement relayed through [`MotionRelay`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum MotionAction {
    Jump,
    Fall,
    Charge,
    ChargePath,
    Flee,
    Distract,
    Backwards,
    Forwards,
    Circle,
    SplinePath,
    Path,
    Land,
    Takeoff,
    Knockback,
    Stop,
    StopOnPosition,
    FaceOrientation,
    FaceObject,
    MonsterMove,
    TransportEnter,
    TransportExit,
    PassengerRelocate,
    VehicleTeleport,
}

/// Threat added by `owner` against `victim`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThreatRelay {
    /// Unit whose threat list changes.
    pub owner: EntityId,
    /// Unit gaining threat.
    pub victim: EntityId,
    /// Threat amount.
    pub threat: f32,
    /// Spell school mask of the source.
    pub school_mask: u32,
    /// Source spell, zero for none.
    pub spell_id: u32,
}

/// Whole-list threat operation on `owner`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreatActionRelay {
    /// Unit whose threat list changes.
    pub owner: EntityId,
    /// Operation.
    pub action: ThreatAction,
}

/// Single-entry threat operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreatTargetRelay {
    /// Unit whose threat list changes.
    pub owner: EntityId,
    /// Entry affected.
    pub target: EntityId,
    /// `ClearAll` clears the entry, `ResetAll` zeroes it.
    pub action: ThreatAction,
}

/// Taunt state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TauntRelay {
    /// Taunted unit.
    pub owner: EntityId,
    /// Taunting unit.
    pub taunter: EntityId,
    /// Apply or fade.
    pub action: TauntAction,
}

/// Enter combat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombatRelay {
    /// Unit entering combat.
    pub owner: EntityId,
    /// Opponent.
    pub victim: EntityId,
    /// Whether this is the opening aggro.
    pub initial_aggro: bool,
}

/// Loot recipient update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LootRelay {
    /// Lootable creature.
    pub creature: EntityId,
    /// Recipient.
    pub unit: EntityId,
    /// Whether the recipient's group shares loot.
    pub with_group: bool,
}

/// Dynamic object action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynObjectRelay {
    /// Dynamic object.
    pub dyn_object: EntityId,
    /// Action code (1 = remove).
    pub action: u8,
}

/// Minion bind/unbind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinionRelay {
    /// Owner.
    pub owner: EntityId,
    /// Minion.
    pub minion: EntityId,
    /// Bind when true.
    pub apply: bool,
}

/// Charm apply/remove.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharmRelay {
    /// Charmer.
    pub charmer: EntityId,
    /// Charmed unit.
    pub target: EntityId,
    /// Charm type code.
    pub charm_type: u8,
    /// Aura that carries the charm.
    pub aura_spell_id: u32,
    /// Apply when true.
    pub apply: bool,
}

/// Game object ownership change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameObjectRelay {
    /// Owning unit.
    pub owner: EntityId,
    /// Game object.
    pub game_object: EntityId,
    /// Spell that created it.
    pub spell_id: u32,
    /// Delete the object as well.
    pub delete: bool,
    /// Action code (1 = remove, 2 = remove by spell, 3 = remove all).
    pub action: u8,
}

/// Combat state refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombatStateRelay {
    /// Unit.
    pub unit: EntityId,
    /// Enemy.
    pub enemy: EntityId,
    /// Player-versus-player combat.
    pub pvp: bool,
    /// Combat timer (ms).
    pub duration_ms: u32,
}

/// Start/stop attacking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttackRelay {
    /// Attacker.
    pub attacker: EntityId,
    /// Victim.
    pub victim: EntityId,
    /// Melee (true) or ranged.
    pub melee: bool,
}

/// Evade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvadeRelay {
    /// Evading unit.
    pub unit: EntityId,
    /// Reason code.
    pub reason: u8,
}

/// Proc trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcRelay {
    /// Acting unit.
    pub actor: EntityId,
    /// Target unit.
    pub target: EntityId,
    /// Whether the proc is evaluated on the victim side.
    pub is_victim: bool,
    /// Proc flag mask.
    pub flags: u32,
    /// Extra proc flag mask.
    pub extra: u32,
    /// Damage or heal amount.
    pub amount: u32,
    /// Weapon attack type code.
    pub attack_type: u8,
    /// Triggering spell.
    pub spell_id: u32,
    /// Triggering aura.
    pub aura_id: u32,
    /// Aura effect index, negative for none.
    pub effect_index: i8,
    /// Proc phase code.
    pub phase: u32,
}

/// Aura application or removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuraRelay {
    /// Caster.
    pub caster: EntityId,
    /// Aura holder.
    pub target: EntityId,
    /// Aura spell.
    pub spell_id: u32,
    /// Effect mask.
    pub effect_mask: u8,
    /// Apply when true.
    pub apply: bool,
    /// Remove mode code.
    pub remove_mode: u8,
}

/// Chase/follow path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathRelay {
    /// Moving unit.
    pub mover: EntityId,
    /// Path target.
    pub target: EntityId,
}

/// Move to a point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointRelay {
    /// Moving unit.
    pub mover: EntityId,
    /// Movement point id reported on arrival.
    pub point_id: u32,
    /// Destination.
    pub destination: Position,
    /// Speed override, zero for default.
    pub speed: f32,
    /// Final facing.
    pub orientation: f32,
    /// Generate a navmesh path.
    pub generate_path: bool,
    /// Arrive exactly at the destination.
    pub force_destination: bool,
}

/// Generic movement.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionRelay {
    /// Moving unit.
    pub mover: EntityId,
    /// Movement target, if any.
    pub target: EntityId,
    /// What kind of movement.
    pub action: MotionAction,
    /// Movement id.
    pub id: u32,
    /// Duration (ms) where relevant.
    pub time_ms: u32,
    /// Destination.
    pub destination: Position,
    /// Horizontal speed.
    pub speed: f32,
    /// Vertical speed.
    pub speed_z: f32,
    /// Facing.
    pub orientation: f32,
    /// Spline points for path movements.
    pub path: Vec<Position>,
    /// Spell that caused the movement.
    pub spell_id: u32,
}

impl MotionRelay {
    /// A motion with every optional field zeroed.
    pub fn new(mover: EntityId, action: MotionAction) -> Self {
        Self {
            mover,
            target: EntityId::NONE,
            action,
            id: 0,
            time_ms: 0,
            destination: Position::default(),
            speed: 0.0,
            speed_z: 0.0,
            orientation: 0.0,
            path: Vec::new(),
            spell_id: 0,
        }
    }
}

/// Move to assist at a position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AssistRelay {
    /// Moving unit.
    pub mover: EntityId,
    /// Where to go.
    pub destination: Position,
}

/// Distract for a duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssistDistractRelay {
    /// Distracted unit.
    pub mover: EntityId,
    /// Duration (ms).
    pub time_ms: u32,
}

/// One cross-partition interaction.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum RelayEvent {
    Threat(ThreatRelay),
    ThreatAction(ThreatActionRelay),
    Proc(ProcRelay),
    Aura(AuraRelay),
    Path(PathRelay),
    Point(PointRelay),
    Motion(MotionRelay),
    Assist(AssistRelay),
    AssistDistract(AssistDistractRelay),
    ThreatTarget(ThreatTargetRelay),
    Combat(CombatRelay),
    Loot(LootRelay),
    DynObject(DynObjectRelay),
    Minion(MinionRelay),
    Charm(CharmRelay),
    GameObject(GameObjectRelay),
    CombatState(CombatStateRelay),
    Attack(AttackRelay),
    Evade(EvadeRelay),
    Taunt(TauntRelay),
}

impl RelayEvent {
    /// Kind of this event.
    pub fn kind(&self) -> RelayKind {
        match self {
            RelayEvent::Threat(_) => RelayKind::Threat,
            RelayEvent::ThreatAction(_) => RelayKind::ThreatAction,
            RelayEvent::Proc(_) => RelayKind::Proc,
            RelayEvent::Aura(_) => RelayKind::Aura,
            RelayEvent::Path(_) => RelayKind::Path,
            RelayEvent::Point(_) => RelayKind::Point,
            RelayEvent::Motion(_) => RelayKind::Motion,
            RelayEvent::Assist(_) => RelayKind::Assist,
            RelayEvent::AssistDistract(_) => RelayKind::AssistDistract,
            RelayEvent::ThreatTarget(_) => RelayKind::ThreatTarget,
            RelayEvent::Combat(_) => RelayKind::Combat,
            RelayEvent::Loot(_) => RelayKind::Loot,
            RelayEvent::DynObject(_) => RelayKind::DynObject,
            RelayEvent::Minion(_) => RelayKind::Minion,
            RelayEvent::Charm(_) => RelayKind::Charm,
            RelayEvent::GameObject(_) => RelayKind::GameObject,
            RelayEvent::CombatState(_) => RelayKind::CombatState,
            RelayEvent::Attack(_) => RelayKind::Attack,
            RelayEvent::Evade(_) => RelayKind::Evade,
            RelayEvent::Taunt(_) => RelayKind::Taunt,
        }
    }

    /// The entity whose partition should apply this event: the unit whose
    /// state the event mutates.
    pub fn subject(&self) -> EntityId {
        match self {
            RelayEvent::Threat(r) => r.owner,
            RelayEvent::ThreatAction(r) => r.owner,
            RelayEvent::Proc(r) => r.actor,
            RelayEvent::Aura(r) => r.target,
            RelayEvent::Path(r) => r.mover,
            RelayEvent::Point(r) => r.mover,
            RelayEvent::Motion(r) => r.mover,
            RelayEvent::Assist(r) => r.mover,
            RelayEvent::AssistDistract(r) => r.mover,
            RelayEvent::ThreatTarget(r) => r.owner,
            RelayEvent::Combat(r) => r.owner,
            RelayEvent::Loot(r) => r.creature,
            RelayEvent::DynObject(r) => r.dyn_object,
            RelayEvent::Minion(r) => r.owner,
            RelayEvent::Charm(r) => r.target,
            RelayEvent::GameObject(r) => r.owner,
            RelayEvent::CombatState(r) => r.unit,
            RelayEvent::Attack(r) => r.attacker,
            RelayEvent::Evade(r) => r.unit,
            RelayEvent::Taunt(r) => r.owner,
        }
    }
}

/// A queued event with its bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayEnvelope {
    /// The event.
    pub event: RelayEvent,
    /// Clock time at enqueue (ms).
    pub queued_ms: u64,
    /// How many times the event was forwarded to another partition.
    pub bounces: u8,
}

impl RelayEnvelope {
    /// Wrap a fresh event.
    pub fn new(event: RelayEvent, queued_ms: u64) -> Self {
        Self {
            event,
            queued_ms,
            bounces: 0,
        }
    }

    /// Kind of the wrapped event.
    pub fn kind(&self) -> RelayKind {
        self.event.kind()
    }

    /// Time spent queued as of `now_ms`.
    pub fn latency_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.queued_ms)
    }
}
