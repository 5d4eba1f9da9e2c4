//! Timeout-guarded ownership handoff between partitions.
//!
//! A relocation moves an entity from one partition to another in steps:
//!
//! ```text
//! begin ─▶ PENDING ─lock─▶ LOCKED ─validate─▶ VALIDATED
//!                              │                  │
//!                              └──────commit──────┴─▶ COMMITTED (removed)
//!
//! any open state ─rollback / timeout─▶ ROLLED_BACK (removed)
//! ```
//!
//! At most one transaction exists per entity. Terminal transactions are
//! removed immediately, so everything in the table is open.
//! [`RelocationTable::sweep`] rolls back anything older than its timeout.

use ahash::AHashMap;
use tessel_core::{EntityId, MapId, PartitionId, Position};

use crate::error::RelocationError;

/// Lifecycle state of a relocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelocationState {
    /// Started, source not yet locked.
    Pending,
    /// Entity frozen in the source partition.
    Locked,
    /// Target position checked against the target partition.
    Validated,
    /// Handoff complete.
    Committed,
    /// Handoff abandoned; ownership stays with the source.
    RolledBack,
}

impl RelocationState {
    /// Whether the transaction is finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, RelocationState::Committed | RelocationState::RolledBack)
    }
}

/// One entity's in-flight handoff.
#[derive(Clone, Debug, PartialEq)]
pub struct RelocationTxn {
    /// Entity being moved.
    pub entity: EntityId,
    /// Map the entity lives on.
    pub map: MapId,
    /// Current owner.
    pub from: PartitionId,
    /// Prospective owner.
    pub to: PartitionId,
    /// Current state.
    pub state: RelocationState,
    /// When `begin` was called.
    pub start_ms: u64,
    /// When the source was locked, if it has been.
    pub lock_ms: Option<u64>,
    /// Age after which the sweep rolls the transaction back.
    pub timeout_ms: u64,
    /// Entity position at `begin`.
    pub start_position: Position,
}

impl RelocationTxn {
    /// Whether the transaction has outlived its timeout at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.start_ms) > self.timeout_ms
    }
}

/// Open relocations keyed by entity.
#[derive(Debug, Default)]
pub struct RelocationTable {
    txns: AHashMap<EntityId, RelocationTxn>,
}

impl RelocationTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open transactions.
    pub fn len(&self) -> usize {
        self.txns.len()
    }

    /// Whether no transaction is open.
    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }

    /// The open transaction for `entity`.
    pub fn get(&self, entity: EntityId) -> Option<&RelocationTxn> {
        self.txns.get(&entity)
    }

    /// Open a PENDING transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        entity: EntityId,
        map: MapId,
        from: PartitionId,
        to: PartitionId,
        start_position: Position,
        timeout_ms: u64,
        now_ms: u64,
    ) -> Result<&RelocationTxn, RelocationError> {
        use std::collections::hash_map::Entry;
        match self.txns.entry(entity) {
            Entry::Occupied(_) => Err(RelocationError::AlreadyInProgress(entity)),
            Entry::Vacant(slot) => Ok(slot.insert(RelocationTxn {
                entity,
                map,
                from,
                to,
                state: RelocationState::Pending,
                start_ms: now_ms,
                lock_ms: None,
                timeout_ms,
                start_position,
            })),
        }
    }

    /// PENDING → LOCKED.
    pub fn lock(&mut self, entity: EntityId, now_ms: u64) -> Result<(), RelocationError> {
        let txn = self.open_mut(entity)?;
        if txn.state != RelocationState::Pending {
            return Err(invalid(txn, "lock"));
        }
        txn.state = RelocationState::Locked;
        txn.lock_ms = Some(now_ms);
        Ok(())
    }

    /// LOCKED → VALIDATED.
    pub fn validate(&mut self, entity: EntityId) -> Result<(), RelocationError> {
        let txn = self.open_mut(entity)?;
        if txn.state != RelocationState::Locked {
            return Err(invalid(txn, "validate"));
        }
        txn.state = RelocationState::Validated;
        Ok(())
    }

    /// LOCKED | VALIDATED → COMMITTED. Removes and returns the transaction.
    pub fn commit(&mut self, entity: EntityId) -> Result<RelocationTxn, RelocationError> {
        let txn = self.open_mut(entity)?;
        if !matches!(
            txn.state,
            RelocationState::Locked | RelocationState::Validated
        ) {
            return Err(invalid(txn, "commit"));
        }
        let mut txn = self.remove(entity)?;
        txn.state = RelocationState::Committed;
        Ok(txn)
    }

    /// Any open state → ROLLED_BACK. Removes and returns the transaction.
    pub fn rollback(&mut self, entity: EntityId) -> Result<RelocationTxn, RelocationError> {
        let mut txn = self.remove(entity)?;
        txn.state = RelocationState::RolledBack;
        Ok(txn)
    }

    /// Roll back every transaction older than its timeout.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<RelocationTxn> {
        let expired: Vec<EntityId> = self
            .txns
            .values()
            .filter(|t| t.is_expired(now_ms))
            .map(|t| t.entity)
            .collect();
        expired
            .into_iter()
            .filter_map(|e| self.rollback(e).ok())
            .collect()
    }

    /// Drop every transaction on `map` without reporting them.
    pub fn clear_map(&mut self, map: MapId) -> usize {
        let before = self.txns.len();
        self.txns.retain(|_, t| t.map != map);
        before - self.txns.len()
    }

    fn open_mut(&mut self, entity: EntityId) -> Result<&mut RelocationTxn, RelocationError> {
        self.txns
            .get_mut(&entity)
            .ok_or(RelocationError::NotFound(entity))
    }

    fn remove(&mut self, entity: EntityId) -> Result<RelocationTxn, RelocationError> {
        self.txns
            .remove(&entity)
            .ok_or(RelocationError::NotFound(entity))
    }
}

fn invalid(txn: &RelocationTxn, op: &'static str) -> RelocationError {
    RelocationError::InvalidState {
        entity: txn.entity,
        state: txn.state,
        op,
    }
}
