//! Lock-light mirror of player layer assignments.
//!
//! Each assignment is packed into one `u64` as `[map:24][zone:24][layer:16]`
//! and stored in an [`AtomicU64`]. Readers take a shared lock on one
//! stripe and load the atomic; re-assigning a player who already has an
//! entry is a single atomic store under the same shared lock. Only the
//! first assignment and the final removal of a player take a stripe's
//! write lock.
//!
//! [`LayerManager`](crate::LayerManager) writes the mirror while still
//! holding its authoritative write lock (lock order: table, then stripe),
//! so writers land in the same order in both. A reader that skips the
//! table lock can briefly observe the previous assignment. Code that must
//! not act on stale data uses
//! [`LayerManager::layer_for_player`](crate::LayerManager::layer_for_player).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use ahash::AHashMap;
use tessel_core::{EntityId, LayerId, MapId, ZoneId};

const MAP_BITS: u32 = 24;
const ZONE_BITS: u32 = 24;
const LAYER_BITS: u32 = 16;

const MAP_MAX: u32 = (1 << MAP_BITS) - 1;
const ZONE_MAX: u32 = (1 << ZONE_BITS) - 1;
const LAYER_MAX: u32 = (1 << LAYER_BITS) - 1;

/// A (map, zone, layer) triple packed into one word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackedLayer(u64);

impl PackedLayer {
    /// Pack a triple. `None` if any component exceeds its field width.
    pub fn pack(map: MapId, zone: ZoneId, layer: LayerId) -> Option<Self> {
        if map.0 > MAP_MAX || zone.0 > ZONE_MAX || layer.0 > LAYER_MAX {
            return None;
        }
        Some(Self(
            (u64::from(map.0) << (ZONE_BITS + LAYER_BITS))
                | (u64::from(zone.0) << LAYER_BITS)
                | u64::from(layer.0),
        ))
    }

    /// Raw word.
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw word.
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Map component.
    pub fn map(self) -> MapId {
        MapId((self.0 >> (ZONE_BITS + LAYER_BITS)) as u32 & MAP_MAX)
    }

    /// Zone component.
    pub fn zone(self) -> ZoneId {
        ZoneId((self.0 >> LAYER_BITS) as u32 & ZONE_MAX)
    }

    /// Layer component.
    pub fn layer(self) -> LayerId {
        LayerId(self.0 as u32 & LAYER_MAX)
    }

    /// All three components.
    pub fn unpack(self) -> (MapId, ZoneId, LayerId) {
        (self.map(), self.zone(), self.layer())
    }
}

/// Striped table of packed player assignments.
#[derive(Debug)]
pub struct FastLayerIndex {
    stripes: Box<[RwLock<AHashMap<EntityId, AtomicU64>>]>,
}

impl FastLayerIndex {
    /// An empty index with `stripes` lock stripes (at least one).
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1))
                .map(|_| RwLock::new(AHashMap::new()))
                .collect(),
        }
    }

    fn stripe(&self, player: EntityId) -> &RwLock<AHashMap<EntityId, AtomicU64>> {
        &self.stripes[(player.0 % self.stripes.len() as u64) as usize]
    }

    /// Mirror an assignment. Triples that do not fit the packing are
    /// dropped from the mirror, so fast reads for them return `None`.
    pub fn store(&self, player: EntityId, map: MapId, zone: ZoneId, layer: LayerId) {
        let Some(packed) = PackedLayer::pack(map, zone, layer) else {
            self.remove(player);
            return;
        };
        let stripe = self.stripe(player);
        {
            let guard = stripe.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = guard.get(&player) {
                slot.store(packed.bits(), Ordering::Release);
                return;
            }
        }
        stripe
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(player)
            .or_insert_with(|| AtomicU64::new(0))
            .store(packed.bits(), Ordering::Release);
    }

    /// Last mirrored assignment of `player`.
    pub fn load(&self, player: EntityId) -> Option<PackedLayer> {
        self.stripe(player)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&player)
            .map(|slot| PackedLayer::from_bits(slot.load(Ordering::Acquire)))
    }

    /// Drop `player` from the mirror.
    pub fn remove(&self, player: EntityId) {
        self.stripe(player)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player);
    }

    /// Number of mirrored players.
    pub fn len(&self) -> usize {
        self.stripes
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Whether the mirror is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
