//! Layer membership of one (map, zone).

use std::collections::BTreeMap;

use ahash::AHashSet;
use smallvec::SmallVec;
use tessel_core::{EntityId, LayerId, SpawnKind};

/// Members of one layer.
#[derive(Debug, Default)]
pub struct Layer {
    players: AHashSet<EntityId>,
    npcs: AHashSet<EntityId>,
    objects: AHashSet<EntityId>,
}

impl Layer {
    /// Players on the layer.
    pub fn players(&self) -> &AHashSet<EntityId> {
        &self.players
    }

    /// Spawned instances of `kind` on the layer.
    pub fn spawned(&self, kind: SpawnKind) -> &AHashSet<EntityId> {
        match kind {
            SpawnKind::Creature => &self.npcs,
            SpawnKind::GameObject => &self.objects,
        }
    }

    fn spawned_mut(&mut self, kind: SpawnKind) -> &mut AHashSet<EntityId> {
        match kind {
            SpawnKind::Creature => &mut self.npcs,
            SpawnKind::GameObject => &mut self.objects,
        }
    }

    fn is_vacant(&self) -> bool {
        self.players.is_empty() && self.npcs.is_empty() && self.objects.is_empty()
    }
}

/// NPCs and game objects left behind by a destroyed layer.
#[derive(Debug, Default)]
pub struct Evicted {
    /// NPC instances on the layer.
    pub npcs: Vec<EntityId>,
    /// Game object instances on the layer.
    pub objects: Vec<EntityId>,
}

/// All layers of one (map, zone), ordered by id.
///
/// The base layer is created with the table and is never removed.
#[derive(Debug)]
pub struct ZoneLayers {
    layers: BTreeMap<LayerId, Layer>,
}

impl Default for ZoneLayers {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneLayers {
    /// A table holding only the empty base layer.
    pub fn new() -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(LayerId::BASE, Layer::default());
        Self { layers }
    }

    /// Layer ids in ascending order.
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.keys().copied().collect()
    }

    /// Number of layers, base included.
    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }

    /// Whether `layer` exists.
    pub fn contains(&self, layer: LayerId) -> bool {
        self.layers.contains_key(&layer)
    }

    /// Layer `id`, if present.
    pub fn get(&self, layer: LayerId) -> Option<&Layer> {
        self.layers.get(&layer)
    }

    /// Player count of each layer in id order.
    pub fn player_counts(&self) -> SmallVec<[(LayerId, u32); 8]> {
        self.layers
            .iter()
            .map(|(id, l)| (*id, l.players.len() as u32))
            .collect()
    }

    /// Players across all layers.
    pub fn total_players(&self) -> u32 {
        self.layers.values().map(|l| l.players.len() as u32).sum()
    }

    /// Lowest-id layer with fewer than `capacity` players.
    pub fn first_with_capacity(&self, capacity: u32) -> Option<LayerId> {
        self.layers
            .iter()
            .find(|(_, l)| (l.players.len() as u32) < capacity)
            .map(|(id, _)| *id)
    }

    /// Layer with the fewest players; ties go to the lowest id.
    pub fn least_populated(&self) -> LayerId {
        self.layers
            .iter()
            .min_by_key(|(id, l)| (l.players.len(), **id))
            .map(|(id, _)| *id)
            .unwrap_or(LayerId::BASE)
    }

    /// Id a newly opened layer would get.
    pub fn next_layer_id(&self) -> LayerId {
        self.layers
            .keys()
            .next_back()
            .map_or(LayerId(1), |max| LayerId(max.0 + 1))
    }

    /// Add an empty layer. Returns `false` if it already existed.
    pub fn open(&mut self, layer: LayerId) -> bool {
        if self.layers.contains_key(&layer) {
            return false;
        }
        self.layers.insert(layer, Layer::default());
        true
    }

    /// Put `player` on `layer`, opening it if needed.
    pub fn insert_player(&mut self, layer: LayerId, player: EntityId) {
        self.layers.entry(layer).or_default().players.insert(player);
    }

    /// Take `player` off `layer`.
    pub fn remove_player(&mut self, layer: LayerId, player: EntityId) -> bool {
        self.layers
            .get_mut(&layer)
            .is_some_and(|l| l.players.remove(&player))
    }

    /// Record a spawned instance on an existing `layer`.
    pub fn insert_spawned(&mut self, kind: SpawnKind, layer: LayerId, entity: EntityId) -> bool {
        match self.layers.get_mut(&layer) {
            Some(l) => {
                l.spawned_mut(kind).insert(entity);
                true
            }
            None => false,
        }
    }

    /// Forget a spawned instance.
    pub fn remove_spawned(&mut self, kind: SpawnKind, layer: LayerId, entity: EntityId) -> bool {
        self.layers
            .get_mut(&layer)
            .is_some_and(|l| l.spawned_mut(kind).remove(&entity))
    }

    /// Remove a non-base layer that has no players, handing back the
    /// instances spawned on it.
    pub fn remove_if_empty(&mut self, layer: LayerId) -> Option<Evicted> {
        if layer.is_base() {
            return None;
        }
        if !self.layers.get(&layer)?.players.is_empty() {
            return None;
        }
        let removed = self.layers.remove(&layer)?;
        let mut evicted = Evicted {
            npcs: removed.npcs.into_iter().collect(),
            objects: removed.objects.into_iter().collect(),
        };
        evicted.npcs.sort_unstable();
        evicted.objects.sort_unstable();
        Some(evicted)
    }

    /// Ids of every non-base layer without players.
    pub fn empty_layers(&self) -> Vec<LayerId> {
        self.layers
            .iter()
            .filter(|(id, l)| !id.is_base() && l.players.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Only the base layer is left and nothing lives on it.
    pub fn is_vacant(&self) -> bool {
        self.layers.len() == 1
            && self
                .layers
                .get(&LayerId::BASE)
                .is_none_or(Layer::is_vacant)
    }

    /// Per-layer count of spawned instances of `kind`, skipping zeroes.
    pub fn spawned_counts(&self, kind: SpawnKind) -> BTreeMap<LayerId, usize> {
        self.layers
            .iter()
            .filter_map(|(id, l)| {
                let n = l.spawned(kind).len();
                (n > 0).then_some((*id, n))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_layer_is_permanent() {
        let mut z = ZoneLayers::new();
        assert_eq!(z.layer_ids(), vec![LayerId::BASE]);
        assert!(z.remove_if_empty(LayerId::BASE).is_none());
        assert!(z.is_vacant());
        assert_eq!(z.next_layer_id(), LayerId(1));
    }

    #[test]
    fn capacity_and_least_populated() {
        let mut z = ZoneLayers::new();
        z.open(LayerId(1));
        z.open(LayerId(2));
        for p in 1..=3 {
            z.insert_player(LayerId::BASE, EntityId(p));
        }
        z.insert_player(LayerId(1), EntityId(10));
        z.insert_player(LayerId(1), EntityId(11));
        z.insert_player(LayerId(2), EntityId(20));
        z.insert_player(LayerId(2), EntityId(21));
        assert_eq!(z.first_with_capacity(3), Some(LayerId(1)));
        assert_eq!(z.first_with_capacity(2), None);
        assert_eq!(z.least_populated(), LayerId(1));
        assert_eq!(z.total_players(), 7);
        assert_eq!(z.next_layer_id(), LayerId(3));
    }

    #[test]
    fn removal_evicts_spawned_instances() {
        let mut z = ZoneLayers::new();
        z.open(LayerId(1));
        z.insert_player(LayerId(1), EntityId(1));
        assert!(z.insert_spawned(SpawnKind::Creature, LayerId(1), EntityId(200)));
        assert!(z.insert_spawned(SpawnKind::GameObject, LayerId(1), EntityId(300)));
        assert!(!z.insert_spawned(SpawnKind::Creature, LayerId(9), EntityId(201)));
        assert!(z.remove_if_empty(LayerId(1)).is_none());

        z.remove_player(LayerId(1), EntityId(1));
        assert_eq!(z.empty_layers(), vec![LayerId(1)]);
        let evicted = z.remove_if_empty(LayerId(1)).unwrap();
        assert_eq!(evicted.npcs, vec![EntityId(200)]);
        assert_eq!(evicted.objects, vec![EntityId(300)]);
        assert!(!z.contains(LayerId(1)));
    }
}
