//! Strongly-typed identifiers for maps, zones, partitions, layers, and entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a world map (one simulation instance).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MapId(pub u32);

/// Identifies a zone within a map. Layers are scoped per zone.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

/// A 1-based spatial partition id within a map.
///
/// `PartitionId(0)` is reserved for "unpartitioned": relays addressed to
/// it are ignored and it never appears in a grid layout.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

/// A parallel population instance within a (map, zone).
///
/// `LayerId(0)` is the base layer; it always exists and is never destroyed.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LayerId(pub u32);

/// Opaque identifier of a player, creature, or game object.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

macro_rules! id_conversions {
    ($ty:ident, $inner:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $ty {
            fn from(v: $inner) -> Self {
                Self(v)
            }
        }
    };
}

id_conversions!(MapId, u32);
id_conversions!(ZoneId, u32);
id_conversions!(PartitionId, u32);
id_conversions!(LayerId, u32);
id_conversions!(EntityId, u64);

impl PartitionId {
    /// The "not partitioned" sentinel.
    pub const UNPARTITIONED: PartitionId = PartitionId(0);

    /// Build the id of the partition stored at zero-based `index`.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    /// Zero-based slot of this partition, or `None` for the sentinel.
    pub fn index(self) -> Option<usize> {
        self.0.checked_sub(1).map(|i| i as usize)
    }

    /// Whether this is a real (1-based) partition id.
    pub fn is_partitioned(self) -> bool {
        self.0 != 0
    }
}

impl LayerId {
    /// The base layer every (map, zone) starts with.
    pub const BASE: LayerId = LayerId(0);

    /// Whether this is the base layer.
    pub fn is_base(self) -> bool {
        self.0 == 0
    }
}

impl EntityId {
    /// The null entity. Never registered anywhere.
    pub const NONE: EntityId = EntityId(0);

    /// Whether this id refers to an actual entity.
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}
