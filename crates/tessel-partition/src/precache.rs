//! Boundary-approach detection and the adjacent-partition pre-cache queue.
//!
//! When a moving entity is inside the border band and its projected
//! position falls into a neighbouring partition, a request to warm that
//! partition's grid is queued. Requests are deduplicated per (map,
//! partition, grid) for a while, aged out if they wait too long, and
//! consumed a few per map per tick.

use std::collections::VecDeque;

use ahash::AHashMap;
use tessel_core::{EntityId, GridCoord, MapId, PartitionConfig, PartitionId, Position};
use tessel_space::GridLayout;

/// Seconds of travel projected ahead of the entity.
pub const APPROACH_LOOKAHEAD_SECS: f32 = 2.0;

/// Request to warm the grid at `position` for `partition`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrecacheRequest {
    /// Map of the target partition.
    pub map: MapId,
    /// Partition the entity is heading into.
    pub partition: PartitionId,
    /// Projected position.
    pub position: Position,
    /// When the request was queued.
    pub queued_ms: u64,
}

impl PrecacheRequest {
    /// World grid to warm.
    pub fn grid(&self) -> GridCoord {
        self.position.grid()
    }

    fn dedupe_key(&self) -> (MapId, PartitionId, GridCoord) {
        (self.map, self.partition, self.grid())
    }
}

/// Why `check_boundary_approach` did not queue anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApproachOutcome {
    /// A request was queued.
    Queued(PartitionId),
    /// The entity was checked too recently.
    Throttled,
    /// Not near a boundary, not moving, or not heading into a neighbour.
    NotApproaching,
    /// The same target was requested recently.
    Duplicate,
    /// The queue is at its limit.
    QueueFull,
}

/// Pending pre-cache work plus the per-entity throttle.
#[derive(Debug, Default)]
pub struct PrecacheQueue {
    queue: VecDeque<PrecacheRequest>,
    recent: AHashMap<(MapId, PartitionId, GridCoord), u64>,
    last_check: AHashMap<EntityId, u64>,
}

impl PrecacheQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued requests.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check whether `entity` at `pos` moving at `velocity` (world units
    /// per second) is about to cross into a neighbouring partition.
    #[allow(clippy::too_many_arguments)]
    pub fn check_approach(
        &mut self,
        config: &PartitionConfig,
        layout: &GridLayout,
        entity: EntityId,
        map: MapId,
        pos: Position,
        velocity: (f32, f32),
        now_ms: u64,
    ) -> ApproachOutcome {
        if let Some(&last) = self.last_check.get(&entity) {
            if now_ms.saturating_sub(last) < config.approach_check_interval_ms {
                return ApproachOutcome::Throttled;
            }
        }
        self.last_check.insert(entity, now_ms);

        let (dx, dy) = velocity;
        if !(dx.is_finite() && dy.is_finite()) || (dx == 0.0 && dy == 0.0) {
            return ApproachOutcome::NotApproaching;
        }
        if !layout.is_near_boundary(pos.x, pos.y, config.border_overlap) {
            return ApproachOutcome::NotApproaching;
        }

        let current = layout.partition_for_position(pos.x, pos.y);
        let ahead = Position::new(
            pos.x + dx * APPROACH_LOOKAHEAD_SECS,
            pos.y + dy * APPROACH_LOOKAHEAD_SECS,
            pos.z,
        );
        let target = layout.partition_for_position(ahead.x, ahead.y);
        if target == current || !layout.adjacent_partitions(current).contains(&target) {
            return ApproachOutcome::NotApproaching;
        }

        let request = PrecacheRequest {
            map,
            partition: target,
            position: ahead,
            queued_ms: now_ms,
        };
        let key = request.dedupe_key();
        if let Some(&seen) = self.recent.get(&key) {
            if now_ms.saturating_sub(seen) < config.precache_recent_ttl_ms {
                return ApproachOutcome::Duplicate;
            }
        }
        if self.queue.len() >= config.precache_queue_limit {
            return ApproachOutcome::QueueFull;
        }
        self.recent.insert(key, now_ms);
        self.queue.push_back(request);
        ApproachOutcome::Queued(target)
    }

    /// Take up to `precache_per_tick` live requests for `map`, oldest
    /// first. Requests older than `precache_max_age_ms` are discarded.
    pub fn take_for_map(
        &mut self,
        config: &PartitionConfig,
        map: MapId,
        now_ms: u64,
    ) -> Vec<PrecacheRequest> {
        let max_age = config.precache_max_age_ms;
        self.queue
            .retain(|r| now_ms.saturating_sub(r.queued_ms) <= max_age);

        let mut out = Vec::new();
        let mut i = 0;
        while i < self.queue.len() && out.len() < config.precache_per_tick {
            if self.queue[i].map == map {
                if let Some(r) = self.queue.remove(i) {
                    out.push(r);
                }
            } else {
                i += 1;
            }
        }
        out
    }

    /// Forget dedupe entries and throttle stamps older than the dedupe
    /// window. Returns how many entries went.
    pub fn trim(&mut self, config: &PartitionConfig, now_ms: u64) -> usize {
        let ttl = config.precache_recent_ttl_ms;
        let before = self.recent.len() + self.last_check.len();
        self.recent.retain(|_, t| now_ms.saturating_sub(*t) < ttl);
        self.last_check
            .retain(|_, t| now_ms.saturating_sub(*t) < ttl);
        before - self.recent.len() - self.last_check.len()
    }

    /// Drop all queued requests for `map`.
    pub fn clear_map(&mut self, map: MapId) {
        self.queue.retain(|r| r.map != map);
        self.recent.retain(|(m, _, _), _| *m != map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::position::SIZE_OF_GRIDS;

    fn layout() -> GridLayout {
        GridLayout::new(4).unwrap()
    }

    // With four partitions the vertical border sits at grid 32, world x = 0.
    fn near_border() -> Position {
        Position::xy(-SIZE_OF_GRIDS * 0.5, -5_000.0)
    }

    #[test]
    fn heading_across_border_queues_neighbour() {
        let mut q = PrecacheQueue::new();
        let cfg = PartitionConfig::default();
        let l = layout();
        let pos = near_border();
        let from = l.partition_for_position(pos.x, pos.y);
        let out = q.check_approach(&cfg, &l, EntityId(1), MapId(0), pos, (300.0, 0.0), 0);
        let ApproachOutcome::Queued(target) = out else {
            panic!("expected a request, got {out:?}");
        };
        assert_ne!(target, from);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn throttle_and_dedupe() {
        let mut q = PrecacheQueue::new();
        let cfg = PartitionConfig::default();
        let l = layout();
        let pos = near_border();
        let v = (300.0, 0.0);
        assert!(matches!(
            q.check_approach(&cfg, &l, EntityId(1), MapId(0), pos, v, 0),
            ApproachOutcome::Queued(_)
        ));
        assert_eq!(
            q.check_approach(&cfg, &l, EntityId(1), MapId(0), pos, v, 100),
            ApproachOutcome::Throttled
        );
        assert_eq!(
            q.check_approach(&cfg, &l, EntityId(2), MapId(0), pos, v, 100),
            ApproachOutcome::Duplicate
        );
    }

    #[test]
    fn moving_away_is_ignored() {
        let mut q = PrecacheQueue::new();
        let cfg = PartitionConfig::default();
        let out = q.check_approach(
            &cfg,
            &layout(),
            EntityId(1),
            MapId(0),
            near_border(),
            (-300.0, 0.0),
            0,
        );
        assert_eq!(out, ApproachOutcome::NotApproaching);
    }

    #[test]
    fn take_respects_per_tick_and_age() {
        let mut q = PrecacheQueue::new();
        let cfg = PartitionConfig::default();
        for (i, t) in [0u64, 10_000, 10_001, 10_002].into_iter().enumerate() {
            q.queue.push_back(PrecacheRequest {
                map: MapId(0),
                partition: PartitionId(2),
                position: Position::xy(i as f32, 0.0),
                queued_ms: t,
            });
        }
        q.queue.push_back(PrecacheRequest {
            map: MapId(1),
            partition: PartitionId(1),
            position: Position::default(),
            queued_ms: 10_000,
        });
        let got = q.take_for_map(&cfg, MapId(0), 16_000);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].queued_ms, 10_000);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn trim_forgets_old_entries() {
        let mut q = PrecacheQueue::new();
        let cfg = PartitionConfig::default();
        q.check_approach(
            &cfg,
            &layout(),
            EntityId(1),
            MapId(0),
            near_border(),
            (300.0, 0.0),
            0,
        );
        assert_eq!(q.trim(&cfg, 29_999), 0);
        assert_eq!(q.trim(&cfg, 30_000), 2);
    }
}
