//! Layer imbalance detection and consolidation planning.
//!
//! A (map, zone) is imbalanced when the coefficient of variation of its
//! layer populations exceeds the configured threshold *and* at least one
//! layer has fallen below the per-layer player floor. Consolidation then
//! drains the sparsest non-base layer into the densest layer that still
//! has room, a bounded batch per evaluation.

use std::sync::atomic::{AtomicU64, Ordering};

use tessel_core::{EntityId, LayerId, MapId, RebalanceConfig, ZoneId};

use crate::manager::RemovedLayer;

/// Population standard deviation divided by the mean. Zero for an empty
/// or unpopulated set.
pub fn coefficient_of_variation(counts: &[u32]) -> f32 {
    if counts.is_empty() {
        return 0.0;
    }
    let n = counts.len() as f64;
    let mean = counts.iter().map(|&c| f64::from(c)).sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = counts
        .iter()
        .map(|&c| {
            let d = f64::from(c) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (variance.sqrt() / mean) as f32
}

/// Whether the layer populations call for consolidation.
pub fn should_rebalance(counts: &[(LayerId, u32)], config: &RebalanceConfig) -> bool {
    if counts.len() < 2 {
        return false;
    }
    let below_floor = counts
        .iter()
        .any(|&(_, c)| c < config.min_players_per_layer);
    let values: Vec<u32> = counts.iter().map(|&(_, c)| c).collect();
    below_floor && coefficient_of_variation(&values) > config.imbalance_threshold
}

/// Pick `(source, target)`: the sparsest non-base layer (ties to the
/// highest id) and the densest other layer below `capacity` (ties to the
/// lowest id).
pub fn plan_consolidation(counts: &[(LayerId, u32)], capacity: u32) -> Option<(LayerId, LayerId)> {
    let &(source, _) = counts
        .iter()
        .filter(|(id, _)| !id.is_base())
        .min_by_key(|&&(id, c)| (c, std::cmp::Reverse(id)))?;
    let &(target, _) = counts
        .iter()
        .filter(|&&(id, c)| id != source && c < capacity)
        .max_by_key(|&&(id, c)| (c, std::cmp::Reverse(id)))?;
    Some((source, target))
}

/// Outcome of one rebalancing evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RebalanceDecision {
    /// Layering or rebalancing is off, or the zone has a single layer.
    Skipped,
    /// Populations are within tolerance.
    Balanced {
        /// Coefficient of variation observed.
        cv: f32,
    },
    /// Imbalanced, but no layer has room to absorb players.
    NoTarget {
        /// Coefficient of variation observed.
        cv: f32,
    },
    /// Imbalanced, waiting out the destruction cooldown.
    Deferred {
        /// Coefficient of variation observed.
        cv: f32,
    },
    /// Drain `source` into `target`.
    Consolidate {
        /// Coefficient of variation observed.
        cv: f32,
        /// Layer to drain.
        source: LayerId,
        /// Layer to fill.
        target: LayerId,
    },
}

/// What one consolidation pass did.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsolidationReport {
    /// Map consolidated.
    pub map: MapId,
    /// Zone consolidated.
    pub zone: ZoneId,
    /// Drained layer.
    pub source: LayerId,
    /// Filled layer.
    pub target: LayerId,
    /// Players moved, in id order.
    pub migrated: Vec<EntityId>,
    /// The source layer, if the pass emptied and removed it.
    pub removed: Option<RemovedLayer>,
}

/// Lifetime rebalancing counters.
#[derive(Debug, Default)]
pub struct RebalancingMetrics {
    total_rebalances: AtomicU64,
    players_migrated: AtomicU64,
    layers_consolidated: AtomicU64,
}

impl RebalancingMetrics {
    pub(crate) fn record(&self, report: &ConsolidationReport) {
        self.total_rebalances.fetch_add(1, Ordering::Relaxed);
        self.players_migrated
            .fetch_add(report.migrated.len() as u64, Ordering::Relaxed);
        if report.removed.is_some() {
            self.layers_consolidated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy out the counters.
    pub fn snapshot(&self) -> RebalancingSnapshot {
        RebalancingSnapshot {
            total_rebalances: self.total_rebalances.load(Ordering::Relaxed),
            players_migrated: self.players_migrated.load(Ordering::Relaxed),
            layers_consolidated: self.layers_consolidated.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RebalancingMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebalancingSnapshot {
    /// Consolidation passes run.
    pub total_rebalances: u64,
    /// Players moved by consolidation.
    pub players_migrated: u64,
    /// Layers removed after being drained.
    pub layers_consolidated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RebalanceConfig {
        RebalanceConfig {
            min_players_per_layer: 5,
            imbalance_threshold: 0.3,
            ..RebalanceConfig::default()
        }
    }

    #[test]
    fn cv_of_uniform_and_skewed_sets() {
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert_eq!(coefficient_of_variation(&[0, 0]), 0.0);
        assert_eq!(coefficient_of_variation(&[10, 10, 10]), 0.0);
        // mean 5, deviations ±5: stddev 5, cv 1.
        assert!((coefficient_of_variation(&[0, 10]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn needs_both_skew_and_a_sparse_layer() {
        let c = cfg();
        assert!(!should_rebalance(&[(LayerId(0), 3)], &c));
        assert!(should_rebalance(&[(LayerId(0), 40), (LayerId(1), 2)], &c));
        // Skewed but every layer above the floor.
        assert!(!should_rebalance(&[(LayerId(0), 40), (LayerId(1), 10)], &c));
        // Sparse but even.
        assert!(!should_rebalance(&[(LayerId(0), 4), (LayerId(1), 4)], &c));
    }

    #[test]
    fn plan_drains_sparsest_non_base_into_densest_with_room() {
        let counts = [
            (LayerId(0), 1),
            (LayerId(1), 30),
            (LayerId(2), 2),
            (LayerId(3), 2),
        ];
        assert_eq!(plan_consolidation(&counts, 100), Some((LayerId(3), LayerId(1))));
        assert_eq!(plan_consolidation(&counts, 30), Some((LayerId(3), LayerId(2))));
        assert_eq!(plan_consolidation(&[(LayerId(0), 5)], 100), None);
        assert_eq!(
            plan_consolidation(&[(LayerId(0), 10), (LayerId(1), 1)], 10),
            None
        );
    }
}
