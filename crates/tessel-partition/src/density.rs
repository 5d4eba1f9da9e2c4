//! Density sampling and the split/merge decision.
//!
//! Density is `(players + creatures) / area`, with area in squared world
//! grids. A map's mean density must stay past a threshold for
//! `sustain_samples` consecutive evaluations before it splits or merges,
//! so a single noisy sample never resizes anything.

use tessel_core::DensityConfig;

use crate::registry::StatsSnapshot;

/// Density of one partition. Zero-area partitions count as one grid.
pub fn partition_density(stats: StatsSnapshot, area_in_grids: u32) -> f32 {
    stats.population() as f32 / area_in_grids.max(1) as f32
}

/// What an evaluation concluded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DensityDecision {
    /// Evaluated too recently; nothing sampled.
    Skipped,
    /// Sampled; no threshold sustained.
    Hold {
        /// Mean density across the map's partitions.
        mean: f32,
    },
    /// Sustained high density: resize to `to` partitions.
    Split {
        /// Mean density that triggered the split.
        mean: f32,
        /// Target partition count.
        to: u32,
    },
    /// Sustained low density: resize to `to` partitions.
    Merge {
        /// Mean density that triggered the merge.
        mean: f32,
        /// Target partition count.
        to: u32,
    },
}

/// Evaluation history of one map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DensityState {
    above: u32,
    below: u32,
    last_eval_ms: Option<u64>,
}

impl DensityState {
    /// Consecutive samples above the split threshold.
    pub fn above_streak(&self) -> u32 {
        self.above
    }

    /// Consecutive samples below the merge threshold.
    pub fn below_streak(&self) -> u32 {
        self.below
    }

    /// Feed one sample and decide.
    ///
    /// `count` is the current partition count and `max` the configured
    /// upper bound. A decision that would leave the count unchanged is
    /// reported as `Hold`. Streaks reset after a split or merge.
    pub fn evaluate(
        &mut self,
        config: &DensityConfig,
        densities: &[f32],
        count: u32,
        max: u32,
        now_ms: u64,
    ) -> DensityDecision {
        if let Some(last) = self.last_eval_ms {
            if now_ms.saturating_sub(last) < config.evaluate_interval_ms {
                return DensityDecision::Skipped;
            }
        }
        self.last_eval_ms = Some(now_ms);

        let mean = if densities.is_empty() {
            0.0
        } else {
            densities.iter().sum::<f32>() / densities.len() as f32
        };

        if mean > config.split_threshold {
            self.above += 1;
            self.below = 0;
        } else if mean < config.merge_threshold {
            self.below += 1;
            self.above = 0;
        } else {
            self.above = 0;
            self.below = 0;
        }

        let sustain = config.sustain_samples.max(1);
        if self.above >= sustain && count < max {
            self.above = 0;
            return DensityDecision::Split {
                mean,
                to: count + 1,
            };
        }
        if self.below >= sustain && count > 1 {
            self.below = 0;
            return DensityDecision::Merge {
                mean,
                to: count - 1,
            };
        }
        DensityDecision::Hold { mean }
    }
}
