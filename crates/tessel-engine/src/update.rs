//! One partition's share of a map tick.
//!
//! A [`PartitionUpdate`] runs on a worker thread and walks five phases in
//! order: drain relays, update players, update objects, flush the boundary
//! batch, publish stats. Timings of each phase are collected; a task that
//! takes longer than `slow_phase_ms` logs the breakdown.

use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;
use tessel_core::{Clock, EntityId, MetricTag, MetricsSink, PartitionId, Position};
use tessel_partition::PartitionManager;
use tessel_relay::{RelayKind, RelayStore};
use tessel_space::BoundaryUpdate;

use crate::buckets::BucketSet;
use crate::handler::{RelayDisposition, TickContext, TickHandler};

/// Services shared by every partition update of a map.
#[derive(Clone)]
pub struct UpdateEnv {
    /// Partition registry and boundary state.
    pub partitions: Arc<PartitionManager>,
    /// Gameplay callbacks.
    pub handler: Arc<dyn TickHandler>,
    /// Metric sink.
    pub metrics: Arc<dyn MetricsSink>,
    /// Game clock.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for UpdateEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEnv").finish_non_exhaustive()
    }
}

/// Microseconds spent in each phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Relay drain and apply.
    pub relays_us: u64,
    /// Player updates.
    pub players_us: u64,
    /// Creature and object updates.
    pub objects_us: u64,
    /// Boundary batch flush.
    pub boundary_us: u64,
    /// Stats publication.
    pub stats_us: u64,
}

impl PhaseTimings {
    /// Sum of all phases.
    pub fn total_us(&self) -> u64 {
        self.relays_us + self.players_us + self.objects_us + self.boundary_us + self.stats_us
    }
}

/// Outcome of one partition update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionReport {
    /// Relays applied here.
    pub relays_applied: u32,
    /// Relays forwarded to another partition.
    pub relays_forwarded: u32,
    /// Relays discarded: bounce limit reached or target queue full.
    pub relays_dropped: u32,
    /// Players still in the world after their update.
    pub players: u32,
    /// Creatures reported by the handler.
    pub creatures: u32,
    /// Boundary set size after the flush.
    pub boundary_objects: u32,
    /// Per-phase timings.
    pub phases: PhaseTimings,
}

#[derive(Default)]
struct BoundaryBatch {
    updates: Vec<BoundaryUpdate>,
    pins: Vec<(EntityId, PartitionId)>,
    leaving: Vec<EntityId>,
}

#[derive(Clone, Copy)]
struct KindLatency {
    kind: RelayKind,
    total_ms: u64,
    max_ms: u64,
    count: u32,
}

/// Work for one partition in one cycle.
pub struct PartitionUpdate {
    env: UpdateEnv,
    ctx: TickContext,
    buckets: Arc<BucketSet>,
    relays: Option<Arc<RelayStore>>,
    emit_relay_metrics: bool,
    slow_phase_ms: u64,
}

impl PartitionUpdate {
    /// Prepare the update of `ctx.partition`.
    pub fn new(
        env: UpdateEnv,
        ctx: TickContext,
        buckets: Arc<BucketSet>,
        emit_relay_metrics: bool,
        slow_phase_ms: u64,
    ) -> Self {
        let relays = env.partitions.relay_store(ctx.map);
        Self {
            env,
            ctx,
            buckets,
            relays,
            emit_relay_metrics,
            slow_phase_ms,
        }
    }

    /// Run every phase.
    pub fn run(self) -> PartitionReport {
        let mut report = PartitionReport::default();
        let mut batch = BoundaryBatch::default();

        let t = Instant::now();
        self.relay_phase(&mut report);
        report.phases.relays_us = t.elapsed().as_micros() as u64;

        let t = Instant::now();
        for &player in self.buckets.bucket(self.ctx.partition) {
            let Some(pos) = self.env.handler.update_player(&self.ctx, player) else {
                continue;
            };
            report.players += 1;
            self.track_boundary(&mut batch, player, pos);
        }
        report.phases.players_us = t.elapsed().as_micros() as u64;

        let t = Instant::now();
        let objects = self.env.handler.update_objects(&self.ctx);
        report.creatures = objects.creatures;
        for (entity, pos) in objects.moved {
            self.track_boundary(&mut batch, entity, pos);
        }
        report.phases.objects_us = t.elapsed().as_micros() as u64;

        let t = Instant::now();
        self.flush_boundary(batch);
        report.phases.boundary_us = t.elapsed().as_micros() as u64;

        let t = Instant::now();
        report.boundary_objects = self.publish_stats(report.players, report.creatures);
        report.phases.stats_us = t.elapsed().as_micros() as u64;

        let total_us = report.phases.total_us();
        if total_us >= self.slow_phase_ms.saturating_mul(1_000) {
            tracing::warn!(
                target: "map.partition.slow",
                map = %self.ctx.map,
                partition = %self.ctx.partition,
                total_us,
                relays_us = report.phases.relays_us,
                players_us = report.phases.players_us,
                objects_us = report.phases.objects_us,
                boundary_us = report.phases.boundary_us,
                stats_us = report.phases.stats_us,
                players = report.players,
                creatures = report.creatures,
                "slow partition update"
            );
        }
        report
    }

    fn relay_phase(&self, report: &mut PartitionReport) {
        let Some(relays) = self.relays.as_deref() else {
            return;
        };
        let partition = self.ctx.partition;
        if !relays.has_pending(partition) {
            return;
        }
        let now = self.env.clock.now_ms();
        let mut latency: SmallVec<[KindLatency; 8]> = SmallVec::new();

        for envelope in relays.drain(partition) {
            if self.emit_relay_metrics {
                let kind = envelope.kind();
                let ms = envelope.latency_ms(now);
                // Drain output is grouped by kind.
                match latency.last_mut() {
                    Some(l) if l.kind == kind => {
                        l.total_ms += ms;
                        l.max_ms = l.max_ms.max(ms);
                        l.count += 1;
                    }
                    _ => latency.push(KindLatency {
                        kind,
                        total_ms: ms,
                        max_ms: ms,
                        count: 1,
                    }),
                }
            }

            match self.env.handler.apply_relay(&self.ctx, &envelope) {
                RelayDisposition::Applied => report.relays_applied += 1,
                RelayDisposition::Skipped => {}
                RelayDisposition::Forward(target) if target != partition => {
                    match relays.bounce(target, envelope) {
                        Some(outcome) if outcome.is_queued() => report.relays_forwarded += 1,
                        _ => report.relays_dropped += 1,
                    }
                }
                RelayDisposition::Forward(_) => report.relays_dropped += 1,
            }
        }

        for l in latency {
            let tags = [
                MetricTag::new("map_id", self.ctx.map),
                MetricTag::new("partition_id", partition),
                MetricTag::new("type", l.kind.name()),
            ];
            self.env.metrics.value(
                "partition_relay_latency_ms",
                l.total_ms as f64 / f64::from(l.count),
                &tags,
            );
            self.env
                .metrics
                .value("partition_relay_latency_max_ms", l.max_ms as f64, &tags);
        }
    }

    fn track_boundary(&self, batch: &mut BoundaryBatch, entity: EntityId, pos: Position) {
        let (map, partition) = (self.ctx.map, self.ctx.partition);
        let parts = &self.env.partitions;
        if parts.is_near_boundary(map, pos.x, pos.y) {
            batch.updates.push(BoundaryUpdate {
                entity,
                x: pos.x,
                y: pos.y,
            });
            batch.pins.push((entity, partition));
        } else if parts.is_in_boundary_set(map, partition, entity) {
            batch.leaving.push(entity);
        }
    }

    fn flush_boundary(&self, batch: BoundaryBatch) {
        let (map, partition) = (self.ctx.map, self.ctx.partition);
        let parts = &self.env.partitions;
        if !batch.updates.is_empty() {
            parts.update_boundary_positions(map, partition, &batch.updates);
            parts.set_batch_overrides(&batch.pins);
        }
        if !batch.leaving.is_empty() {
            let removed = parts.unregister_boundary_batch(map, partition, &batch.leaving);
            tracing::trace!(target: "map.partition", map = %map, partition = %partition, removed, "boundary objects left the band");
        }
    }

    fn publish_stats(&self, players: u32, creatures: u32) -> u32 {
        let (map, partition) = (self.ctx.map, self.ctx.partition);
        let parts = &self.env.partitions;
        parts.update_partition_stats(map, partition, players, creatures);
        let boundary = parts.boundary_count(map, partition) as u32;
        parts.set_boundary_object_count(map, partition, boundary);

        let tags = [
            MetricTag::new("map_id", map),
            MetricTag::new("partition_id", partition),
        ];
        let m = &self.env.metrics;
        m.value("partition_players", f64::from(players), &tags);
        m.value("partition_creatures", f64::from(creatures), &tags);
        m.value("partition_boundary_objects", f64::from(boundary), &tags);
        m.value(
            "partition_visibility_count",
            parts.visibility_count(map, partition) as f64,
            &tags,
        );
        boundary
    }
}
