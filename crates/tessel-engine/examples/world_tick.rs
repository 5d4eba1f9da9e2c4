//! Tessel world tick: a partitioned map driven by a worker pool.
//!
//! Demonstrates:
//!   1. Loading a `FabricConfig` from TOML
//!   2. Starting a `ThreadPool` and building a `Fabric`
//!   3. Implementing `TickHandler` for a toy population of wanderers
//!   4. Relaying a combat event across a partition border
//!   5. Polling `schedule_partition_updates` from a fixed-rate tick loop
//!
//! Run with:
//!   RUST_LOG=map.partition=debug cargo run --example world_tick

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tessel_core::{
    ConfigHandle, EntityId, FabricConfig, MapId, NoopMetrics, PartitionId, Position, SystemClock,
    ZoneId,
};
use tessel_engine::{
    Fabric, ObjectTick, PlayerSample, RelayDisposition, ThreadPool, TickContext, TickHandler,
};
use tessel_relay::{RelayEnvelope, RelayEvent};

// ─── Configuration ──────────────────────────────────────────────

const CONFIG: &str = r#"
[partition]
maps = [0]
default_count = 4

[scheduler]
worker_threads = 4
slow_cycle_ms = 40
"#;

const MAP: MapId = MapId(0);
const ZONE: ZoneId = ZoneId(1);
const TICK: Duration = Duration::from_millis(50);

// ─── Gameplay ───────────────────────────────────────────────────
//
// Players walk east at a fixed speed. Combat relays are applied by
// whichever partition owns the attacker when the event is drained.

struct Wanderers {
    positions: Mutex<HashMap<EntityId, Position>>,
    owner: Mutex<HashMap<EntityId, PartitionId>>,
    applied: Mutex<u32>,
}

impl TickHandler for Wanderers {
    fn players(&self, _map: MapId) -> Vec<PlayerSample> {
        self.positions
            .lock()
            .unwrap()
            .iter()
            .map(|(&player, &position)| PlayerSample {
                player,
                position,
                zone: ZONE,
            })
            .collect()
    }

    fn apply_relay(&self, ctx: &TickContext, envelope: &RelayEnvelope) -> RelayDisposition {
        let owner = self.owner.lock().unwrap().get(&envelope.event.subject()).copied();
        match owner {
            Some(p) if p != ctx.partition => RelayDisposition::Forward(p),
            Some(_) => {
                *self.applied.lock().unwrap() += 1;
                RelayDisposition::Applied
            }
            None => RelayDisposition::Skipped,
        }
    }

    fn update_player(&self, ctx: &TickContext, player: EntityId) -> Option<Position> {
        let step = 4.0 * ctx.player_diff_ms() as f32 / 1_000.0 * 60.0;
        let mut positions = self.positions.lock().unwrap();
        let pos = positions.get_mut(&player)?;
        pos.x += step;
        self.owner.lock().unwrap().insert(player, ctx.partition);
        Some(*pos)
    }

    fn update_objects(&self, _ctx: &TickContext) -> ObjectTick {
        ObjectTick {
            creatures: 25,
            moved: Vec::new(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(ConfigHandle::new(FabricConfig::from_toml_str(CONFIG)?)?);
    let pool = Arc::new(ThreadPool::from_config(&config.current().scheduler)?);
    let fabric = Fabric::new(
        Arc::clone(&config),
        Arc::new(SystemClock),
        Arc::new(NoopMetrics),
        pool.clone(),
    );

    let positions = (0..64u64)
        .map(|i| {
            let x = -3_000.0 + (i % 8) as f32 * 700.0;
            let y = -3_000.0 + (i / 8) as f32 * 700.0;
            (EntityId(i + 1), Position::xy(x, y))
        })
        .collect();
    let handler = Arc::new(Wanderers {
        positions: Mutex::new(positions),
        owner: Mutex::new(HashMap::new()),
        applied: Mutex::new(0),
    });
    let runtime = fabric.load_map(MAP, handler.clone())?;

    let relays = fabric
        .partitions()
        .relay_store(MAP)
        .ok_or("map 0 is not partitioned")?;

    for tick in 0..40u32 {
        let start = Instant::now();
        if tick % 5 == 0 {
            // Attacker 1 hits target 64 from across the map.
            relays.enqueue(
                PartitionId(1),
                RelayEvent::Combat(tessel_relay::CombatRelay {
                    owner: EntityId(1),
                    victim: EntityId(64),
                    initial_aggro: tick == 0,
                }),
            );
        }
        while !runtime.schedule_partition_updates(TICK.as_millis() as u32, 0) {
            std::thread::sleep(Duration::from_micros(200));
        }
        if tick % 10 == 0 {
            fabric.maintenance();
        }
        if let Some(elapsed) = TICK.checked_sub(start.elapsed()) {
            std::thread::sleep(elapsed);
        }
    }

    let m = runtime.last_cycle_metrics().unwrap_or_default();
    println!(
        "cycles: {}  last cycle: {} partitions, in-flight {}, run {}us",
        runtime.cycles_completed(),
        m.partitions,
        m.max_in_flight,
        m.run_total_us
    );
    for p in fabric.partitions().partition_ids(MAP) {
        let stats = fabric.partitions().partition_stats(MAP, p).unwrap_or_default();
        println!(
            "  partition {p}: players {:>3}  creatures {:>3}  boundary {:>3}",
            stats.players, stats.creatures, stats.boundary_objects
        );
    }
    println!("combat relays applied: {}", handler.applied.lock().unwrap());

    fabric.unload_map(MAP);
    let report = pool.shutdown();
    println!("pool stopped: {} workers joined", report.workers_joined);
    Ok(())
}
