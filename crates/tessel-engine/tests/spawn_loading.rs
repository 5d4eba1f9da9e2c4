//! Layer-aware spawn loading through `Fabric::spawn_loader`.

use std::sync::Arc;

use tessel_core::{
    ConfigHandle, EntityId, FabricConfig, LayerConfig, LayerId, MapId, Position, SpawnConfig,
    SpawnKind, ZoneId,
};
use tessel_engine::{CloneDiagnostics, Fabric, SpawnLoader};
use tessel_test_utils::{
    init_test_tracing, spawn_record, InlinePool, ManualClock, MemoryWorldData, RecordingMetrics,
    RecordingSpawner,
};

const MAP: MapId = MapId(530);
const ZONE: ZoneId = ZoneId(3_524);
const OTHER_ZONE: ZoneId = ZoneId(3_525);
const SPOT: Position = Position { x: 100.0, y: 100.0, z: 0.0 };

struct Setup {
    fabric: Fabric,
    loader: SpawnLoader,
    spawner: Arc<RecordingSpawner>,
    metrics: Arc<RecordingMetrics>,
}

fn setup(config: FabricConfig, world: MemoryWorldData) -> Setup {
    init_test_tracing();
    let metrics = Arc::new(RecordingMetrics::new());
    let fabric = Fabric::new(
        Arc::new(ConfigHandle::new(config).unwrap()),
        Arc::new(ManualClock::new(0)),
        metrics.clone(),
        Arc::new(InlinePool::new(2)),
    );
    let spawner = Arc::new(RecordingSpawner::new());
    let loader = fabric.spawn_loader(Arc::new(world), spawner.clone());
    Setup {
        fabric,
        loader,
        spawner,
        metrics,
    }
}

fn world(records: &[(u64, SpawnKind, ZoneId)]) -> MemoryWorldData {
    let mut w = MemoryWorldData::new();
    for &(id, kind, zone) in records {
        w.add(MAP, spawn_record(id, kind, 100 + id as u32, zone, SPOT));
    }
    w
}

fn open_layers(s: &Setup, zone: ZoneId, n: usize) {
    for _ in 0..n {
        s.fabric.layers().create_layer(MAP, zone).unwrap();
    }
}

#[test]
fn layering_off_spawns_one_unlayered_instance() {
    let s = setup(
        FabricConfig {
            layer: LayerConfig {
                enabled: false,
                ..LayerConfig::default()
            },
            ..FabricConfig::default()
        },
        world(&[(1, SpawnKind::Creature, ZONE), (2, SpawnKind::GameObject, ZONE)]),
    );
    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    assert_eq!(load.spawned.len(), 2);
    assert!(load.spawned.iter().all(|i| i.layer.is_none() && !i.clone));
    assert!(load.diagnostics.is_empty());
}

#[test]
fn one_instance_per_active_layer() {
    let s = setup(FabricConfig::default(), world(&[(1, SpawnKind::Creature, ZONE)]));
    open_layers(&s, ZONE, 2);

    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    let layers: Vec<_> = load.spawned.iter().map(|i| (i.layer, i.clone)).collect();
    assert_eq!(
        layers,
        vec![
            (Some(LayerId(0)), false),
            (Some(LayerId(1)), true),
            (Some(LayerId(2)), true)
        ]
    );
    for i in &load.spawned {
        assert_eq!(s.fabric.layers().layer_for_npc(i.entity), i.layer);
    }
    let calls = s.spawner.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.map == MAP && c.spawn_id == 1));
}

#[test]
fn empty_zone_skips_clones_when_configured() {
    let s = setup(
        FabricConfig {
            spawn: SpawnConfig {
                skip_clone_spawns_if_no_players: true,
                ..SpawnConfig::default()
            },
            ..FabricConfig::default()
        },
        world(&[(1, SpawnKind::Creature, ZONE)]),
    );
    open_layers(&s, ZONE, 2);

    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    assert_eq!(load.spawned.len(), 1);
    assert_eq!(load.spawned[0].layer, Some(LayerId::BASE));
    assert!(!load.spawned[0].clone);

    s.fabric
        .layers()
        .auto_assign_player(MAP, ZONE, EntityId(1))
        .unwrap();
    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    assert_eq!(load.spawned.len(), 3);
}

#[test]
fn go_layering_is_independent_of_npc_layering() {
    let s = setup(
        FabricConfig {
            layer: LayerConfig {
                go_layering: false,
                ..LayerConfig::default()
            },
            ..FabricConfig::default()
        },
        world(&[(1, SpawnKind::Creature, ZONE), (2, SpawnKind::GameObject, ZONE)]),
    );
    open_layers(&s, ZONE, 1);

    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    let objects: Vec<_> = load
        .spawned
        .iter()
        .filter(|i| i.kind == SpawnKind::GameObject)
        .collect();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].layer, None);
    assert_eq!(s.fabric.layers().layer_for_go(objects[0].entity), None);
    assert_eq!(
        load.spawned
            .iter()
            .filter(|i| i.kind == SpawnKind::Creature)
            .count(),
        2
    );
}

#[test]
fn bad_records_are_skipped_and_the_grid_continues() {
    let mut w = world(&[
        (1, SpawnKind::Creature, ZONE),
        (2, SpawnKind::Creature, ZONE),
        (3, SpawnKind::Creature, ZONE),
    ]);
    w.remove_template(SpawnKind::Creature, 101);
    let s = setup(FabricConfig::default(), w);
    s.spawner.fail_spawn(2);

    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    assert_eq!(load.skipped, 2);
    assert_eq!(load.spawned.len(), 1);
    assert_eq!(load.spawned[0].spawn_id, 3);
    // The missing template never reaches the spawner.
    assert!(s.spawner.calls().iter().all(|c| c.spawn_id != 1));
}

#[test]
fn clone_metrics_and_diagnostics_accumulate() {
    let s = setup(
        FabricConfig {
            spawn: SpawnConfig {
                emit_per_layer_clone_metrics: true,
                ..SpawnConfig::default()
            },
            ..FabricConfig::default()
        },
        world(&[(1, SpawnKind::Creature, ZONE), (2, SpawnKind::GameObject, ZONE)]),
    );
    open_layers(&s, ZONE, 2);

    let first = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    assert_eq!(first.diagnostics.total_clones(), 4);
    assert_eq!(
        first
            .diagnostics
            .get(ZONE, LayerId(2), SpawnKind::GameObject)
            .map(|d| d.count),
        Some(1)
    );
    assert_eq!(s.metrics.counter_total("layer_clone_spawn_count"), 4);
    let sample = &s.metrics.named("layer_clone_spawn_count")[0];
    assert_eq!(sample.tag("map_id"), Some("530"));
    assert_eq!(sample.tag("zone_id"), Some("3524"));
    assert_eq!(sample.tag("layer_id"), Some("1"));
    assert_eq!(sample.tag("type"), Some("creature"));
    assert_eq!(s.metrics.named("layer_clone_spawn_ms").len(), 4);

    let second = s.loader.load_grid(MAP, SPOT.grid(), first.diagnostics);
    assert_eq!(second.diagnostics.total_clones(), 8);
}

#[test]
fn clone_metrics_are_quiet_by_default() {
    let s = setup(FabricConfig::default(), world(&[(1, SpawnKind::Creature, ZONE)]));
    open_layers(&s, ZONE, 1);
    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    assert_eq!(load.spawned.len(), 2);
    assert!(load.diagnostics.is_empty());
    assert!(s.metrics.named("layer_clone_spawn_count").is_empty());
}

#[test]
fn diagnostics_window_enables_clone_timing() {
    let s = setup(FabricConfig::default(), world(&[(1, SpawnKind::Creature, ZONE)]));
    open_layers(&s, ZONE, 1);
    s.fabric.layers().enable_runtime_diagnostics();
    let load = s.loader.load_grid(MAP, SPOT.grid(), CloneDiagnostics::new());
    assert_eq!(load.diagnostics.total_clones(), 1);
}

#[test]
fn new_layer_gets_clones_of_its_zone_only() {
    let s = setup(
        FabricConfig::default(),
        world(&[
            (1, SpawnKind::Creature, ZONE),
            (2, SpawnKind::GameObject, ZONE),
            (3, SpawnKind::Creature, OTHER_ZONE),
        ]),
    );
    open_layers(&s, ZONE, 1);
    let load = s
        .loader
        .load_layer_clones(MAP, SPOT.grid(), LayerId(1), CloneDiagnostics::new());
    let ids: Vec<_> = load.spawned.iter().map(|i| i.spawn_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(load
        .spawned
        .iter()
        .all(|i| i.clone && i.layer == Some(LayerId(1))));
}
