//! End-to-end generation scenarios
//!
//! - 10x10 cluster with a zero budget
//! - Narrow clusters fall back to corridors
//! - Monster-heavy and treasure-heavy sibling clusters
//! - Full levels: stitching, determinism, depth scaling, config files

use dungeon_core::{
    ClusterGenerator, ClusterId, ClusterSpec, GenerationConfig, Level, LevelPlan, LevelSeed,
    Point, Rect, RoomType, TableContentBalancer, WalkerIds, WeightVector,
};

// ============================================================
// Helpers
// ============================================================

fn spec(rect: Rect, start: Point, end: Point, budget: f64, seed: u64) -> ClusterSpec {
    ClusterSpec {
        id: ClusterId(0),
        rect,
        start,
        end,
        expected_weight: WeightVector::with_balance(budget),
        depth: 1,
        seed,
    }
}

// ============================================================
// 1. Single clusters
// ============================================================

#[test]
fn ten_by_ten_cluster_with_zero_budget() {
    let config = GenerationConfig {
        cluster_weight_range: 200.0,
        ..Default::default()
    };
    let s = spec(Rect::new(0, 0, 10, 10), Point::new(0, 0), Point::new(9, 9), 0.0, 2024);
    let cluster = ClusterGenerator::new(config)
        .generate(&s, &WalkerIds::new())
        .expect("10x10 cluster must generate");

    assert_eq!(cluster.cells.len(), 100);
    assert_eq!(cluster.visited_count(), 100);
    assert!(
        (-200.0..=200.0).contains(&cluster.balance()),
        "final balance {} out of range",
        cluster.balance()
    );
    assert!(cluster.walker_count >= 1);
}

#[test]
fn narrow_cluster_is_a_corridor_without_content() {
    let s = spec(Rect::new(0, 0, 12, 3), Point::new(0, 1), Point::new(11, 1), -60.0, 5);
    let cluster = ClusterGenerator::new(GenerationConfig::default())
        .generate(&s, &WalkerIds::new())
        .unwrap();

    assert_eq!(cluster.visited_count(), 36);
    assert_eq!(cluster.count_rooms(RoomType::Normal), 36);
    assert_eq!(cluster.negative_rooms_count, 0);
    assert_eq!(cluster.balance(), 0.0, "corridors carry no weight");
}

#[test]
fn sibling_budgets_pull_in_opposite_directions() {
    let gen = ClusterGenerator::new(GenerationConfig::default());
    let ids = WalkerIds::new();
    let rect = Rect::new(0, 0, 10, 10);

    let monsters = gen
        .generate(&spec(rect, Point::new(0, 0), Point::new(9, 9), -120.0, 31), &ids)
        .unwrap();
    let treasure = gen
        .generate(&spec(rect, Point::new(0, 0), Point::new(9, 9), 120.0, 31), &ids)
        .unwrap();

    assert!(monsters.balance() < treasure.balance());
    assert!(monsters.count_rooms(RoomType::Monster) > treasure.count_rooms(RoomType::Monster));
    assert!(monsters.negative_rooms_count > 0);
}

#[test]
fn walker_ids_are_shared_across_clusters() {
    let gen = ClusterGenerator::new(GenerationConfig::default());
    let ids = WalkerIds::new();
    let a = gen
        .generate(&spec(Rect::new(0, 0, 10, 10), Point::new(0, 0), Point::new(9, 9), 0.0, 1), &ids)
        .unwrap();
    let b = gen
        .generate(&spec(Rect::new(0, 0, 10, 10), Point::new(0, 0), Point::new(9, 9), 0.0, 2), &ids)
        .unwrap();
    assert!(ids.issued() as usize >= a.walker_count + b.walker_count);
}

// ============================================================
// 2. Whole levels
// ============================================================

#[test]
fn level_generation_is_deterministic_per_seed() {
    let config = GenerationConfig::default();
    let plan = LevelPlan::partition(&config, LevelSeed::new(99, 2)).unwrap();
    let a = plan.generate_parallel(&config, &WalkerIds::new()).unwrap();
    let b = plan.generate_parallel(&config, &WalkerIds::new()).unwrap();
    assert_eq!(a.validation_hash(), b.validation_hash());

    let other = LevelPlan::partition(&config, LevelSeed::new(100, 2))
        .unwrap()
        .generate_parallel(&config, &WalkerIds::new())
        .unwrap();
    assert_ne!(a.validation_hash(), other.validation_hash());
}

#[test]
fn uneven_level_with_corridor_edges() {
    let config = GenerationConfig {
        level_width: 27,
        level_height: 13,
        ..Default::default()
    };
    let plan = LevelPlan::partition(&config, LevelSeed::new(4, 1)).unwrap();
    // 3 columns x 2 rows, right column and bottom row are narrow
    assert_eq!(plan.cluster_count(), 6);

    let level = plan.generate_parallel(&config, &WalkerIds::new()).unwrap();
    assert_eq!(level.rooms.len(), 27 * 13);
    assert!(level.room_graph().is_reachable(level.start, level.end));
    assert_eq!(level.render_ascii().lines().count(), 13);
}

#[test]
fn deeper_levels_lean_toward_the_dungeon() {
    let config = GenerationConfig {
        depth_balance_step: -40.0,
        ..Default::default()
    };
    let shallow = LevelPlan::partition(&config, LevelSeed::new(8, 1)).unwrap();
    let deep = LevelPlan::partition(&config, LevelSeed::new(8, 4)).unwrap();
    assert_eq!(shallow.expected_weight.balance(), 0.0);
    assert!((deep.expected_weight.balance() - -120.0).abs() < 1e-9);

    let level = deep.generate_parallel(&config, &WalkerIds::new()).unwrap();
    let drift = (level.net_weight.balance() - deep.expected_weight.balance()).abs();
    assert!(drift <= config.convergence_tolerance * deep.cluster_count() as f64);
}

#[test]
fn assembled_level_accepts_content_and_exploration() {
    let config = GenerationConfig::default();
    let plan = LevelPlan::partition(&config, LevelSeed::new(21, 1)).unwrap();
    let mut level: Level = plan.generate_parallel(&config, &WalkerIds::new()).unwrap();

    level.attach_content(&TableContentBalancer);
    let treasure = level
        .rooms
        .values()
        .find(|r| r.room_type == RoomType::Treasure)
        .map(|r| r.point);
    if let Some(p) = treasure {
        let room = level.visit(p).unwrap();
        assert!(room.visited);
        assert!(room.content.is_some());
        assert!(level.overlay.contains(p));
    }
    assert!(level.overlay.contains(level.start));
}

#[test]
fn config_file_drives_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dungeon.ron");
    std::fs::write(
        &path,
        "(level_width: 12, level_height: 8, cluster_width: 6, cluster_height: 8, cluster_retries: 4)",
    )
    .unwrap();

    let config = GenerationConfig::load(&path).unwrap();
    let plan = LevelPlan::partition(&config, LevelSeed::new(1, 1)).unwrap();
    assert_eq!(plan.cluster_count(), 2);
    let level = plan.generate_parallel(&config, &WalkerIds::new()).unwrap();
    assert_eq!(level.rooms.len(), 96);
}
