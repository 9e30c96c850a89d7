use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dungeon_core::{
    ClusterGenerator, ClusterId, ClusterSpec, GenerationConfig, LevelPlan, LevelSeed, Point, Rect,
    WalkerIds, WeightVector,
};

fn square_spec(side: i32, seed: u64) -> ClusterSpec {
    ClusterSpec {
        id: ClusterId(0),
        rect: Rect::new(0, 0, side, side),
        start: Point::new(0, 0),
        end: Point::new(side - 1, side - 1),
        expected_weight: WeightVector::ZERO,
        depth: 1,
        seed,
    }
}

fn bench_cluster_fill(c: &mut Criterion) {
    let gen = ClusterGenerator::new(GenerationConfig::default());
    let ids = WalkerIds::new();
    let mut group = c.benchmark_group("cluster_fill");
    for side in [4, 10, 20] {
        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, &side| {
            let spec = square_spec(side, 42);
            b.iter(|| gen.generate(black_box(&spec), &ids))
        });
    }
    group.finish();

    c.bench_function("corridor_fill_3x30", |b| {
        let spec = ClusterSpec {
            rect: Rect::new(0, 0, 3, 30),
            end: Point::new(2, 29),
            ..square_spec(3, 7)
        };
        b.iter(|| gen.generate(black_box(&spec), &ids))
    });
}

fn bench_level(c: &mut Criterion) {
    let config = GenerationConfig {
        level_width: 40,
        level_height: 40,
        ..Default::default()
    };
    let ids = WalkerIds::new();

    c.bench_function("partition_40x40", |b| {
        b.iter(|| LevelPlan::partition(&config, black_box(LevelSeed::new(42, 3))))
    });

    c.bench_function("generate_parallel_40x40", |b| {
        let plan = LevelPlan::partition(&config, LevelSeed::new(42, 3)).unwrap();
        b.iter(|| plan.generate_parallel(&config, &ids))
    });

    c.bench_function("validation_hash_40x40", |b| {
        let plan = LevelPlan::partition(&config, LevelSeed::new(42, 3)).unwrap();
        let level = plan.generate_parallel(&config, &ids).unwrap();
        b.iter(|| black_box(&level).validation_hash())
    });
}

criterion_group!(benches, bench_cluster_fill, bench_level);
criterion_main!(benches);
