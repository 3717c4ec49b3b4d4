//! Benchmarks for M-Tree inserts and queries

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use oxidb_mtree::{
    EuclideanDistance, FarthestPairSplit, FeatureVector, MTreeConfig, MTreeIndex, MemoryPageFile, RandomSplit,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

type BenchTree<S = FarthestPairSplit> =
    MTreeIndex<FeatureVector, EuclideanDistance, MemoryPageFile<FeatureVector, f64>, S>;

fn random_vectors(seed: u64, count: u64, dimension: usize) -> Vec<FeatureVector> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| FeatureVector::new(id, (0..dimension).map(|_| rng.gen::<f64>()).collect()))
        .collect()
}

fn build_tree(points: &[FeatureVector], capacity: usize) -> BenchTree {
    let config = MTreeConfig::builder().capacity(capacity).build().unwrap();
    let mut tree = MTreeIndex::in_memory(config, EuclideanDistance).unwrap();
    for p in points {
        tree.insert(p.clone()).unwrap();
    }
    tree
}

/// Benchmark building a tree from scratch
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.measurement_time(Duration::from_secs(10));

    let size = 2_000;
    let points = random_vectors(1, size, 8);
    group.throughput(Throughput::Elements(size));
    for capacity in [8, 32] {
        group.bench_with_input(BenchmarkId::new("farthest_pair", capacity), &capacity, |b, &capacity| {
            b.iter(|| black_box(build_tree(&points, capacity)));
        });
    }

    group.bench_function("random_split/32", |b| {
        b.iter_batched(
            || {
                let config = MTreeConfig::builder().capacity(32).build().unwrap();
                let tree: BenchTree<RandomSplit> =
                    MTreeIndex::create(config, EuclideanDistance, MemoryPageFile::new(), RandomSplit::new(7)).unwrap();
                tree
            },
            |mut tree| {
                for p in &points {
                    tree.insert(p.clone()).unwrap();
                }
                black_box(tree)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark range and k-NN queries against a prebuilt tree
fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");
    let points = random_vectors(2, 10_000, 8);
    let tree = build_tree(&points, 32);
    let queries = random_vectors(3, 100, 8);

    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("range_query/0.3", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(tree.range_query(q, 0.3).unwrap());
            }
        });
    });
    for k in [1, 10] {
        group.bench_with_input(BenchmarkId::new("knn", k), &k, |b, &k| {
            b.iter(|| {
                for q in &queries {
                    black_box(tree.k_nearest_neighbors(q, k).unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_queries);
criterion_main!(benches);
