//! Ordered tree benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use emberdb_core::{AvlTree, Comparator, RangeQuery};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

fn comparator() -> Comparator<u64> {
    Arc::new(|a: &u64, b: &u64| a.cmp(b))
}

fn shuffled_keys(count: u64) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..count).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(3));
    keys
}

fn filled_tree(count: u64) -> AvlTree<u64, u64> {
    let mut tree = AvlTree::new(true, comparator());
    for key in shuffled_keys(count) {
        tree.insert(key, key).unwrap();
    }
    tree
}

/// Benchmark building a tree from shuffled keys.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_insert");

    for count in [1_000u64, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*count));
        let keys = shuffled_keys(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &keys, |b, keys| {
            b.iter(|| {
                let mut tree = AvlTree::new(true, comparator());
                for key in keys {
                    tree.insert(*key, *key).unwrap();
                }
                black_box(tree.height())
            });
        });
    }
    group.finish();
}

/// Benchmark point lookups.
fn bench_search(c: &mut Criterion) {
    let tree = filled_tree(100_000);
    c.bench_function("tree_search", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = (key + 7_919) % 100_000;
            black_box(tree.search(&key))
        });
    });
}

/// Benchmark bounded range scans.
fn bench_between_bounds(c: &mut Criterion) {
    let tree = filled_tree(100_000);
    let mut group = c.benchmark_group("tree_between_bounds");

    for width in [10u64, 1_000].iter() {
        let query = RangeQuery::new().gte(50_000).lt(50_000 + width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &query, |b, query| {
            b.iter(|| black_box(tree.between_bounds(query)));
        });
    }
    group.finish();
}

/// Benchmark delete followed by re-insert of the same key.
fn bench_delete(c: &mut Criterion) {
    let mut tree = filled_tree(100_000);
    c.bench_function("tree_delete_reinsert", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = (key + 104_729) % 100_000;
            tree.delete(&key, None);
            tree.insert(key, key).unwrap();
        });
    });
}

criterion_group!(benches, bench_insert, bench_search, bench_between_bounds, bench_delete);
criterion_main!(benches);
