//! Storage backend benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use emberdb_storage::{FileBackend, InMemoryBackend, LogBackend, LogKind};
use tempfile::TempDir;

fn sample_line(size: usize) -> String {
    let payload: String = (0..size).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    format!(r#"{{"_id":"x","payload":"{payload}"}}"#)
}

/// Benchmark InMemoryBackend appends.
fn bench_inmemory_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_append");

    for size in [64, 256, 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let backend = InMemoryBackend::new();
            let line = sample_line(size);
            b.iter(|| backend.append_line(LogKind::Data, black_box(&line)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark FileBackend appends, one line and batches.
fn bench_file_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_append");
    group.sample_size(30);

    for batch in [1usize, 100].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            let dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&dir.path().join("bench.db")).unwrap();
            backend.init().unwrap();
            let lines = vec![sample_line(256); batch];
            b.iter(|| backend.append_lines(LogKind::Data, black_box(&lines)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark crash-safe rewrites.
fn bench_file_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_rewrite");
    group.sample_size(20);

    for count in [100usize, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&dir.path().join("bench.db")).unwrap();
            backend.init().unwrap();
            let line = sample_line(128);
            b.iter(|| {
                let mut lines = std::iter::repeat(line.clone()).take(count);
                backend.rewrite(LogKind::Data, &mut lines).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark reading a full log.
fn bench_file_read(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let backend = FileBackend::open(&dir.path().join("bench.db")).unwrap();
    backend.init().unwrap();
    backend
        .append_lines(LogKind::Data, &vec![sample_line(128); 10_000])
        .unwrap();

    c.bench_function("file_read_10000", |b| {
        b.iter(|| {
            let mut count = 0usize;
            backend
                .read_lines(LogKind::Data, &mut |line| count += line.len())
                .unwrap();
            black_box(count)
        });
    });
}

criterion_group!(
    benches,
    bench_inmemory_append,
    bench_file_append,
    bench_file_rewrite,
    bench_file_read,
);
criterion_main!(benches);
