//! Benchmarks for the index-backed priority queue.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use drover::PriorityQueue;
use uuid::Uuid;

fn filled(size: usize) -> (PriorityQueue<Uuid, i64>, Vec<Uuid>) {
    let mut queue = PriorityQueue::with_capacity(size);
    let mut keys = Vec::with_capacity(size);
    for i in 0..size {
        let key = Uuid::new_v4();
        #[allow(clippy::cast_possible_wrap)]
        queue.push(key, (i as i64 * 7919) % 1009);
        keys.push(key);
    }
    (queue, keys)
}

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("push");
    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled(size),
                |(mut queue, _)| {
                    queue.push(Uuid::new_v4(), black_box(-500));
                    queue
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("pop");
    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled(size).0,
                |mut queue| {
                    black_box(queue.pop());
                    queue
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled(size),
                |(mut queue, keys)| {
                    black_box(queue.update(&keys[size / 2], -1));
                    queue
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove");
    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled(size),
                |(mut queue, keys)| {
                    black_box(queue.remove(&keys[size / 2]));
                    queue
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_push, bench_pop, bench_update, bench_remove);
criterion_main!(benches);
