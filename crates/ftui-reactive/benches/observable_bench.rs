//! Benchmarks for observable fan-out and combinator cascades.
//!
//! Performance budgets:
//! - `update` with 1 subscriber: < 100ns
//! - `update` with 64 subscribers: < 2µs
//! - 8-input `merge_all` re-emit: < 2µs
//!
//! Run with: cargo bench -p ftui-reactive --bench observable_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ftui_reactive::{Observable, ObservingOptions, merge_all};
use std::hint::black_box;

// =============================================================================
// Fan-out
// =============================================================================

fn bench_update_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("observable/update");

    for subscribers in [1usize, 8, 64] {
        group.throughput(Throughput::Elements(subscribers as u64));
        let obs = Observable::new(0u64);
        let _tokens: Vec<_> = (0..subscribers)
            .map(|_| {
                obs.subscribe(|v| {
                    black_box(*v);
                })
            })
            .collect();
        group.bench_with_input(
            BenchmarkId::new("fanout", subscribers),
            &obs,
            |b, obs| {
                let mut i = 0u64;
                b.iter(|| {
                    i = i.wrapping_add(1);
                    obs.update(black_box(i));
                });
            },
        );
    }

    group.finish();
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let obs = Observable::new(0u64);
    c.bench_function("observable/subscribe_unsubscribe", |b| {
        b.iter(|| {
            let token = obs.subscribe(|v| {
                black_box(*v);
            });
            obs.unsubscribe(black_box(&token));
        });
    });
}

// =============================================================================
// Combinators
// =============================================================================

fn bench_map_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("observable/map_chain");

    for depth in [1usize, 4, 16] {
        let source = Observable::new(0u64);
        let mut tail = source.map(|v| v + 1);
        for _ in 1..depth {
            tail = tail.map(|v| v + 1);
        }
        group.bench_with_input(BenchmarkId::new("depth", depth), &source, |b, source| {
            let mut i = 0u64;
            b.iter(|| {
                i = i.wrapping_add(1);
                source.update(black_box(i));
            });
        });
        black_box(tail.value());
    }

    group.finish();
}

fn bench_merge_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("observable/merge_all");

    for inputs in [2usize, 8] {
        let sources: Vec<_> = (0..inputs).map(|i| Observable::new(i as u64)).collect();
        let merged = merge_all(&sources, ObservingOptions::empty());
        group.throughput(Throughput::Elements(inputs as u64));
        group.bench_with_input(BenchmarkId::new("inputs", inputs), &sources, |b, sources| {
            let mut i = 0u64;
            b.iter(|| {
                i = i.wrapping_add(1);
                sources[0].update(black_box(i));
            });
        });
        black_box(merged.value());
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_update_fanout,
    bench_subscribe_unsubscribe,
    bench_map_chain,
    bench_merge_all
);
criterion_main!(benches);
