//! Benchmark suite for lookup cache operations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lookup_cache::future::{Cache, ScopedCache};
use std::{convert::Infallible, time::Duration};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn value_cache(max_capacity: usize) -> Cache<u64, String, Infallible> {
    Cache::new(max_capacity, Duration::MAX, |key: u64| async move {
        Ok(format!("value-{key}"))
    })
}

/// Benchmark lookups of missing keys into an empty cache.
///
/// Tests cache sizes: 100, 1,000, and 10,000 entries.
fn miss_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("miss");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let cache = value_cache(size);
                for i in 0..size as u64 {
                    let _ = cache.get(&black_box(i)).await;
                }
            });
        });
    }
    group.finish();
}

/// Benchmark read operations on a pre-populated cache.
///
/// Measures the performance of `get()` hits across different cache sizes.
fn hit_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("hit");

    for size in [100, 1000, 10000].iter() {
        let cache = value_cache(*size);
        rt.block_on(async {
            for i in 0..*size as u64 {
                let _ = cache.get(&i).await;
            }
        });

        let cache = &cache;
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                for i in 0..size as u64 {
                    let _ = cache.get(&black_box(i)).await;
                }
            });
        });
    }
    group.finish();
}

/// Benchmark mixed cache operations representing a realistic workload.
///
/// Distribution: 33% sets, 33% gets, 33% contains operations.
fn mixed_operations_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("mixed_ops");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let cache = value_cache(size);
                for i in 0..size as u64 {
                    if i % 3 == 0 {
                        cache.set(black_box(i), black_box(format!("value-{i}")));
                    } else if i % 3 == 1 {
                        let _ = cache.get(&black_box(i)).await;
                    } else {
                        let _ = cache.contains(&black_box(i));
                    }
                }
            });
        });
    }
    group.finish();
}

/// Benchmark LRU eviction performance.
///
/// Looks up 2,000 keys in a cache with capacity of 1,000 to trigger evictions.
fn eviction_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("eviction");

    let cache_size = 1000;
    let lookup_count = 2000;

    group.throughput(Throughput::Elements(lookup_count));
    group.bench_function("lru_eviction", |b| {
        b.to_async(&rt).iter(|| async move {
            let cache = value_cache(cache_size);
            for i in 0..lookup_count {
                let _ = cache.get(&black_box(i)).await;
            }
        });
    });

    group.finish();
}

/// Benchmark concurrent gets of the same keys from many tasks, which exercises
/// the de-duplication of in-flight lookups.
fn concurrent_gets_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("concurrent_gets");

    let num_tasks = 8;
    let num_keys = 1000u64;

    group.throughput(Throughput::Elements(num_tasks * num_keys));
    group.bench_function("8_tasks", |b| {
        b.to_async(&rt).iter(|| async move {
            let cache = value_cache(num_keys as usize);
            let tasks: Vec<_> = (0..num_tasks)
                .map(|_| {
                    let my_cache = cache.clone();
                    tokio::spawn(async move {
                        for i in 0..num_keys {
                            let _ = my_cache.get(&black_box(i)).await;
                        }
                    })
                })
                .collect();
            futures_util::future::join_all(tasks).await;
        });
    });

    group.finish();
}

/// Benchmark borrows from a scoped cache, including the release of evicted
/// resources.
fn scoped_borrow_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("scoped_borrow");

    let size = 1000u64;
    group.throughput(Throughput::Elements(size * 2));
    group.bench_function("borrow_and_evict", |b| {
        b.to_async(&rt).iter(|| async move {
            let cache = ScopedCache::builder(size as usize).build(|key: u64, scope| async move {
                scope.add_finalizer(|| ());
                Ok::<_, Infallible>(vec![key; 16])
            });
            for i in 0..size * 2 {
                let borrowed = cache.get(&black_box(i)).await.unwrap();
                black_box(borrowed.len());
            }
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets = miss_benchmark, hit_benchmark, mixed_operations_benchmark, eviction_benchmark,
              concurrent_gets_benchmark, scoped_borrow_benchmark
}

criterion_main!(benches);
