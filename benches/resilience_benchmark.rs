//! Performance benchmarks for offline-kit
//!
//! This benchmark suite measures:
//! - CacheStore operations (put, hit, expired-miss)
//! - Query key normalization
//! - Backoff delay computation
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use offline_kit::alert::{Alert, AlertQuery};
use offline_kit::cache::{CachePayload, CacheStore, ListSnapshot};
use offline_kit::key::QueryKeyBuilder;
use offline_kit::retry::RetryPolicy;
use offline_kit::storage::InMemoryStorage;
use std::hint::black_box;

fn list_snapshot(items: usize) -> CachePayload {
    let alerts = (0..items)
        .map(|i| Alert {
            id: format!("a-{}", i),
            title: format!("sighting {}", i),
            description: Some("benchmark payload".to_string()),
            category: "wildlife".to_string(),
            level: (i % 6) as u8,
            latitude: 40.0 + i as f64 * 0.001,
            longitude: -74.0 - i as f64 * 0.001,
            reported_at_ms: 1_700_000_000_000 + i as u64,
        })
        .collect();
    CachePayload::AlertsList(ListSnapshot {
        query: AlertQuery::near(40.0, -74.0, 50),
        items: alerts,
    })
}

fn cache_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_store");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("put", size), &size, |b, &size| {
            let cache = CacheStore::new(InMemoryStorage::new());
            let payload = list_snapshot(size);
            b.iter(|| {
                rt.block_on(async {
                    cache
                        .put("alerts:bench", black_box(payload.clone()), None)
                        .await
                        .expect("Put should succeed");
                })
            });
        });

        group.bench_with_input(BenchmarkId::new("get_hit", size), &size, |b, &size| {
            let cache = CacheStore::new(InMemoryStorage::new());
            rt.block_on(async {
                cache
                    .put("alerts:bench", list_snapshot(size), None)
                    .await
                    .expect("Put should succeed");
            });
            b.iter(|| {
                rt.block_on(async {
                    black_box(cache.get("alerts:bench").await);
                })
            });
        });
    }

    group.finish();
}

fn key_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_keys");

    let query = AlertQuery::near(40.712776, -74.005974, 25)
        .with_category("wildlife")
        .with_min_level(2);

    group.bench_function("list_key", |b| {
        b.iter(|| QueryKeyBuilder::list_key(black_box(&query)))
    });

    group.bench_function("alert_key", |b| {
        b.iter(|| QueryKeyBuilder::alert_key(black_box("a-123456")))
    });

    group.finish();
}

fn backoff_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_backoff");
    let policy = RetryPolicy::default();

    group.bench_function("delay_for_attempt", |b| {
        b.iter(|| {
            for attempt in 1..=10u32 {
                black_box(policy.delay_for_attempt(black_box(attempt)));
            }
        })
    });

    group.bench_function("jittered_delay", |b| {
        b.iter(|| black_box(policy.jittered_delay_for_attempt(black_box(5))))
    });

    group.finish();
}

criterion_group!(benches, cache_benchmarks, key_benchmarks, backoff_benchmarks);
criterion_main!(benches);
