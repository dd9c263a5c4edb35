//! Performance benchmarks for resilient-cache
//!
//! This benchmark suite measures:
//! - Engine set/get across payload sizes (both sides of the compression threshold)
//! - Tag and prefix invalidation
//! - The resilience wrapper overhead on a healthy call
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use resilient_cache::backend::InMemoryBackend;
use resilient_cache::resilience::{ResilienceManager, ResilienceOptions, ServiceError};
use resilient_cache::serialization::JsonCodec;
use resilient_cache::{CacheConfig, CacheEngine, SetOptions};
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Benchmark Fixtures
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
struct Listing {
    id: u64,
    title: String,
    description: String,
}

impl Listing {
    fn new(id: u64, size: usize) -> Self {
        Listing {
            id,
            title: format!("2019 Volkswagen Golf #{}", id),
            description: "a".repeat(size),
        }
    }
}

fn engine() -> CacheEngine<InMemoryBackend> {
    CacheEngine::new(InMemoryBackend::new(), CacheConfig::default())
}

// ============================================================================
// Group 1: Engine reads and writes
// ============================================================================

fn engine_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for size in [100, 1_000, 10_000, 100_000].iter() {
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("set", size), size, |b, &size| {
                let engine = engine();
                let listing = Listing::new(1, size);
                let options = SetOptions::new(300).tag("listings");

                b.to_async(&rt).iter(|| async {
                    engine
                        .set(black_box("listing:1"), black_box(&listing), &options)
                        .await
                });
            });

        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("get_hit", size), size, |b, &size| {
                let engine = engine();
                rt.block_on(async {
                    engine
                        .set("listing:1", &Listing::new(1, size), &SetOptions::new(300))
                        .await;
                });

                b.to_async(&rt)
                    .iter(|| async { engine.get::<Listing>(black_box("listing:1")).await });
            });

        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("get_hit_json", size), size, |b, &size| {
                let engine =
                    CacheEngine::with_codec(InMemoryBackend::new(), JsonCodec, CacheConfig::default());
                rt.block_on(async {
                    engine
                        .set("listing:1", &Listing::new(1, size), &SetOptions::new(300))
                        .await;
                });

                b.to_async(&rt)
                    .iter(|| async { engine.get::<Listing>(black_box("listing:1")).await });
            });
    }

    group.bench_function("get_miss", |b| {
        let engine = engine();
        b.to_async(&rt)
            .iter(|| async { engine.get::<Listing>(black_box("listing:missing")).await });
    });

    group.bench_function("get_many_10", |b| {
        let engine = engine();
        let keys: Vec<String> = (0..10).map(|i| format!("listing:{}", i)).collect();
        rt.block_on(async {
            for (i, key) in keys.iter().enumerate() {
                engine
                    .set(key, &Listing::new(i as u64, 500), &SetOptions::new(300))
                    .await;
            }
        });
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();

        b.to_async(&rt)
            .iter(|| async { engine.get_many::<Listing>(black_box(&refs)).await });
    });

    group.finish();
}

// ============================================================================
// Group 2: Invalidation
// ============================================================================

fn invalidation_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for members in [1u64, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("by_tag", members),
            members,
            |b, &members| {
                let engine = engine();
                b.to_async(&rt).iter(|| async {
                    // Setup: tag `members` entries before each invalidation
                    for id in 0..members {
                        engine
                            .set(
                                &format!("listing:{}", id),
                                &id,
                                &SetOptions::new(300).tag("stock"),
                            )
                            .await;
                    }
                    engine.invalidate_by_tag(black_box("stock")).await
                });
            },
        );
    }

    group.bench_function("by_prefix_100", |b| {
        let engine = engine();
        b.to_async(&rt).iter(|| async {
            for id in 0..100u64 {
                engine
                    .set(&format!("search:{}", id), &id, &SetOptions::new(300))
                    .await;
            }
            engine.invalidate_by_prefix(black_box("search:")).await
        });
    });

    group.finish();
}

// ============================================================================
// Group 3: Resilience wrapper
// ============================================================================

fn resilience_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("resilience");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    group.bench_function("healthy_call", |b| {
        let manager = ResilienceManager::default();
        b.to_async(&rt).iter(|| async {
            manager
                .execute_with_resilience(
                    || async { Ok::<u32, ServiceError>(black_box(7)) },
                    ResilienceOptions::new("valuations"),
                )
                .await
        });
    });

    group.bench_function("healthy_call_with_fallback_key", |b| {
        let manager = ResilienceManager::default();
        let counter = AtomicU64::new(0);
        b.to_async(&rt).iter(|| async {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            manager
                .execute_with_resilience(
                    move || async move { Ok::<u64, ServiceError>(n) },
                    ResilienceOptions::new("valuations").fallback_cache_key("valuation:latest"),
                )
                .await
        });
    });

    group.finish();
}

// ============================================================================
// Benchmark Registration
// ============================================================================

criterion_group!(
    benches,
    engine_benchmarks,
    invalidation_benchmarks,
    resilience_benchmarks
);
criterion_main!(benches);
