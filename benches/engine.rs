//! Benchmarks for the decision engine and the fallback store.

use admission_ratelimit::key::{ClientIpResolver, KeyContext, KeyGenerator, RequestInfo, hybrid_key};
use admission_ratelimit::storage::{FallbackStore, GcConfig};
use admission_ratelimit::{ConfigRegistry, MetricsCollector, RateLimiter};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn bench_check_rate_limit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("check_rate_limit");

    group.bench_function("hot_key", |b| {
        let limiter = rt.block_on(async { RateLimiter::new(ConfigRegistry::with_presets()) });
        let request = RequestInfo::new("GET", "/api/items").with_header("x-real-ip", "10.0.0.1");
        b.iter(|| {
            rt.block_on(async {
                black_box(limiter.check_rate_limit(&request, "webhook-api", None).await)
            })
        })
    });

    group.bench_function("distinct_users", |b| {
        let limiter = rt.block_on(async { RateLimiter::new(ConfigRegistry::with_presets()) });
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let request =
                RequestInfo::new("POST", "/api/pay").with_identity(format!("user_{}", i % 1000));
            rt.block_on(async {
                black_box(limiter.check_rate_limit(&request, "payment-api", None).await)
            })
        })
    });

    group.bench_function("unknown_config", |b| {
        let limiter = rt.block_on(async { RateLimiter::new(ConfigRegistry::with_presets()) });
        let request = RequestInfo::new("GET", "/");
        b.iter(|| {
            rt.block_on(async {
                black_box(limiter.check_rate_limit(&request, "NONEXISTENT", None).await)
            })
        })
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("concurrent");

    for tasks in [10usize, 100].iter() {
        group.bench_with_input(BenchmarkId::new("same_key", tasks), tasks, |b, &tasks| {
            let limiter = Arc::new(rt.block_on(async {
                RateLimiter::new(ConfigRegistry::with_presets())
            }));
            b.iter(|| {
                rt.block_on(async {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let limiter = limiter.clone();
                            tokio::spawn(async move {
                                let request = RequestInfo::new("GET", "/")
                                    .with_header("x-real-ip", "10.0.0.2");
                                limiter
                                    .check_rate_limit(&request, "public-api", None)
                                    .await
                                    .is_allowed()
                            })
                        })
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                })
            })
        });
    }

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("fallback_store");

    group.bench_function("hit_same_key", |b| {
        let store = FallbackStore::with_gc(GcConfig::manual());
        b.iter(|| black_box(store.hit("hotkey", Duration::from_secs(60))))
    });

    for num_keys in [100u64, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("hit_spread", num_keys), num_keys, |b, &num_keys| {
            let store = FallbackStore::with_gc(GcConfig::manual());
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("ip:{}", i % num_keys);
                black_box(store.hit(&key, Duration::from_secs(60)))
            })
        });
    }

    group.finish();
}

fn bench_keys_and_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("keys_and_metrics");

    group.bench_function("hybrid_key", |b| {
        let generator = hybrid_key();
        let resolver = ClientIpResolver::default();
        let request = RequestInfo::new("GET", "/api/orders")
            .with_header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .with_identity("user_123");
        b.iter(|| {
            let ctx = KeyContext::resolve(&request, &resolver);
            black_box(generator.generate(&ctx))
        })
    });

    group.bench_function("metrics_snapshot", |b| {
        let rt = Runtime::new().unwrap();
        let limiter = rt.block_on(async { RateLimiter::new(ConfigRegistry::with_presets()) });
        rt.block_on(async {
            for i in 0..500 {
                let request = RequestInfo::new("POST", format!("/api/{}", i % 20))
                    .with_header("x-real-ip", format!("10.1.{}.{}", i / 250, i % 250));
                for _ in 0..4 {
                    limiter.check_rate_limit(&request, "critical-auth", None).await;
                }
            }
        });
        let metrics: &MetricsCollector = limiter.metrics();
        b.iter(|| black_box(metrics.snapshot()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_check_rate_limit,
    bench_concurrent,
    bench_store,
    bench_keys_and_metrics
);
criterion_main!(benches);
