use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use redrate::memory::MemoryStore;
use redrate::{ConcurrencyLimit, Limit, Limiter};
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn warm_limiter(rt: &Runtime) -> Limiter {
    let limiter = Limiter::with_defaults(MemoryStore::new());
    rt.block_on(limiter.load_scripts()).unwrap();
    limiter
}

fn benchmark_single_calls(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("single_call");
    group.throughput(Throughput::Elements(1));

    group.bench_function("allow_single_key", |b| {
        let limiter = warm_limiter(&rt);
        let limit = Limit::per_second(1_000_000);
        b.to_async(&rt).iter(|| {
            let limiter = limiter.clone();
            async move {
                let res = limiter.allow(black_box("bench"), limit).await.unwrap();
                black_box(res.allowed)
            }
        });
    });

    group.bench_function("allow_rotating_keys_1000", |b| {
        let limiter = warm_limiter(&rt);
        let limit = Limit::per_minute(100);
        let mut counter = 0u64;
        b.to_async(&rt).iter(|| {
            counter += 1;
            let key = format!("key_{}", counter % 1000);
            let limiter = limiter.clone();
            async move {
                let res = limiter.allow(black_box(&key), limit).await.unwrap();
                black_box(res.allowed)
            }
        });
    });

    group.bench_function("take_release", |b| {
        let limiter = warm_limiter(&rt);
        let limit = ConcurrencyLimit::new(10, Duration::from_secs(30));
        b.to_async(&rt).iter(|| {
            let limiter = limiter.clone();
            async move {
                let res = limiter.take("jobs", "req", limit).await.unwrap();
                limiter.release("jobs", "req").await.unwrap();
                black_box(res.allowed)
            }
        });
    });

    group.finish();
}

fn benchmark_pipeline_sizes(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pipeline");

    for size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("mixed_ops", size), &size, |b, &size| {
            let limiter = warm_limiter(&rt);
            let limit = Limit::per_second(1_000_000);
            let lease = ConcurrencyLimit::new(1_000_000, Duration::from_secs(30));
            b.to_async(&rt).iter(|| {
                let mut pipe = limiter.pipeline();
                for i in 0..size {
                    match i % 3 {
                        0 => drop(pipe.allow(&format!("r{i}"), limit)),
                        1 => drop(pipe.take(&format!("c{i}"), "req", lease)),
                        _ => pipe.release(&format!("c{}", i - 1), "req"),
                    }
                }
                async move { pipe.exec().await.unwrap() }
            });
        });
    }

    group.finish();
}

fn benchmark_cache_recovery(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("cache_recovery");

    group.bench_function("allow_after_flush", |b| {
        let store = MemoryStore::new();
        let limiter = Limiter::with_defaults(store.clone());
        b.to_async(&rt).iter(|| {
            store.flush_scripts();
            let limiter = limiter.clone();
            async move {
                let res = limiter.allow("k", Limit::per_second(1_000_000)).await.unwrap();
                black_box(res.allowed)
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_single_calls,
    benchmark_pipeline_sizes,
    benchmark_cache_recovery
);
criterion_main!(benches);
