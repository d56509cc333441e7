//! Criterion benchmarks for the cache hot paths.
//!
//! 1. `get` hit on a small plain value
//! 2. `get` hit on a compressed equity curve
//! 3. `set` under eviction pressure

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pidash_core::{CacheSettings, MetricKind, MetricPayload, TieredCache};
use serde_json::{json, Value};
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

fn equity_payload(points: usize) -> MetricPayload {
    let curve: Vec<Value> = (0..points)
        .map(|i| {
            json!({
                "timestamp": format!("2024-01-01T{:02}:{:02}:00", (i / 60) % 24, i % 60),
                "balance": 1000.0 + i as f64,
                "pnl": i as f64 * 0.5,
            })
        })
        .collect();
    let mut payload = MetricPayload::synthesized(MetricKind::EquityCurve, "bench");
    payload.fields.insert("equity_curve".into(), Value::Array(curve));
    payload
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get");

    let cache: TieredCache<MetricPayload> = TieredCache::default();
    cache.set("portfolio", MetricPayload::synthesized(MetricKind::Portfolio, "bench"), HOUR);
    group.bench_function("plain_hit", |b| {
        b.iter(|| black_box(cache.get(black_box("portfolio"))))
    });

    for points in [100usize, 1000] {
        let cache: TieredCache<MetricPayload> = TieredCache::default();
        cache.set("equity", equity_payload(points), HOUR);
        group.bench_with_input(BenchmarkId::new("compressed_hit", points), &points, |b, _| {
            b.iter(|| black_box(cache.get(black_box("equity"))))
        });
    }

    group.finish();
}

fn bench_set_with_eviction(c: &mut Criterion) {
    let cache: TieredCache<MetricPayload> = TieredCache::new(CacheSettings {
        max_size: 256,
        ..CacheSettings::default()
    });
    let payload = MetricPayload::synthesized(MetricKind::TradingPerformance, "bench");
    let mut i = 0u64;
    c.bench_function("cache_set_evicting", |b| {
        b.iter(|| {
            i += 1;
            cache.set(format!("k{i}"), payload.clone(), HOUR);
        })
    });
}

criterion_group!(benches, bench_get, bench_set_with_eviction);
criterion_main!(benches);
