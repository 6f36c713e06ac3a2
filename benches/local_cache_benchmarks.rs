//! L1 Cache Benchmarks
//!
//! Throughput of the in-process tier: hits, inserts below capacity, and
//! inserts that force an LRU eviction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::time::Duration;
use tiercache_core::cache::{codec, CacheValue, LocalCache};

const TTL: Duration = Duration::from_secs(300);

fn benchmark_get(c: &mut Criterion) {
    let cache = LocalCache::new(10_000);
    for i in 0..10_000 {
        cache.set(&format!("key:{i}"), CacheValue::from(format!("value:{i}")), TTL);
    }

    c.bench_function("l1_get_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 10_000;
            black_box(cache.get(&format!("key:{i}")))
        });
    });

    c.bench_function("l1_get_miss", |b| {
        b.iter(|| black_box(cache.get("absent")));
    });
}

fn benchmark_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("l1_set");
    for capacity in [100usize, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("with_eviction", capacity),
            &capacity,
            |b, &capacity| {
                let cache = LocalCache::new(capacity);
                for i in 0..capacity {
                    cache.set(&format!("seed:{i}"), CacheValue::from("v"), TTL);
                }
                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    black_box(cache.set(&format!("new:{i}"), CacheValue::from("v"), TTL))
                });
            },
        );
    }
    group.finish();
}

fn benchmark_codec(c: &mut Criterion) {
    let value = CacheValue::Json(json!({"symbol": "AAPL", "price": 150.25, "volume": 1_000_000}));
    let encoded = codec::encode("bench", &value).unwrap().into_bytes();

    c.bench_function("codec_encode_json", |b| {
        b.iter(|| black_box(codec::encode("bench", &value).unwrap()));
    });
    c.bench_function("codec_decode_json", |b| {
        b.iter(|| black_box(codec::decode("bench", encoded.clone()).unwrap()));
    });
}

criterion_group!(benches, benchmark_get, benchmark_set, benchmark_codec);
criterion_main!(benches);
