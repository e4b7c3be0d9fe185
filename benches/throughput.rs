//! Throughput benchmarks for the store and its indexes.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::Store;
use ordered_float::NotNan;

/// Benchmark string SET/GET against the key index
fn bench_strings(c: &mut Criterion) {
    let mut group = c.benchmark_group("strings");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut store = Store::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key, Bytes::from_static(b"small_value")).unwrap();
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut store = Store::new();
        let value = Bytes::from("x".repeat(1024));
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key, value.clone()).unwrap();
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut store = Store::new();
        for i in 0..100_000u64 {
            store
                .set(
                    Bytes::from(format!("key:{}", i)),
                    Bytes::from(format!("value:{}", i)),
                )
                .unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(store.get(key.as_bytes()).unwrap());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut store = Store::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(store.get(key.as_bytes()).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark sorted-set insertion and queries
fn bench_sorted_sets(c: &mut Criterion) {
    let mut group = c.benchmark_group("zset");
    group.throughput(Throughput::Elements(1));

    group.bench_function("zadd", |b| {
        let mut store = Store::new();
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("member:{}", i);
            let score = NotNan::new((i % 1000) as f64).unwrap();
            store
                .zadd(Bytes::from_static(b"board"), score, name.as_bytes())
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("zscore", |b| {
        let mut store = Store::new();
        for i in 0..100_000u64 {
            let name = format!("member:{}", i);
            let score = NotNan::new((i % 1000) as f64).unwrap();
            store
                .zadd(Bytes::from_static(b"board"), score, name.as_bytes())
                .unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("member:{}", i % 100_000);
            let zset = store.zset_mut(b"board").unwrap().unwrap();
            black_box(zset.lookup(name.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("rank_walk", |b| {
        let mut store = Store::new();
        for i in 0..100_000u64 {
            let name = format!("member:{}", i);
            let score = NotNan::new(i as f64).unwrap();
            store
                .zadd(Bytes::from_static(b"board"), score, name.as_bytes())
                .unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let zset = store.zset(b"board").unwrap().unwrap();
            let start = zset
                .seekge(NotNan::new((i % 90_000) as f64).unwrap(), b"")
                .unwrap();
            black_box(zset.offset(start, 100));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark TTL scheduling churn
fn bench_ttl(c: &mut Criterion) {
    let mut group = c.benchmark_group("ttl");
    group.throughput(Throughput::Elements(1));

    group.bench_function("pexpire_reschedule", |b| {
        let mut store = Store::new();
        for i in 0..10_000u64 {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key.clone(), Bytes::from_static(b"v")).unwrap();
            store.pexpire(&key, 1_000_000, 0);
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            store.pexpire(key.as_bytes(), 1_000_000 + (i % 977) as i64, 0);
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_strings, bench_sorted_sets, bench_ttl);
criterion_main!(benches);
