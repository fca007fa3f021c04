use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dbtoolkit_core::cache::query::QueryCacheConfig;
use dbtoolkit_core::cache::{Cache, MemoryCache, QueryCache, QueryParams};
use dbtoolkit_core::database::QueryOutcome;
use dbtoolkit_core::OperationLock;
use serde_json::json;
use std::time::Duration;

fn outcome() -> QueryOutcome {
    QueryOutcome::rows(
        vec!["id".into(), "name".into()],
        (0..20).map(|i| vec![json!(i), json!("row")]).collect(),
    )
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut params = QueryParams::new();
    params.insert("id".into(), json!(42));
    params.insert("status".into(), json!("active"));

    c.bench_function("query_fingerprint", |b| {
        b.iter(|| {
            QueryCache::fingerprint(
                black_box("c1"),
                black_box("SELECT *\n  FROM users WHERE id = :id AND status = :status"),
                black_box(&params),
            )
        })
    });
}

fn benchmark_query_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_cache_set_at_capacity");

    for capacity in [100usize, 1000] {
        let cache = QueryCache::with_config(QueryCacheConfig {
            max_entries: capacity,
            ..Default::default()
        });
        let result = outcome();
        let params = QueryParams::new();
        let mut i = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| {
                i += 1;
                let query = format!("SELECT * FROM t WHERE id = {}", i);
                black_box(cache.set_result("c1", &query, &params, &result));
            })
        });
    }

    group.finish();

    let cache = QueryCache::new();
    let params = QueryParams::new();
    cache.set_result("c1", "SELECT * FROM users", &params, &outcome());

    c.bench_function("query_cache_hit", |b| {
        b.iter(|| black_box(cache.get_result("c1", black_box("SELECT * FROM users"), &params)))
    });
}

fn benchmark_invalidate_connection(c: &mut Criterion) {
    c.bench_function("schema_cache_invalidate_connection", |b| {
        let cache: MemoryCache<serde_json::Value> = MemoryCache::new();
        b.iter(|| {
            for i in 0..50 {
                cache.set(format!("c{}:tables:public", i % 5), json!(["users"]), None);
            }
            black_box(cache.invalidate_connection(black_box("c1")));
        })
    });
}

fn benchmark_lock(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let lock = OperationLock::new(Duration::from_secs(30));

    c.bench_function("lock_acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let guard = lock
                    .acquire_scoped(black_box("c1"), Duration::from_millis(10), false)
                    .await
                    .unwrap();
                black_box(guard);
            })
        })
    });
}

criterion_group!(
    benches,
    benchmark_fingerprint,
    benchmark_query_cache,
    benchmark_invalidate_connection,
    benchmark_lock
);
criterion_main!(benches);
