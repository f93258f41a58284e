use bookwire::{IdempotencyConfig, MemoryStore, RateLimitConfig, RequestEnvelope, SharedStore};
use bookwire_server::dispatcher::{DEFAULT_API_KEY, Dispatcher, DispatcherConfig};
use bookwire_server::handler::HandlerRegistry;
use bookwire_server::handlers::{self, Library};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;

fn library_dispatcher(quota: u32) -> Dispatcher {
    let registry = handlers::register(HandlerRegistry::builder(), Arc::new(Library::new())).build();
    Dispatcher::new(
        DispatcherConfig::default(),
        registry,
        SharedStore::new(MemoryStore::new()),
        RateLimitConfig::new(quota, Duration::from_secs(60)),
        IdempotencyConfig::default(),
    )
    .unwrap()
}

fn benchmark_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    // Full pipeline on a read-only action, rotating identities
    group.bench_function("get_authors", |b| {
        let dispatcher = library_dispatcher(u32::MAX);
        let body = RequestEnvelope::new("get_authors", "v2", json!({}), DEFAULT_API_KEY)
            .to_vec()
            .unwrap();
        let identities: Vec<String> = (0..1000).map(|i| format!("client_{i}")).collect();
        let mut idx = 0;

        b.to_async(&rt).iter(|| {
            idx += 1;
            let identity = &identities[idx % identities.len()];
            let dispatcher = &dispatcher;
            let body = &body;
            async move {
                black_box(
                    dispatcher
                        .execute_body(black_box(body), identity, SystemTime::now())
                        .await,
                )
            }
        });
    });

    // Cache hit on an idempotent create
    group.bench_function("idempotent_replay", |b| {
        let dispatcher = library_dispatcher(u32::MAX);
        let body = RequestEnvelope::new("create_author", "v2", json!({"name": "N. K. Jemisin"}), DEFAULT_API_KEY)
            .with_idempotency_key("bench")
            .to_vec()
            .unwrap();

        b.to_async(&rt).iter(|| async {
            black_box(
                dispatcher
                    .execute_body(black_box(&body), "client", SystemTime::now())
                    .await,
            )
        });
    });

    // Rejected before any handler runs
    group.bench_function("rate_limited", |b| {
        let dispatcher = library_dispatcher(1);
        let body = RequestEnvelope::new("get_authors", "v2", json!({}), DEFAULT_API_KEY)
            .to_vec()
            .unwrap();

        b.to_async(&rt).iter(|| async {
            black_box(
                dispatcher
                    .execute_body(black_box(&body), "client", SystemTime::now())
                    .await,
            )
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_pipeline);
criterion_main!(benches);
