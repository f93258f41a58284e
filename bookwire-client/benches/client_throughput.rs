use bookwire::broker::{Broker, MemoryBroker, QueueSpec, REQUEST_QUEUE};
use bookwire::{IdempotencyConfig, MemoryStore, RateLimitConfig, SharedStore};
use bookwire_client::{ClientBuilder, RpcClient};
use bookwire_server::dispatcher::{Dispatcher, DispatcherConfig};
use bookwire_server::handler::HandlerRegistry;
use bookwire_server::handlers::{self, Library};
use bookwire_server::transport::{Transport, broker::BrokerTransport};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn setup_server_and_client(rt: &Runtime, workers: usize) -> Arc<RpcClient> {
    rt.block_on(async {
        let broker = Arc::new(MemoryBroker::new());
        broker
            .declare_queue(QueueSpec::durable(REQUEST_QUEUE))
            .await
            .unwrap();

        // Quota high enough to never reject during a run
        let registry =
            handlers::register(HandlerRegistry::builder(), Arc::new(Library::new())).build();
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            registry,
            SharedStore::new(MemoryStore::new()),
            RateLimitConfig::new(u32::MAX, Duration::from_secs(1)),
            IdempotencyConfig::default(),
        )
        .unwrap();

        let transport = BrokerTransport::new(broker.clone(), workers);
        tokio::spawn(async move {
            transport.start(Arc::new(dispatcher)).await.unwrap();
        });

        let client = ClientBuilder::new()
            .request_timeout(Duration::from_secs(30))
            .connect(broker)
            .await
            .unwrap();
        Arc::new(client)
    })
}

fn benchmark_single_request(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = setup_server_and_client(&rt, 1);

    c.bench_function("client_single_request", |b| {
        b.to_async(&rt).iter(|| async {
            client
                .call(client.request("get_authors", "v2", json!({})))
                .await
                .unwrap()
        });
    });
}

fn benchmark_concurrent_requests(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = setup_server_and_client(&rt, 4);

    let mut group = c.benchmark_group("client_concurrent");

    for num_tasks in [1, 5, 10, 20].iter() {
        group.throughput(Throughput::Elements(*num_tasks as u64));
        group.bench_with_input(format!("tasks_{num_tasks}"), num_tasks, |b, &num_tasks| {
            b.to_async(&rt).iter(|| async {
                let mut handles = vec![];

                for _ in 0..num_tasks {
                    let client = Arc::clone(&client);
                    handles.push(tokio::spawn(async move {
                        client
                            .call(client.request("get_authors", "v2", json!({})))
                            .await
                            .unwrap()
                    }));
                }

                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    }

    group.finish();
}

fn benchmark_idempotent_replay(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = setup_server_and_client(&rt, 1);

    let create = client
        .request("create_author", "v2", json!({"name": "Ursula K. Le Guin"}))
        .with_idempotency_key("bench-author");

    c.bench_function("client_idempotent_replay", |b| {
        b.to_async(&rt).iter(|| async {
            client.call(create.clone()).await.unwrap()
        });
    });
}

criterion_group!(
    benches,
    benchmark_single_request,
    benchmark_concurrent_requests,
    benchmark_idempotent_replay
);
criterion_main!(benches);
