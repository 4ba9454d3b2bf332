use criterion::{Criterion, criterion_group, criterion_main};
use outbox::{InMemoryEventPublisher, InMemoryOutboxRepository, OutboxConfig, OutboxRelay};
use serde_json::json;

fn bench_sweep(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("outbox/save_and_sweep_100", |b| {
        b.to_async(&rt).iter(|| async {
            let relay = OutboxRelay::new(
                InMemoryOutboxRepository::new(),
                InMemoryEventPublisher::new(),
                OutboxConfig {
                    batch_size: 100,
                    ..OutboxConfig::default()
                },
            );
            for i in 0..100 {
                relay
                    .save_event(format!("order-{i}"), "order.created", json!({"seq": i}))
                    .await
                    .unwrap();
            }
            relay.process_pending().await.unwrap()
        });
    });
}

criterion_group!(benches, bench_sweep);
criterion_main!(benches);
