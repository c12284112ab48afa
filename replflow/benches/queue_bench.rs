//! Benchmarks for the bounded hand-off queue.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use replflow::message::{StreamKey, SyncMessage};
use replflow::queue::BoundedQueue;
use std::sync::Arc;

const MESSAGES: u64 = 10_000;

fn record(id: u64) -> SyncMessage {
    SyncMessage::record(StreamKey::new("users"), serde_json::json!({ "id": id }))
}

/// Single producer and single consumer on separate tasks, across capacities.
fn bench_queue_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_handoff");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("tokio runtime");

    group.throughput(Throughput::Elements(MESSAGES));
    for capacity in [1, 16, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    rt.block_on(async {
                        let queue = Arc::new(BoundedQueue::new(capacity));
                        let producer = {
                            let queue = Arc::clone(&queue);
                            tokio::spawn(async move {
                                for id in 0..MESSAGES {
                                    queue.send(record(id)).await;
                                }
                                queue.close();
                            })
                        };
                        let mut received = 0u64;
                        while let Some(message) = queue.receive().await {
                            black_box(message);
                            received += 1;
                        }
                        producer.await.expect("producer");
                        black_box(received)
                    })
                });
            },
        );
    }

    group.finish();
}

/// Uncontended send then receive on one task.
fn bench_queue_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_uncontended");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let queue = BoundedQueue::new(16);
    let message = record(1);

    group.throughput(Throughput::Elements(1));
    group.bench_function("send_receive", |b| {
        b.iter(|| {
            rt.block_on(async {
                queue.send(black_box(message.clone())).await;
                black_box(queue.receive().await)
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_queue_handoff, bench_queue_uncontended);
criterion_main!(benches);
