//! Throughput of priority-queued delivery through one recipient's inbox.

use std::sync::Arc;

use abathur_swarm::domain::models::message::{Message, MessagePriority, MessageType};
use abathur_swarm::services::message_bus::{MessageBus, MessageHandler};
use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

struct NullHandler;

#[async_trait]
impl MessageHandler for NullHandler {
    async fn handle(&self, _message: Message) -> Result<(), String> {
        Ok(())
    }
}

fn bench_send(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("message_bus_send");

    for recipients in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(recipients), &recipients, |b, &recipients| {
            b.to_async(&rt).iter_batched(
                || {
                    let bus = Arc::new(MessageBus::default());
                    (bus, recipients)
                },
                |(bus, recipients)| async move {
                    for n in 0..recipients {
                        bus.register_agent(format!("agent-{n}"), Arc::new(NullHandler), None)
                            .await;
                    }
                    for priority in [MessagePriority::Low, MessagePriority::Critical, MessagePriority::High] {
                        let message = Message::builder("sender", MessageType::Alert)
                            .to("agent-0")
                            .priority(priority)
                            .build();
                        bus.send(message, false, None).await.unwrap();
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_send);
criterion_main!(benches);
