//! Throughput of blackboard publish and glob-pattern query over a growing
//! key set.

use abathur_swarm::services::blackboard::{Blackboard, PublishOptions};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("blackboard_publish");

    for entries in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, &entries| {
            b.to_async(&rt).iter_batched(
                Blackboard::new,
                |board| async move {
                    for n in 0..entries {
                        board
                            .publish(
                                format!("scout.finding.{n}"),
                                serde_json::json!({"n": n}),
                                "scout",
                                PublishOptions::default(),
                            )
                            .await;
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("blackboard_query");

    for entries in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, &entries| {
            b.to_async(&rt).iter_batched(
                || {
                    rt.block_on(async {
                        let board = Blackboard::new();
                        for n in 0..entries {
                            board
                                .publish(
                                    format!("scout.finding.{n}"),
                                    serde_json::json!({"n": n}),
                                    "scout",
                                    PublishOptions::default(),
                                )
                                .await;
                        }
                        board
                    })
                },
                |board| async move {
                    let _ = board.query("scout.*", None, None, None, Some(100)).await;
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_publish, bench_query);
criterion_main!(benches);
