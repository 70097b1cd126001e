//! Reducer benchmarks.
//!
//! Measures submission throughput with different batch sizes and
//! concurrency levels.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Builder;
use tokio::task::JoinSet;
use tokio::time::Instant;

use helix_batch::{HandlerError, Reducer, ReducerConfig};

/// Benchmark configuration.
#[derive(Clone, Debug)]
struct BenchConfig {
    /// Number of concurrent producer tasks.
    concurrency: usize,
    /// Items per producer.
    items_per_task: u64,
    /// Size threshold for a batch.
    max_batch_size: usize,
}

impl BenchConfig {
    fn name(&self) -> String {
        format!(
            "conc_{}_items_{}_batch_{}",
            self.concurrency, self.items_per_task, self.max_batch_size
        )
    }

    fn total_items(&self) -> u64 {
        self.concurrency as u64 * self.items_per_task
    }
}

/// Creates a reducer with a trivial per-item handler.
fn setup_reducer(max_batch_size: usize) -> Reducer<u64, u64> {
    let config = ReducerConfig::new()
        .with_max_batch_size(max_batch_size)
        .with_flush_interval(Duration::from_millis(10));

    Reducer::<u64, u64>::builder()
        .config(config)
        .handler(|inputs: Vec<u64>| async move {
            Ok::<_, HandlerError>(inputs.into_iter().map(|x| x ^ 0x5a5a).collect::<Vec<_>>())
        })
        .build()
        .expect("failed to build reducer")
}

/// Benchmark concurrent blocking submissions.
fn bench_reducer_concurrent(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .build()
        .expect("failed to build runtime");

    let concurrency_levels = vec![16, 64, 256, 1024];
    let batch_sizes = vec![16, 128];
    let items_per_task = 16;

    let mut group = c.benchmark_group("reducer_submit");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for &max_batch_size in &batch_sizes {
        for &concurrency in &concurrency_levels {
            let config = BenchConfig {
                concurrency,
                items_per_task,
                max_batch_size,
            };

            group.throughput(Throughput::Elements(config.total_items()));

            group.bench_with_input(
                BenchmarkId::new("config", config.name()),
                &config,
                |b, cfg| {
                    b.iter_custom(|iters| {
                        rt.block_on(async {
                            let total_start = Instant::now();

                            for _ in 0..iters {
                                let reducer = Arc::new(setup_reducer(cfg.max_batch_size));
                                let mut join_set = JoinSet::new();

                                for task in 0..cfg.concurrency as u64 {
                                    let reducer = Arc::clone(&reducer);
                                    let items = cfg.items_per_task;

                                    join_set.spawn(async move {
                                        for i in 0..items {
                                            black_box(
                                                reducer
                                                    .submit(task * items + i)
                                                    .await
                                                    .expect("submit"),
                                            );
                                        }
                                    });
                                }

                                while join_set.join_next().await.is_some() {}

                                reducer.destroy().await.expect("destroy");
                            }

                            total_start.elapsed()
                        })
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark a single producer enqueueing without waiting per item.
fn bench_reducer_enqueue(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .expect("failed to build runtime");

    let item_counts = vec![1_000_u64, 10_000];

    let mut group = c.benchmark_group("reducer_enqueue");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for &count in &item_counts {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("batch_100", count), &count, |b, &count| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let total_start = Instant::now();

                    for _ in 0..iters {
                        let reducer = setup_reducer(100);
                        let mut tickets = Vec::with_capacity(count as usize);
                        for i in 0..count {
                            tickets.push(reducer.enqueue(i).await.expect("enqueue"));
                        }
                        reducer.destroy().await.expect("destroy");
                        for ticket in tickets {
                            black_box(ticket.wait().await.expect("wait"));
                        }
                    }

                    total_start.elapsed()
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reducer_concurrent, bench_reducer_enqueue);
criterion_main!(benches);
