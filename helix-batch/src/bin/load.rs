//! Load driver for the Helix reducer.
//!
//! Spawns producer tasks that submit items concurrently, optionally with
//! injected handler failures, and reports how the items were batched.
//!
//! ```bash
//! helix-batch-load --producers 100 --items 1000 --max-batch-size 100
//! helix-batch-load --failure-rate 0.05 --log-level debug
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use helix_batch::{HandlerError, Reducer, ReducerConfig};

/// Drives a reducer with concurrent producers.
#[derive(Parser, Debug)]
#[command(name = "helix-batch-load")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of concurrent producer tasks.
    #[arg(long, default_value = "100")]
    producers: usize,

    /// Items submitted by each producer.
    #[arg(long, default_value = "1000")]
    items: u64,

    /// Size threshold for a batch.
    #[arg(long, default_value = "100")]
    max_batch_size: usize,

    /// Flush interval in milliseconds.
    #[arg(long, default_value = "1000")]
    flush_interval_ms: u64,

    /// Probability in [0, 1] that a batch fails.
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Simulated handler latency in microseconds.
    #[arg(long, default_value = "0")]
    handler_latency_us: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(format!("failure rate {} is outside [0, 1]", args.failure_rate).into());
    }

    info!(
        producers = args.producers,
        items = args.items,
        max_batch_size = args.max_batch_size,
        flush_interval_ms = args.flush_interval_ms,
        failure_rate = args.failure_rate,
        "Starting load"
    );

    let config = ReducerConfig::new()
        .with_max_batch_size(args.max_batch_size)
        .with_flush_interval_ms(args.flush_interval_ms);
    let failure_rate = args.failure_rate;
    let latency = Duration::from_micros(args.handler_latency_us);

    let reducer = Reducer::<u64, u64>::builder()
        .config(config)
        .handler(move |inputs: Vec<u64>| {
            let fail = rand::thread_rng().gen_bool(failure_rate);
            async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                if fail {
                    return Err(HandlerError::msg("injected failure"));
                }
                Ok::<_, HandlerError>(
                    inputs
                        .into_iter()
                        .map(|x| x.wrapping_mul(2))
                        .collect::<Vec<_>>(),
                )
            }
        })
        .build()?;
    let reducer = Arc::new(reducer);

    let failures = Arc::new(AtomicU64::new(0));
    let started = Instant::now();
    let mut producers = JoinSet::new();

    for producer in 0..args.producers as u64 {
        let reducer = Arc::clone(&reducer);
        let failures = Arc::clone(&failures);
        let items = args.items;
        producers.spawn(async move {
            for i in 0..items {
                let input = producer * items + i;
                match reducer.submit(input).await {
                    Ok(output) => debug_assert_eq!(output, input.wrapping_mul(2)),
                    Err(e) if e.is_batch_failure() => {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(producer, error = %e, "Submission rejected");
                        return;
                    }
                }
            }
        });
    }

    while let Some(joined) = producers.join_next().await {
        joined?;
    }
    reducer.destroy().await?;

    let elapsed = started.elapsed();
    let stats = reducer.stats();
    #[allow(clippy::cast_precision_loss)]
    let items_per_sec = stats.items_flushed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

    println!("elapsed:            {elapsed:?}");
    println!("items flushed:      {}", stats.items_flushed);
    println!("items per second:   {items_per_sec:.0}");
    println!("batches:            {}", stats.batches);
    println!("average batch size: {:.2}", stats.average_batch_size());
    println!("largest batch:      {}", stats.largest_batch);
    println!(
        "flushes:            size={} timer={} manual={} shutdown={}",
        stats.size_flushes, stats.timer_flushes, stats.manual_flushes, stats.shutdown_flushes
    );
    println!(
        "failed batches:     {} ({} items)",
        stats.failed_batches,
        failures.load(Ordering::Relaxed)
    );

    Ok(())
}
