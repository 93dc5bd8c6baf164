//! Resizing the concurrency gate while work is in flight.
//!
//! This example starts a batch under a tight limit, then widens it
//! mid-run. Submissions waiting on admission pick up the new limit
//! immediately; already-running tasks are unaffected.

use loadgate::Worker;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Dynamic Limit Example");
    println!("=====================\n");

    let start = Instant::now();

    let worker = Worker::builder()
        .task(move |_cancel, index| async move {
            println!("Iteration {:2} started at {:?}", index, start.elapsed());
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .with_loop_count(12)
        .with_max_parallelism(1)
        .build()?;

    println!("Starting 12 iterations at max parallelism 1...");

    // Widen the gate once the run is underway
    let limiter = worker.limiter().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        println!("\n-- raising parallelism to 4 --\n");
        limiter.add_parallelism(3);
    });

    worker.process(CancellationToken::new()).await;

    println!("\nDone in {:?} (serial would be ~1.2s)", start.elapsed());

    Ok(())
}
