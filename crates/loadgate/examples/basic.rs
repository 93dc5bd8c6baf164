//! Basic usage of the loadgate library.
//!
//! This example demonstrates the simplest way to use a Worker to drive a
//! fixed number of concurrent iterations.

use loadgate::Worker;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Basic loadgate example");
    println!("======================\n");

    // Five iterations, at most two in flight at once
    let worker = Worker::builder()
        .task(|_cancel, index| async move {
            println!("Iteration {} starting...", index);

            // Simulate some async work
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

            println!("Iteration {} completed!", index);
        })
        .with_loop_count(5)
        .with_max_parallelism(2)
        .build()?;

    println!("Processing 5 iterations with max parallelism 2...\n");

    worker.process(CancellationToken::new()).await;

    println!("\nAll iterations completed!");

    Ok(())
}
