//! Cancellation patterns with loadgate.
//!
//! This example demonstrates two ways a run winds down early:
//! - A timeout cancelling a worker's processing context
//! - A limiter bound to an external cancellation token

use loadgate::{Limiter, Worker};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Cancellation Patterns Example");
    println!("=============================\n");

    example_worker_timeout().await?;
    example_bound_limiter().await?;

    Ok(())
}

async fn example_worker_timeout() -> anyhow::Result<()> {
    println!("1. Worker With Timeout");
    println!("----------------------");

    // An unbounded worker would run forever; the token reins it in
    let worker = Worker::builder()
        .task(|cancel, index| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    println!("  Iteration {} completed", index);
                }
                _ = cancel.cancelled() => {
                    println!("  Iteration {} cancelled", index);
                }
            }
        })
        .with_infinite_loop()
        .with_max_parallelism(4)
        .build()?;

    let cancel = CancellationToken::new();
    let timeout = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        println!("  (timeout reached, cancelling)");
        timeout.cancel();
    });

    worker.process(cancel).await;
    println!("  Worker drained\n");

    Ok(())
}

async fn example_bound_limiter() -> anyhow::Result<()> {
    println!("2. Limiter Bound To External Token");
    println!("----------------------------------");

    let shutdown = CancellationToken::new();
    let limiter = Limiter::with_cancel(2, &shutdown);

    let cancel = CancellationToken::new();
    for i in 0..2 {
        limiter
            .run(&cancel, move |_cancel| async move {
                println!("  Task {} running until shutdown", i);
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .await?;
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            println!("  (shutting down)");
            shutdown.cancel();
        }
    });

    // The bound token closing the limiter unblocks the wait even though
    // the tasks above are still running
    limiter.wait().await;
    println!("  Limiter closed");

    // And every later submission bounces off the closed gate
    let rejected = limiter.run(&cancel, |_cancel| async {}).await;
    println!("  Submission after shutdown: {:?}\n", rejected);

    Ok(())
}
