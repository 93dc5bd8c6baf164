//! Driving the concurrency gate directly.
//!
//! This example submits more tasks than the limit allows and tracks the
//! highest concurrency actually observed, to show the cap holding.

use loadgate::Limiter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Concurrency Limiting Example");
    println!("============================\n");

    // Track concurrent task count
    let concurrent_count = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    // Limit to 3 concurrent tasks
    let limit = 3;
    let limiter = Limiter::new(limit);
    println!("Concurrency limit set to: {}\n", limit);

    let cancel = CancellationToken::new();
    let start = Instant::now();

    // Submit 10 tasks, but only 3 will run at a time
    for i in 0..10 {
        let count = concurrent_count.clone();
        let max = max_seen.clone();

        limiter
            .run(&cancel, move |_cancel| async move {
                // Increment concurrent count
                let current = count.fetch_add(1, Ordering::SeqCst) + 1;

                // Track maximum concurrency
                let mut max_val = max.load(Ordering::SeqCst);
                while current > max_val {
                    match max.compare_exchange_weak(
                        max_val,
                        current,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => break,
                        Err(x) => max_val = x,
                    }
                }

                println!(
                    "Task {} running ({} in flight, {:?} elapsed)",
                    i,
                    current,
                    start.elapsed()
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

                count.fetch_sub(1, Ordering::SeqCst);
            })
            .await?;
    }

    // Unblocks once the last task drains
    limiter.wait().await;

    println!(
        "\nDone in {:?}, highest concurrency observed: {}",
        start.elapsed(),
        max_seen.load(Ordering::SeqCst)
    );

    Ok(())
}
