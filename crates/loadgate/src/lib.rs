//! # loadgate
//!
//! Admission control and iteration driving for load generators on Tokio:
//! fan out many repeated units of work, cap how many run at once, change
//! the cap while work is in flight, and shut down in an orderly,
//! cancellable way.
//!
//! ## Overview
//!
//! Two pieces, in dependency order:
//!
//! * [`Limiter`] - a reusable, dynamically-resizable concurrency gate.
//!   Submissions spin until a slot frees up (no wait queue, no
//!   head-of-line blocking), run as independent Tokio tasks, and release
//!   their slot when they finish. Once the last task drains, the gate
//!   closes on its own and every [`wait`](Limiter::wait) caller unblocks.
//! * [`Worker`] - drives a fixed or unbounded sequence of indexed
//!   iterations through a limiter until exhaustion or cancellation, then
//!   blocks until the round is over.
//!
//! ## Quick Start
//!
//! ```rust
//! use loadgate::Worker;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let worker = Worker::builder()
//!         .task(|_cancel, index| async move {
//!             // issue request number `index` here
//!             tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
//!             println!("iteration {index} done");
//!         })
//!         .with_loop_count(10)
//!         .with_max_parallelism(3)
//!         .build()?;
//!
//!     worker.process(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Cancellation
//!
//! Cancellation is cooperative and flows through
//! [`CancellationToken`](tokio_util::sync::CancellationToken)s. The token
//! handed to [`Worker::process`] (or to each [`Limiter::run`]) stops new
//! admissions when it fires; each running task receives a child token and
//! is expected to observe it on its own. The gate never aborts a running
//! task.
//!
//! ```rust
//! use loadgate::Worker;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let worker = Worker::builder()
//!     .task(|cancel, _index| async move {
//!         tokio::select! {
//!             _ = tokio::time::sleep(tokio::time::Duration::from_secs(10)) => {}
//!             _ = cancel.cancelled() => {}
//!         }
//!     })
//!     .with_infinite_loop()
//!     .with_max_parallelism(8)
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! let timeout = cancel.clone();
//! tokio::spawn(async move {
//!     tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
//!     timeout.cancel();
//! });
//!
//! // returns promptly once the token fires
//! worker.process(cancel).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Driving the gate directly
//!
//! The limiter stands on its own for ad hoc fan-out; see [`Limiter`] for
//! an example, and `examples/` for complete programs.

pub mod extensions;
mod limiter;
mod worker;

pub use limiter::{Limiter, LimiterError};
pub use worker::{ConfigError, Iterations, Parallelism, Worker, WorkerBuilder};
