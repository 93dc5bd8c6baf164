//! Drives a sequence of indexed iterations through a [`Limiter`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::limiter::Limiter;

type Task = Arc<dyn Fn(CancellationToken, u64) -> BoxFuture<'static, ()> + Send + Sync>;

/// Configuration errors surfaced by [`WorkerBuilder::build`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The iteration axis was configured more than once.
    #[error("iteration policy configured twice")]
    IterationsAlreadySet,

    /// The parallelism axis was configured more than once.
    #[error("parallelism policy configured twice")]
    ParallelismAlreadySet,

    /// A parallelism cap must admit at least one task.
    #[error("max parallelism must be at least 1")]
    InvalidParallelism,
}

/// How many iterations a [`Worker`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    /// A fixed number of iterations, then stop.
    Count(u64),
    /// Iterate until the processing context is cancelled.
    Unbounded,
}

/// How many iterations may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// A hard cap, at least 1.
    Max(i32),
    /// Bounded only by the number of submissions.
    Unlimited,
}

/// Builds a [`Worker`] from a task and per-axis policies.
///
/// Each axis (iteration count and parallelism) accepts exactly one
/// option; configuring an axis twice records an error, and the first
/// recorded error aborts construction at [`build`](WorkerBuilder::build).
/// Axes left unconfigured default to zero iterations and unlimited
/// parallelism.
#[derive(Default)]
pub struct WorkerBuilder {
    task: Option<Task>,
    iterations: Option<Iterations>,
    parallelism: Option<Parallelism>,
    error: Option<ConfigError>,
}

impl WorkerBuilder {
    /// Sets the unit of work, invoked once per iteration with a
    /// cancellation token and the iteration index. A worker without a task
    /// still drives and accounts its iterations, which is useful for
    /// validating configuration and timing.
    pub fn task<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken, u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.task = Some(Arc::new(move |cancel, index| -> BoxFuture<'static, ()> {
            Box::pin(f(cancel, index))
        }));
        self
    }

    /// Runs exactly `count` iterations.
    pub fn with_loop_count(self, count: u64) -> Self {
        self.set_iterations(Iterations::Count(count))
    }

    /// Iterates until the processing context is cancelled.
    pub fn with_infinite_loop(self) -> Self {
        self.set_iterations(Iterations::Unbounded)
    }

    /// Caps concurrently running iterations at `max`, which must be at
    /// least 1.
    pub fn with_max_parallelism(self, max: i32) -> Self {
        if max < 1 {
            return self.fail(ConfigError::InvalidParallelism);
        }
        self.set_parallelism(Parallelism::Max(max))
    }

    /// Leaves concurrency bounded only by the number of submissions.
    pub fn with_unlimited_parallelism(self) -> Self {
        self.set_parallelism(Parallelism::Unlimited)
    }

    /// Validates the configuration, yielding a ready-to-use worker or the
    /// first configuration error encountered.
    pub fn build(self) -> Result<Worker, ConfigError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let iterations = self.iterations.unwrap_or(Iterations::Count(0));
        let limit = match self.parallelism.unwrap_or(Parallelism::Unlimited) {
            Parallelism::Max(max) => max,
            Parallelism::Unlimited => 0,
        };

        Ok(Worker {
            task: self.task,
            iterations,
            limiter: Limiter::new(limit),
        })
    }

    fn set_iterations(mut self, policy: Iterations) -> Self {
        if self.iterations.is_some() {
            return self.fail(ConfigError::IterationsAlreadySet);
        }
        self.iterations = Some(policy);
        self
    }

    fn set_parallelism(mut self, policy: Parallelism) -> Self {
        if self.parallelism.is_some() {
            return self.fail(ConfigError::ParallelismAlreadySet);
        }
        self.parallelism = Some(policy);
        self
    }

    fn fail(mut self, error: ConfigError) -> Self {
        // first failing option wins
        self.error.get_or_insert(error);
        self
    }
}

/// Drives indexed iterations of a task through an owned [`Limiter`].
///
/// ```rust
/// use loadgate::Worker;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let worker = Worker::builder()
///     .task(|_cancel, index| async move {
///         println!("iteration {index}");
///     })
///     .with_loop_count(5)
///     .with_max_parallelism(2)
///     .build()?;
///
/// worker.process(CancellationToken::new()).await;
/// # Ok(())
/// # }
/// ```
pub struct Worker {
    task: Option<Task>,
    iterations: Iterations,
    limiter: Limiter,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("task", &self.task.as_ref().map(|_| "<task>"))
            .field("iterations", &self.iterations)
            .field("limiter", &"<limiter>")
            .finish()
    }
}

impl Worker {
    /// Starts configuring a worker.
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::default()
    }

    /// The worker's limiter, for observing or adjusting the limit while a
    /// run is in flight.
    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Runs the iteration loop: submits indices 0, 1, 2, … through the
    /// limiter until the iteration policy is exhausted, `cancel` fires, or
    /// a submission is rejected, then blocks until the round is over.
    ///
    /// Indices are submitted in strictly increasing order; start and
    /// completion order among admitted iterations is unspecified. A token
    /// that is already cancelled on entry admits nothing.
    pub async fn process(&self, cancel: CancellationToken) {
        // A finished round leaves the limiter closed and drained.
        if self.limiter.is_closed() {
            if let Err(err) = self.limiter.reset() {
                warn!(%err, "previous round still draining, skipping this one");
                return;
            }
        }

        let hold = self.limiter.hold();
        let mut index: u64 = 0;
        loop {
            if let Iterations::Count(count) = self.iterations {
                if index >= count {
                    break;
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            let task = self.task.clone();
            let submitted = self
                .limiter
                .run(&cancel, move |cancel| async move {
                    if let Some(task) = task {
                        task(cancel, index).await;
                    }
                })
                .await;
            if submitted.is_err() {
                break;
            }

            index += 1;
        }
        drop(hold);

        debug!(iterations = index, "submission loop ended, draining");
        self.limiter.wait().await;
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[test]
    fn test_conflicting_options_abort_construction() {
        let err = Worker::builder()
            .with_loop_count(1)
            .with_infinite_loop()
            .build()
            .expect_err("conflicting iteration options must fail");
        assert_eq!(err, ConfigError::IterationsAlreadySet);

        let err = Worker::builder()
            .with_max_parallelism(2)
            .with_unlimited_parallelism()
            .build()
            .expect_err("conflicting parallelism options must fail");
        assert_eq!(err, ConfigError::ParallelismAlreadySet);

        let err = Worker::builder()
            .with_max_parallelism(0)
            .build()
            .expect_err("a cap below 1 must fail");
        assert_eq!(err, ConfigError::InvalidParallelism);
    }

    #[test]
    fn test_first_configuration_error_wins() {
        let err = Worker::builder()
            .with_max_parallelism(0)
            .with_loop_count(1)
            .with_infinite_loop()
            .build()
            .expect_err("invalid configuration must fail");
        assert_eq!(err, ConfigError::InvalidParallelism);
    }

    #[tokio::test]
    async fn test_taskless_worker_processes() {
        let worker = Worker::builder()
            .with_loop_count(1)
            .build()
            .expect("valid configuration");

        worker.process(CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_default_configuration_is_empty_round() {
        let worker = Worker::builder().build().expect("valid configuration");

        // zero iterations, nothing admitted, prompt return
        worker.process(CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn test_fixed_count_runs_each_index_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let worker = Worker::builder()
            .task(move |_cancel, index| {
                let sink = sink.clone();
                async move {
                    sink.lock().expect("sink lock").push(index);
                }
            })
            .with_loop_count(5)
            .with_unlimited_parallelism()
            .build()
            .expect("valid configuration");

        worker.process(CancellationToken::new()).await;

        let mut seen = seen.lock().expect("sink lock").clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancellation_cuts_run_short() {
        let worker = Worker::builder()
            .task(|_cancel, _index| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .with_loop_count(100)
            .with_max_parallelism(1)
            .build()
            .expect("valid configuration");

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                cancel.cancel();
            });
        }

        let start = Instant::now();
        worker.process(cancel).await;

        assert!(
            start.elapsed() < Duration::from_secs(1),
            "cancellation must cut the run short, took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_precancelled_context_admits_nothing() {
        let count = Arc::new(AtomicU32::new(0));
        let hits = count.clone();

        let worker = Worker::builder()
            .task(move |_cancel, _index| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_loop_count(100)
            .with_max_parallelism(1)
            .build()
            .expect("valid configuration");

        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.process(cancel).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unbounded_runs_until_cancelled() {
        let count = Arc::new(AtomicU32::new(0));
        let hits = count.clone();

        let worker = Worker::builder()
            .task(move |_cancel, _index| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_infinite_loop()
            .with_max_parallelism(100)
            .build()
            .expect("valid configuration");

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            });
        }

        worker.process(cancel).await;
        assert!(count.load(Ordering::SeqCst) > 0, "worker never executed");
    }

    #[tokio::test]
    async fn test_limit_raised_mid_run() {
        let running = Arc::new(AtomicI32::new(0));
        let peak = Arc::new(AtomicI32::new(0));

        let worker = {
            let running = running.clone();
            let peak = peak.clone();
            Worker::builder()
                .task(move |_cancel, _index| {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let current = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    }
                })
                .with_loop_count(4)
                .with_max_parallelism(1)
                .build()
                .expect("valid configuration")
        };

        {
            let limiter = worker.limiter().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                limiter.set_parallelism(4);
            });
        }

        worker.process(CancellationToken::new()).await;

        let peak = peak.load(Ordering::SeqCst);
        assert!(
            (2..=4).contains(&peak),
            "raised limit must apply to later submissions, peak {peak}"
        );
    }

    #[tokio::test]
    async fn test_worker_is_reusable_between_rounds() {
        let count = Arc::new(AtomicU32::new(0));
        let hits = count.clone();

        let worker = Worker::builder()
            .task(move |_cancel, _index| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_loop_count(3)
            .with_max_parallelism(2)
            .build()
            .expect("valid configuration");

        worker.process(CancellationToken::new()).await;
        worker.process(CancellationToken::new()).await;

        assert_eq!(count.load(Ordering::SeqCst), 6);
    }
}
