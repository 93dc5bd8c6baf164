//! A reusable, dynamically-resizable concurrency gate.
//!
//! [`Limiter`] admits submitted tasks up to a configurable cap, lets that
//! cap change while work is in flight, and signals a single close event
//! that any number of waiters can observe.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Errors surfaced by [`Limiter`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    /// Admission was rejected because the limiter is, or became, closed
    /// before a slot could be granted. Expected during shutdown; callers
    /// treat it as "submission rejected".
    #[error("limiter closed")]
    Closed,

    /// The occupancy counter dropped below zero, meaning a slot was
    /// released twice. This is an accounting bug in the gate itself and is
    /// raised as a panic from the release path, never returned.
    #[error("negative count")]
    NegativeCount,

    /// [`Limiter::reset`] was called while tasks were still accounted for.
    #[error("limiter not drained")]
    NotDrained,
}

struct Inner {
    /// Values below 1 mean unlimited concurrency.
    limit: AtomicI32,
    /// Weighted occupancy: a submission awaiting admission contributes 1,
    /// an admitted task contributes 2. Must never go negative.
    count: AtomicI32,
    /// Open batch reservations. While nonzero, a drained `count` does not
    /// auto-close the limiter.
    holds: AtomicI32,
    closed: AtomicBool,
    /// Fired once per round on close; replaced by `reset`. The lock is
    /// only ever held to clone or swap the token, never across an await.
    closer: Mutex<CancellationToken>,
    /// Optional limiter-wide context; its cancellation implies close.
    bound: Option<CancellationToken>,
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            trace!("limiter closed");
            self.closer.lock().expect("closer lock poisoned").cancel();
        }
    }

    fn closer(&self) -> CancellationToken {
        self.closer.lock().expect("closer lock poisoned").clone()
    }
}

/// Releases an admitted slot when dropped, so a task that panics cannot
/// leak its slot. Dropping the last slot closes the limiter.
struct Slot {
    inner: Arc<Inner>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let count = self.inner.count.fetch_sub(2, Ordering::SeqCst) - 2;
        if count < 0 {
            panic!("{}", LimiterError::NegativeCount);
        }
        if count == 0 && self.inner.holds.load(Ordering::SeqCst) == 0 {
            trace!("occupancy drained, auto-closing");
            self.inner.close();
        }
    }
}

/// A batch reservation held across a loop of submissions.
///
/// While held, a momentarily drained limiter does not auto-close, so a
/// fast task finishing between two sequential submissions cannot end the
/// round early. Dropping the reservation ends the batch; if the limiter is
/// empty at that point the round is over and the limiter closes, which
/// also covers rounds that never admitted anything.
///
/// Holds are deliberately kept out of the weighted occupancy count: they
/// reserve nothing and must not eat into the admission capacity.
pub(crate) struct Hold {
    inner: Arc<Inner>,
}

impl Drop for Hold {
    fn drop(&mut self) {
        let holds = self.inner.holds.fetch_sub(1, Ordering::SeqCst) - 1;
        if holds == 0 && self.inner.count.load(Ordering::SeqCst) == 0 {
            self.inner.close();
        }
    }
}

/// A dynamically-resizable concurrency gate.
///
/// Cloning yields another handle to the same gate. A limit below 1 means
/// unlimited concurrency; a limit of `n >= 1` caps the number of admitted
/// tasks running at once to `n`.
///
/// The limiter closes by explicit [`close`](Limiter::close), by the bound
/// context (if constructed via [`with_cancel`](Limiter::with_cancel))
/// ending, or on its own once the last outstanding task finishes. Once
/// closed, every further submission is rejected with
/// [`LimiterError::Closed`] until [`reset`](Limiter::reset) re-arms it.
///
/// ```rust
/// use loadgate::Limiter;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), loadgate::LimiterError> {
/// let limiter = Limiter::new(2);
/// let cancel = CancellationToken::new();
///
/// for _ in 0..4 {
///     limiter
///         .run(&cancel, |_cancel| async {
///             // at most two of these are ever in flight at once
///             tokio::time::sleep(std::time::Duration::from_millis(10)).await;
///         })
///         .await?;
/// }
///
/// // unblocks once the last task finishes
/// limiter.wait().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Limiter {
    inner: Arc<Inner>,
}

impl Limiter {
    /// Creates an open limiter with the given limit. Values below 1 mean
    /// unlimited concurrency.
    pub fn new(limit: i32) -> Self {
        Self::build(limit, None)
    }

    /// Creates an open limiter whose lifetime is bound to `cancel`:
    /// cancelling the token implicitly closes the limiter, rejecting
    /// further submissions and unblocking [`wait`](Limiter::wait).
    pub fn with_cancel(limit: i32, cancel: &CancellationToken) -> Self {
        Self::build(limit, Some(cancel.clone()))
    }

    fn build(limit: i32, bound: Option<CancellationToken>) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: AtomicI32::new(limit),
                count: AtomicI32::new(0),
                holds: AtomicI32::new(0),
                closed: AtomicBool::new(false),
                closer: Mutex::new(CancellationToken::new()),
                bound,
            }),
        }
    }

    /// Submits `f` to run as an independent task, subject to the current
    /// limit.
    ///
    /// The call registers the submission, then spins cooperatively until a
    /// slot is free. On admission `f` is invoked with a child of `cancel`
    /// and spawned; the slot is released when the task finishes, whether
    /// it completes, observes cancellation, or panics.
    ///
    /// Returns [`LimiterError::Closed`] without ever invoking `f` if the
    /// limiter is (or becomes) closed first, or if `cancel` is already
    /// cancelled. A submission through a dead context also closes the
    /// gate, ending the round.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, f: F) -> Result<(), LimiterError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.count.fetch_add(1, Ordering::SeqCst);

        if let Err(err) = self.admit(cancel).await {
            self.inner.count.fetch_sub(1, Ordering::SeqCst);
            trace!("admission rejected, limiter closed");
            return Err(err);
        }

        let slot = Slot {
            inner: Arc::clone(&self.inner),
        };
        let child = cancel.child_token();
        tokio::spawn(async move {
            let _slot = slot;
            f(child).await;
        });

        Ok(())
    }

    /// The admission loop. The pending weight added by `run` keeps the
    /// occupancy nonzero here, so a concurrent drain cannot auto-close the
    /// limiter underneath a submission in flight.
    async fn admit(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        loop {
            if self.inner.is_closed() {
                return Err(LimiterError::Closed);
            }
            if cancel.is_cancelled()
                || self.inner.bound.as_ref().is_some_and(|b| b.is_cancelled())
            {
                self.inner.close();
                return Err(LimiterError::Closed);
            }

            let limit = self.inner.limit.load(Ordering::SeqCst);
            let count = self.inner.count.load(Ordering::SeqCst);
            if limit < 1 || count < limit * 2 {
                if self
                    .inner
                    .count
                    .compare_exchange(count, count + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Ok(());
                }
                // lost the race, re-read and retry
                continue;
            }

            tokio::task::yield_now().await;
        }
    }

    /// Blocks until the limiter is closed: explicitly, by the bound
    /// context ending, or automatically once the last admitted task
    /// finishes. Returns immediately on a limiter that is already closed.
    pub async fn wait(&self) {
        let closer = self.inner.closer();
        if let Some(bound) = &self.inner.bound {
            tokio::select! {
                _ = closer.cancelled() => {}
                _ = bound.cancelled() => self.inner.close(),
            }
        }
        closer.cancelled().await;
    }

    /// Closes the limiter. Idempotent: the first call fires the close
    /// signal, later calls are no-ops.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether the limiter has closed this round.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Replaces the limit. Takes effect for admissions evaluated after the
    /// change; already-running tasks are not evicted.
    pub fn set_parallelism(&self, limit: i32) {
        self.inner.limit.store(limit, Ordering::SeqCst);
    }

    /// Adjusts the limit by `delta`. See [`set_parallelism`](Limiter::set_parallelism).
    pub fn add_parallelism(&self, delta: i32) {
        self.inner.limit.fetch_add(delta, Ordering::SeqCst);
    }

    /// The current limit.
    pub fn current_limit(&self) -> i32 {
        self.inner.limit.load(Ordering::SeqCst)
    }

    /// Re-arms a closed limiter for another round of work, preserving the
    /// limit. No-op on an open limiter. Fails with
    /// [`LimiterError::NotDrained`] while tasks are still accounted for.
    pub fn reset(&self) -> Result<(), LimiterError> {
        if !self.inner.is_closed() {
            return Ok(());
        }
        if self.inner.count.load(Ordering::SeqCst) != 0 {
            return Err(LimiterError::NotDrained);
        }

        let mut closer = self.inner.closer.lock().expect("closer lock poisoned");
        *closer = CancellationToken::new();
        self.inner.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Takes a batch reservation covering a loop of submissions.
    pub(crate) fn hold(&self) -> Hold {
        self.inner.holds.fetch_add(1, Ordering::SeqCst);
        Hold {
            inner: Arc::clone(&self.inner),
        }
    }
}
