// ABOUTME: Bounded-concurrency admission gate for batches of async jobs.
// ABOUTME: Admits at most `window` jobs at once, latches the first error, and drains on flush.

use std::future::Future;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::config::GateConfig;
use crate::error::GateError;

/// Observable phase of a gate's batch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GateState {
    /// No error latched; new jobs may be admitted.
    Open,
    /// An error is latched; admissions are rejected while admitted jobs finish.
    Draining,
    /// A flush has observed zero outstanding jobs. No further admissions.
    Drained,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Open => write!(f, "open"),
            GateState::Draining => write!(f, "draining"),
            GateState::Drained => write!(f, "drained"),
        }
    }
}

/// Mutable state for the gate, protected by a single mutex.
#[derive(Debug, Default)]
struct Inner {
    outstanding: usize,
    error: Option<GateError>,
    drained: bool,
}

impl Inner {
    /// Latch `err` unless an error is already latched or the batch has drained.
    ///
    /// Returns the batch's error and whether this call latched it.
    fn latch(&mut self, err: GateError) -> (GateError, bool) {
        match &self.error {
            Some(existing) => (existing.clone(), false),
            None if self.drained => (GateError::Drained, false),
            None => {
                self.error = Some(err.clone());
                (err, true)
            }
        }
    }

    /// Error that rejects a new admission, if any.
    fn rejection(&self) -> Option<GateError> {
        match &self.error {
            Some(err) => Some(err.clone()),
            None if self.drained => Some(GateError::Drained),
            None => None,
        }
    }
}

/// Log the outcome of offering `offered` to the latch. Call with the lock released.
fn log_latch(offered: &GateError, first: bool, outstanding: usize) {
    if first {
        info!(error = %offered, outstanding, "first error latched, gate draining");
    } else {
        debug!(absorbed = %offered, "error absorbed, batch already failed");
    }
}

/// Admission gate for a batch of independently running jobs.
///
/// The caller awaits [`acquire`](Gate::acquire) before launching each job,
/// every admitted job reports back exactly once through
/// [`release`](Gate::release), and the caller finishes the batch with
/// [`flush`](Gate::flush).
///
/// # Semantics
///
/// - **Bounded:** at most `window` jobs are outstanding at any instant. The
///   room check and the increment happen under one lock acquisition.
/// - **First error wins:** the first worker error or observed cancellation is
///   latched for the life of the batch. Later errors are dropped.
/// - **Fail fast:** once an error is latched, `acquire` returns it without
///   waiting.
/// - **No orphans:** `flush` returns only after every admitted job has been
///   released, even when an error or cancellation occurred.
///
/// Waiters are woken with `notify_waiters` and always re-check the state, so
/// several blocked acquirers and a flusher can share one notification.
///
/// A gate serves a single batch. Once a flush has drained it, `acquire`
/// returns `GateError::Drained` (or the batch's latched error). Create a new
/// gate for the next batch.
///
/// Log events are emitted only after the state lock has been released.
#[derive(Debug)]
pub struct Gate {
    window: usize,
    inner: Mutex<Inner>,
    wake: Notify,
}

impl Gate {
    /// Create a gate that admits at most `window` jobs at once.
    ///
    /// Returns `Err(GateError::InvalidConfiguration)` if `window` is zero.
    pub fn new(window: usize) -> Result<Self, GateError> {
        if window == 0 {
            return Err(GateError::InvalidConfiguration(
                "window must be positive".to_string(),
            ));
        }

        Ok(Self {
            window,
            inner: Mutex::new(Inner::default()),
            wake: Notify::new(),
        })
    }

    /// Create a gate from a [`GateConfig`].
    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        Self::new(config.window)
    }

    /// Maximum number of concurrently admitted jobs.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of jobs admitted and not yet released.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// The latched error, if any.
    pub fn error(&self) -> Option<GateError> {
        self.inner.lock().error.clone()
    }

    /// Current phase of the batch.
    pub fn state(&self) -> GateState {
        let inner = self.inner.lock();
        if inner.drained {
            GateState::Drained
        } else if inner.error.is_some() {
            GateState::Draining
        } else {
            GateState::Open
        }
    }

    /// Wait for a free slot and reserve it.
    ///
    /// Equivalent to [`acquire_with_cancel`](Gate::acquire_with_cancel) with a
    /// cancel signal that never fires.
    pub async fn acquire(&self) -> Result<(), GateError> {
        self.acquire_with_cancel(std::future::pending::<()>()).await
    }

    /// Wait for a free slot and reserve it, with cancellation support.
    ///
    /// Returns `Ok(())` once a slot has been reserved. The caller must then
    /// launch the job and make sure it calls [`release`](Gate::release).
    ///
    /// Returns the latched error immediately if the batch has already failed,
    /// or `GateError::Drained` if a flush already completed the batch.
    /// If `cancel` completes before a slot frees up, `GateError::Cancelled` is
    /// latched (unless another error got there first) and the latched error is
    /// returned.
    ///
    /// # Arguments
    ///
    /// * `cancel` - A future that, when completed, cancels the batch.
    pub async fn acquire_with_cancel<F>(&self, cancel: F) -> Result<(), GateError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        loop {
            // Register before inspecting state so a release between the check
            // and the await still wakes us.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let rejected = self.inner.lock().rejection();
            if let Some(err) = rejected {
                return Err(err);
            }

            if cancel.as_mut().now_or_never().is_some() {
                return Err(self.latch(GateError::Cancelled));
            }

            if self.try_admit()? {
                return Ok(());
            }

            tokio::select! {
                biased;
                () = &mut cancel => {
                    return Err(self.latch(GateError::Cancelled));
                }
                () = notified => {
                    // Re-check everything after any wake
                }
            }
        }
    }

    /// Reserve a slot if the batch is healthy and one is free.
    ///
    /// The latch is re-read here so a stale "no error" observation can never
    /// lead to an admission.
    fn try_admit(&self) -> Result<bool, GateError> {
        let outstanding = {
            let mut inner = self.inner.lock();

            if let Some(err) = inner.rejection() {
                return Err(err);
            }
            if inner.outstanding >= self.window {
                return Ok(false);
            }

            inner.outstanding += 1;
            inner.outstanding
        };

        debug!(outstanding, window = self.window, "slot acquired");
        Ok(true)
    }

    /// Report that an admitted job has finished.
    ///
    /// An `Err` outcome becomes the batch's terminal error if nothing was
    /// latched before it. Never blocks and never fails.
    pub fn release<E>(&self, outcome: Result<(), E>)
    where
        E: Into<anyhow::Error>,
    {
        let failure = outcome.err().map(GateError::worker);

        let (outstanding, unmatched, latched) = {
            let mut inner = self.inner.lock();

            let unmatched = inner.outstanding == 0;
            if !unmatched {
                inner.outstanding -= 1;
            }

            let latched = failure.map(|err| {
                let (_, first) = inner.latch(err.clone());
                (err, first)
            });

            (inner.outstanding, unmatched, latched)
        };

        self.wake.notify_waiters();

        if unmatched {
            warn!("release called with no outstanding jobs, ignoring");
        } else {
            debug!(outstanding, "slot released");
        }
        if let Some((err, first)) = latched {
            log_latch(&err, first, outstanding);
        }
    }

    /// Report that an admitted job finished successfully.
    ///
    /// Shorthand for `release(Ok(()))` without naming an error type.
    pub fn release_ok(&self) {
        self.release(Ok::<(), anyhow::Error>(()));
    }

    /// Wait until every admitted job has been released.
    ///
    /// Equivalent to [`flush_with_cancel`](Gate::flush_with_cancel) with a
    /// cancel signal that never fires.
    pub async fn flush(&self) -> Result<(), GateError> {
        self.flush_with_cancel(std::future::pending::<()>()).await
    }

    /// Wait until every admitted job has been released, with cancellation support.
    ///
    /// Returns the batch's latched error, or `Ok(())` if none was latched.
    /// If `cancel` completes while jobs are still outstanding,
    /// `GateError::Cancelled` is latched (unless another error got there
    /// first) and the wait continues until the drain completes.
    ///
    /// Calling this again after it has returned yields the same result
    /// without waiting.
    ///
    /// # Arguments
    ///
    /// * `cancel` - A future that, when completed, cancels the batch.
    pub async fn flush_with_cancel<F>(&self, cancel: F) -> Result<(), GateError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let mut cancel_seen = false;

        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let drained = {
                let mut inner = self.inner.lock();
                if inner.outstanding == 0 {
                    let first_drain = !inner.drained;
                    inner.drained = true;
                    Some((first_drain, inner.error.clone()))
                } else {
                    None
                }
            };

            if let Some((first_drain, error)) = drained {
                if first_drain {
                    debug!(failed = error.is_some(), "gate drained");
                }
                return match error {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }

            tokio::select! {
                biased;
                () = &mut cancel, if !cancel_seen => {
                    cancel_seen = true;
                    self.latch(GateError::Cancelled);
                }
                () = notified => {}
            }
        }
    }

    /// Latch `err` (first wins) and wake every waiter. Returns the latched error.
    fn latch(&self, err: GateError) -> GateError {
        let (latched, first, outstanding) = {
            let mut inner = self.inner.lock();
            let (latched, first) = inner.latch(err.clone());
            (latched, first, inner.outstanding)
        };

        self.wake.notify_waiters();
        log_latch(&err, first, outstanding);
        latched
    }
}
