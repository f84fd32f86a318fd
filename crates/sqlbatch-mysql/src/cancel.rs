//! Statement timeouts and cancellation.
//!
//! A [`CancelQueryTimer`] runs one background thread per timed batch. When
//! the timeout expires before the batch finishes, the thread marks the
//! statement's [`CancelState`] as timed out and asks the session's
//! [`QueryCanceller`] to kill the running query. The executing thread
//! checks the state before every round trip and translates a failed round
//! trip into [`Error::Timeout`] or [`Error::Cancelled`] once the state says
//! so.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use sqlbatch_core::error::{Error, Result};
use sqlbatch_core::session::QueryCanceller;

/// Cancellation state of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancelStatus {
    NotCancelled = 0,
    TimedOut = 1,
    Cancelled = 2,
}

impl CancelStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => CancelStatus::TimedOut,
            2 => CancelStatus::Cancelled,
            _ => CancelStatus::NotCancelled,
        }
    }
}

/// Shared between a statement, its timer thread and its cancel handles.
#[derive(Debug)]
pub struct CancelState {
    status: AtomicU8,
    executing: AtomicBool,
}

impl Default for CancelState {
    fn default() -> Self {
        Self {
            status: AtomicU8::new(CancelStatus::NotCancelled as u8),
            executing: AtomicBool::new(false),
        }
    }
}

impl CancelState {
    pub fn status(&self) -> CancelStatus {
        CancelStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Start of an execution: clear any stale status.
    pub fn begin(&self) {
        self.status
            .store(CancelStatus::NotCancelled as u8, Ordering::Release);
        self.executing.store(true, Ordering::Release);
    }

    pub fn end(&self) {
        self.executing.store(false, Ordering::Release);
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Record a cancellation; the first one wins.
    fn mark(&self, status: CancelStatus) -> bool {
        self.status
            .compare_exchange(
                CancelStatus::NotCancelled as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Fail fast if the running batch has been cancelled.
    #[allow(clippy::result_large_err)]
    pub fn check(&self) -> Result<()> {
        match self.status() {
            CancelStatus::NotCancelled => Ok(()),
            CancelStatus::TimedOut => Err(Error::Timeout),
            CancelStatus::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Replace a round-trip error with the cancellation that caused it.
    pub fn map_error(&self, err: Error) -> Error {
        match self.status() {
            CancelStatus::NotCancelled => err,
            CancelStatus::TimedOut => Error::Timeout,
            CancelStatus::Cancelled => Error::Cancelled,
        }
    }
}

fn kill_query(canceller: Option<&Arc<dyn QueryCanceller>>, connection_id: u64) {
    if let Some(canceller) = canceller {
        if let Err(e) = canceller.cancel(connection_id) {
            tracing::warn!(connection_id, error = %e, "Failed to kill running query");
        }
    }
}

/// Cancels a running statement from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
    connection_id: u64,
    canceller: Option<Arc<dyn QueryCanceller>>,
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("connection_id", &self.connection_id)
            .field("status", &self.state.status())
            .finish_non_exhaustive()
    }
}

impl CancelHandle {
    pub(crate) fn new(
        state: Arc<CancelState>,
        connection_id: u64,
        canceller: Option<Arc<dyn QueryCanceller>>,
    ) -> Self {
        Self {
            state,
            connection_id,
            canceller,
        }
    }

    /// Cancel the statement if it is executing. Returns whether a
    /// cancellation was issued.
    pub fn cancel(&self) -> bool {
        if !self.state.is_executing() || !self.state.mark(CancelStatus::Cancelled) {
            return false;
        }
        tracing::debug!(connection_id = self.connection_id, "Cancelling statement");
        kill_query(self.canceller.as_ref(), self.connection_id);
        true
    }
}

/// Times one batch execution.
///
/// Dropping the timer stops it; if it already fired, the state keeps the
/// `TimedOut` status for the executing thread to observe.
#[derive(Debug)]
pub struct CancelQueryTimer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl CancelQueryTimer {
    /// Spawn a timer firing after `timeout`.
    #[allow(clippy::result_large_err)]
    pub fn start(
        timeout: Duration,
        state: Arc<CancelState>,
        connection_id: u64,
        canceller: Option<Arc<dyn QueryCanceller>>,
    ) -> Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name(format!("sqlbatch-cancel-{connection_id}"))
            .spawn(move || {
                let (lock, cvar) = &*thread_stop;
                let Ok(stopped) = lock.lock() else {
                    return;
                };
                let Ok((stopped, _)) = cvar.wait_timeout_while(stopped, timeout, |stopped| !*stopped) else {
                    return;
                };
                if *stopped {
                    return;
                }
                drop(stopped);

                if state.mark(CancelStatus::TimedOut) {
                    tracing::debug!(
                        connection_id,
                        timeout_ms = timeout.as_millis(),
                        "Statement timeout expired"
                    );
                    kill_query(canceller.as_ref(), connection_id);
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let (lock, cvar) = &*self.stop;
        if let Ok(mut stopped) = lock.lock() {
            *stopped = true;
        }
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Cancel timer thread panicked");
            }
        }
    }
}

impl Drop for CancelQueryTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
