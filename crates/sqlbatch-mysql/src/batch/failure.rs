//! Partial-failure accounting.

use std::ops::Range;

use sqlbatch_core::error::{BatchUpdateError, Error, QueryErrorKind, Result};

use super::accumulator::ResultAccumulator;

/// Did the server roll back the whole transaction?
///
/// A deadlock always does. A lock wait timeout only does when the server
/// runs with `innodb_rollback_on_timeout`.
pub fn has_deadlock_or_timeout_rolled_back_tx(err: &Error, rollback_on_lock_wait_timeout: bool) -> bool {
    match err {
        Error::Query(q) => match q.kind {
            QueryErrorKind::Deadlock => true,
            QueryErrorKind::LockWaitTimeout => rollback_on_lock_wait_timeout,
            _ => false,
        },
        _ => false,
    }
}

/// Errors that stop a batch even when continuing on error.
pub fn is_fatal_for_batch(err: &Error, rollback_on_lock_wait_timeout: bool) -> bool {
    err.is_timeout_or_cancel() || has_deadlock_or_timeout_rolled_back_tx(err, rollback_on_lock_wait_timeout)
}

/// Keeps the first recoverable error of a batch.
#[derive(Debug)]
pub struct FailureCollector {
    continue_on_error: bool,
    rollback_on_lock_wait_timeout: bool,
    first_error: Option<Error>,
    failures: usize,
}

impl FailureCollector {
    pub fn new(continue_on_error: bool, rollback_on_lock_wait_timeout: bool) -> Self {
        Self {
            continue_on_error,
            rollback_on_lock_wait_timeout,
            first_error: None,
            failures: 0,
        }
    }

    /// Record a failed round trip covering `failed`.
    ///
    /// Returns `Ok` when the batch should go on. Otherwise returns the batch
    /// failure carrying the counts of the first `completed` entries.
    #[allow(clippy::result_large_err)]
    pub fn handle(
        &mut self,
        err: Error,
        acc: &mut ResultAccumulator,
        failed: Range<usize>,
        completed: usize,
    ) -> Result<()> {
        acc.mark_failed(failed.clone());
        self.failures += 1;

        if self.continue_on_error && !is_fatal_for_batch(&err, self.rollback_on_lock_wait_timeout) {
            tracing::warn!(
                first = failed.start,
                entries = failed.len(),
                error = %err,
                "Batch entry failed, continuing"
            );
            if self.first_error.is_none() {
                self.first_error = Some(err);
            }
            return Ok(());
        }

        tracing::debug!(completed, error = %err, "Batch aborted");
        Err(Error::BatchUpdate(BatchUpdateError::new(acc.truncated(completed), err)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures > 0
    }

    /// Final counts, or the batch failure carrying all of them if any entry
    /// failed along the way.
    #[allow(clippy::result_large_err)]
    pub fn finish(self, acc: ResultAccumulator) -> Result<Vec<i64>> {
        match self.first_error {
            Some(err) => Err(Error::BatchUpdate(BatchUpdateError::new(acc.into_counts(), err))),
            None => Ok(acc.into_counts()),
        }
    }
}
