//! Per-entry update counts and generated keys.

use std::ops::Range;

use sqlbatch_core::counts::{EXECUTE_FAILED, NOT_ATTEMPTED, SUCCESS_NO_INFO};
use sqlbatch_core::{ExecResult, Row};

/// Collapse an upsert's reported 2 (updated) or 0 (unchanged) to 1.
pub fn compensate_on_duplicate_key_update(count: i64) -> i64 {
    if count == 2 || count == 0 { 1 } else { count }
}

/// Update counts for one batch, indexed by queue position.
#[derive(Debug, Clone)]
pub struct ResultAccumulator {
    counts: Vec<i64>,
    compensate_on_duplicate_key_update: bool,
}

impl ResultAccumulator {
    /// `entries` counts, all starting as not attempted.
    pub fn new(entries: usize, compensate_on_duplicate_key_update: bool) -> Self {
        Self {
            counts: vec![NOT_ATTEMPTED; entries],
            compensate_on_duplicate_key_update,
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Record the exact count of one entry.
    pub fn record_exact(&mut self, index: usize, count: i64) {
        if let Some(slot) = self.counts.get_mut(index) {
            *slot = count;
        }
    }

    /// Record one multi-value round trip covering `chunk`.
    ///
    /// A single-row chunk keeps its exact count. Wider chunks cannot
    /// attribute rows to entries, so every entry gets `SUCCESS_NO_INFO`,
    /// or 0 when nothing was affected. Upsert compensation applies to the
    /// chunk total first, so a compensated chunk never reports 0.
    pub fn record_chunk(&mut self, chunk: Range<usize>, affected: i64) {
        let affected = if self.compensate_on_duplicate_key_update {
            compensate_on_duplicate_key_update(affected)
        } else {
            affected
        };

        let count = if chunk.len() == 1 {
            affected
        } else if affected > 0 {
            SUCCESS_NO_INFO
        } else {
            0
        };
        for slot in &mut self.counts[chunk] {
            *slot = count;
        }
    }

    /// Mark the entries of `range` as failed.
    pub fn mark_failed(&mut self, range: Range<usize>) {
        let end = range.end.min(self.counts.len());
        for slot in &mut self.counts[range.start.min(end)..end] {
            *slot = EXECUTE_FAILED;
        }
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    /// The first `completed` counts.
    pub fn truncated(&self, completed: usize) -> Vec<i64> {
        self.counts[..completed.min(self.counts.len())].to_vec()
    }

    pub fn into_counts(self) -> Vec<i64> {
        self.counts
    }
}

/// Generated keys collected across a batch, in execution order.
#[derive(Debug, Clone, Default)]
pub struct GeneratedKeysLedger {
    enabled: bool,
    rows: Vec<Row>,
}

impl GeneratedKeysLedger {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            rows: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append the keys of one round trip, at most `max_keys` (0 = all).
    pub fn record(&mut self, result: &ExecResult, max_keys: u64, increment: u64, first_char: char) {
        if self.enabled {
            self.rows
                .extend(result.generated_keys(max_keys, increment, first_char));
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
