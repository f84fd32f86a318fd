//! Splitting a batch into round trips that fit the server packet limit.

use std::ops::Range;

use crate::binding::BindingSet;

/// How a batch of `total` entries splits into chunks of `values_per_round_trip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total: usize,
    pub values_per_round_trip: usize,
}

impl ChunkPlan {
    /// Plan `total` entries with `values_per_round_trip` clamped to `1..=total`.
    pub fn new(total: usize, values_per_round_trip: usize) -> Self {
        Self {
            total,
            values_per_round_trip: values_per_round_trip.clamp(1, total.max(1)),
        }
    }

    pub fn full_chunks(&self) -> usize {
        self.total / self.values_per_round_trip
    }

    pub fn remainder(&self) -> usize {
        self.total % self.values_per_round_trip
    }

    /// Entry ranges in execution order: the full chunks, then the remainder.
    pub fn chunks(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        let size = self.values_per_round_trip;
        let total = self.total;
        (0..total.div_ceil(size)).map(move |i| {
            let start = i * size;
            start..(start + size).min(total)
        })
    }
}

/// Number of parameter sets sent per round trip.
///
/// Each set is charged its estimated wire size plus `per_set_overhead` (the
/// values clause for a multi-value INSERT, the whole statement for a
/// multi-statement script). The whole batch goes in one round trip when it
/// fits in `max_allowed_packet - sql_len`; otherwise the budget is divided
/// by the largest set.
pub fn values_per_round_trip(
    sets: &[&BindingSet],
    per_set_overhead: usize,
    sql_len: usize,
    max_allowed_packet: usize,
) -> usize {
    let count = sets.len();
    if count == 0 {
        return 1;
    }

    let mut max_set_size = 0_u64;
    let mut batch_size = 0_u64;
    for set in sets {
        let size = set
            .parameter_set_size(max_allowed_packet)
            .saturating_add(per_set_overhead as u64);
        max_set_size = max_set_size.max(size);
        batch_size = batch_size.saturating_add(size);
    }

    let budget = max_allowed_packet.saturating_sub(sql_len) as u64;
    if batch_size < budget {
        return count;
    }

    let per_trip = budget / max_set_size.max(1);
    usize::try_from(per_trip).unwrap_or(count).clamp(1, count)
}

/// Group plain SQL statements into `;`-joined scripts under the packet limit.
pub fn plan_statement_chunks(sqls: &[String], max_allowed_packet: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut length = 0_usize;

    for (i, sql) in sqls.iter().enumerate() {
        let added = if i == start { sql.len() } else { sql.len() + 1 };
        if i > start && length + added > max_allowed_packet {
            chunks.push(start..i);
            start = i;
            length = sql.len();
        } else {
            length += added;
        }
    }
    if start < sqls.len() {
        chunks.push(start..sqls.len());
    }
    chunks
}
