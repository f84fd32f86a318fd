//! Choosing how a batch reaches the server.

/// Prepared batches larger than this are sent as multi-statement scripts
/// when they cannot be rewritten as a multi-value INSERT.
pub const PREPARED_MULTI_STATEMENT_THRESHOLD: usize = 3;

/// Plain statement batches larger than this are sent as multi-statement
/// scripts.
pub const PLAIN_MULTI_STATEMENT_THRESHOLD: usize = 4;

/// Execution strategy for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One round trip per entry
    Serial,
    /// Entries merged into `INSERT ... VALUES (...),(...)` chunks
    MultiValueInsert,
    /// Entries concatenated into `stmt;stmt;...` chunks
    MultiStatement,
}

/// What the selector needs to know about a batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchShape {
    pub entry_count: usize,
    pub has_raw_sql: bool,
    pub rewritable_as_multi_value: bool,
    pub rewrite_enabled: bool,
}

/// Strategy for a prepared-statement batch.
pub fn select_strategy(shape: BatchShape) -> Strategy {
    if shape.has_raw_sql || !shape.rewrite_enabled {
        Strategy::Serial
    } else if shape.rewritable_as_multi_value {
        Strategy::MultiValueInsert
    } else if shape.entry_count > PREPARED_MULTI_STATEMENT_THRESHOLD {
        Strategy::MultiStatement
    } else {
        Strategy::Serial
    }
}

/// Strategy for a plain statement batch of raw SQL.
pub fn select_plain_strategy(entry_count: usize, rewrite_enabled: bool) -> Strategy {
    if rewrite_enabled && entry_count > PLAIN_MULTI_STATEMENT_THRESHOLD {
        Strategy::MultiStatement
    } else {
        Strategy::Serial
    }
}
