//! The round-trip layer the batch engine drives.
//!
//! A [`Session`] is one authenticated server connection: it sends one
//! command and returns one result. Framing, authentication and result
//! decoding live behind this trait.

use std::sync::Arc;

use crate::bound::BoundValue;
use crate::error::{Error, Result};
use crate::row::{ColumnInfo, Row};
use crate::value::Value;

/// Column name of generated-key rows.
pub const GENERATED_KEY_COLUMN: &str = "GENERATED_KEY";

/// A statement prepared on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatement {
    /// Server-assigned statement id
    pub id: u32,
    /// SQL text the statement was prepared from
    pub sql: String,
    /// Number of `?` placeholders the server counted
    pub param_count: usize,
}

/// Outcome of one executed statement.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Rows affected as reported by the OK packet
    pub affected_rows: u64,
    /// First auto-increment id generated by the statement, 0 if none
    pub last_insert_id: u64,
    /// Server info string (e.g. `Records: 3  Duplicates: 0  Warnings: 0`)
    pub info: Option<String>,
    /// Rows of a result set, empty for DML
    pub rows: Vec<Row>,
}

impl ExecResult {
    /// An OK result with the given affected rows and insert id.
    pub fn ok(affected_rows: u64, last_insert_id: u64) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            info: None,
            rows: Vec::new(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    /// Affected rows as a signed update count.
    pub fn update_count(&self) -> i64 {
        i64::try_from(self.affected_rows).unwrap_or(i64::MAX)
    }

    /// Build generated-key rows for this result.
    ///
    /// One key per affected row, starting at `last_insert_id` and stepping by
    /// `increment`. For a REPLACE (`first_char == 'R'`) the count comes from
    /// the info string instead, since a replaced row counts twice in
    /// `affected_rows`. `max_keys == 0` leaves the count uncapped.
    pub fn generated_keys(&self, max_keys: u64, increment: u64, first_char: char) -> Vec<Row> {
        if self.last_insert_id == 0 {
            return Vec::new();
        }

        let mut count = self.affected_rows;
        if count > 0 && first_char.eq_ignore_ascii_case(&'R') {
            if let Some(records) = self.info.as_deref().and_then(record_count_from_info) {
                count = records;
            }
        }
        if max_keys > 0 {
            count = count.min(max_keys);
        }

        let columns = Arc::new(ColumnInfo::new(vec![GENERATED_KEY_COLUMN.to_string()]));
        let step = increment.max(1);
        let mut key = self.last_insert_id;
        let mut rows = Vec::new();
        for _ in 0..count {
            let value = i64::try_from(key).map_or(Value::Decimal(key.to_string()), Value::BigInt);
            rows.push(Row::with_columns(Arc::clone(&columns), vec![value]));
            key = key.wrapping_add(step);
        }
        rows
    }
}

/// Parse `Records: R  Duplicates: D  Warnings: W` into `R - D`.
pub fn record_count_from_info(info: &str) -> Option<u64> {
    let mut records = None;
    let mut duplicates = 0_u64;
    let mut tokens = info.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "Records:" => records = tokens.next().and_then(|n| n.parse::<u64>().ok()),
            "Duplicates:" => {
                duplicates = tokens.next().and_then(|n| n.parse().ok()).unwrap_or(0);
            }
            _ => {}
        }
    }
    records.map(|r| r.saturating_sub(duplicates))
}

/// Results of a multi-statement round trip.
///
/// The server stops at the first failing sub-statement; `results` holds the
/// sub-statements that completed before it.
#[derive(Debug, Default)]
pub struct MultiResult {
    pub results: Vec<ExecResult>,
    pub error: Option<Error>,
}

impl MultiResult {
    pub fn completed(results: Vec<ExecResult>) -> Self {
        Self {
            results,
            error: None,
        }
    }

    pub fn failed(results: Vec<ExecResult>, error: Error) -> Self {
        Self {
            results,
            error: Some(error),
        }
    }
}

/// Kills the statement running on a connection.
///
/// Called from the cancel timer thread, so it must not need the session
/// lock the executing thread holds; drivers typically open a side
/// connection and send `KILL QUERY <id>`.
pub trait QueryCanceller: Send + Sync {
    #[allow(clippy::result_large_err)]
    fn cancel(&self, connection_id: u64) -> Result<()>;
}

/// One server connection.
#[allow(clippy::result_large_err)]
pub trait Session: Send {
    /// Server thread id of this connection.
    fn connection_id(&self) -> u64;

    /// Server `max_allowed_packet`.
    fn max_allowed_packet(&self) -> usize;

    /// Server `auto_increment_increment`.
    fn auto_increment_increment(&self) -> u64 {
        1
    }

    /// Server `innodb_rollback_on_timeout`.
    fn rollback_on_lock_wait_timeout(&self) -> bool {
        false
    }

    /// Is `CLIENT_MULTI_STATEMENTS` currently on?
    fn multi_statements_enabled(&self) -> bool;

    /// Toggle multi-statement support (`COM_SET_OPTION`).
    fn set_multi_statements(&mut self, enabled: bool) -> Result<()>;

    /// Prepare a statement on the server.
    fn prepare(&mut self, sql: &str) -> Result<ServerStatement>;

    /// Execute a server-side statement with the given parameters.
    fn execute_prepared(&mut self, stmt: &ServerStatement, params: &[BoundValue]) -> Result<ExecResult>;

    /// Deallocate a server-side statement.
    fn close_prepared(&mut self, stmt: ServerStatement) -> Result<()>;

    /// Execute one SQL statement as text.
    fn execute_text(&mut self, sql: &str) -> Result<ExecResult>;

    /// Execute several `;`-separated statements in one round trip.
    fn execute_multi(&mut self, sql: &str) -> MultiResult;

    /// Side channel used to kill a running statement.
    fn canceller(&self) -> Option<Arc<dyn QueryCanceller>> {
        None
    }
}
