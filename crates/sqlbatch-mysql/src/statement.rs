//! Prepared and plain statements.
//!
//! Both kinds queue work with `add_batch*` and run it with
//! `execute_batch` / `execute_large_batch`. The queue is always empty after
//! an execute call returns, whether it succeeded or not.

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlbatch_core::counts::clamp_to_i32;
use sqlbatch_core::error::{Error, Result, StatementError, StatementErrorKind};
use sqlbatch_core::session::{ServerStatement, Session};
use sqlbatch_core::{FieldType, Row, StreamSource, Value};

use crate::batch::{
    BatchContext, BatchQueue, GeneratedKeysLedger, PreparedTarget, execute_prepared_batch, execute_single,
    execute_sql, execute_statement_batch,
};
use crate::binding::BindingSet;
use crate::cancel::{CancelHandle, CancelState};
use crate::config::GeneratedKeys;
use crate::connection::ConnectionInner;
use crate::query_info::QueryInfo;

/// Lifecycle of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Open,
    /// Closed by the caller
    Closed,
    /// The owning connection was closed
    Invalid,
}

fn state_of<S: Session>(own: StatementState, conn: &ConnectionInner<S>) -> StatementState {
    if own == StatementState::Open && conn.is_closed() {
        StatementState::Invalid
    } else {
        own
    }
}

#[allow(clippy::result_large_err)]
fn check_state(state: StatementState) -> Result<()> {
    match state {
        StatementState::Open => Ok(()),
        StatementState::Closed => Err(Error::Statement(StatementError::new(
            StatementErrorKind::Closed,
            "No operations allowed after statement closed",
        ))),
        StatementState::Invalid => Err(Error::Statement(StatementError::new(
            StatementErrorKind::Invalid,
            "Statement is no longer valid: its connection was closed",
        ))),
    }
}

#[allow(clippy::result_large_err)]
fn keys_not_requested() -> Result<&'static [Row]> {
    Err(Error::Statement(StatementError::new(
        StatementErrorKind::Unsupported,
        "Generated keys not requested",
    )))
}

/// A statement with `?` parameters.
///
/// With `useServerPrepStmts` the statement is prepared on the server and
/// bindings travel in the binary protocol; otherwise bindings are rendered
/// as SQL literals client-side.
pub struct PreparedStatement<S: Session> {
    conn: Arc<ConnectionInner<S>>,
    info: Arc<QueryInfo>,
    server: Option<ServerStatement>,
    bindings: BindingSet,
    batch: BatchQueue,
    keys: GeneratedKeysLedger,
    generated_keys: GeneratedKeys,
    query_timeout: Option<Duration>,
    cancel: Arc<CancelState>,
    state: StatementState,
}

impl<S: Session> std::fmt::Debug for PreparedStatement<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.info.sql())
            .field("server", &self.server)
            .field("batch", &self.batch.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<S: Session> PreparedStatement<S> {
    #[allow(clippy::result_large_err)]
    pub(crate) fn new(conn: Arc<ConnectionInner<S>>, sql: &str, generated_keys: GeneratedKeys) -> Result<Self> {
        conn.check_open()?;
        let info = conn.query_info(sql)?;

        let server = if conn.config.use_server_prep_stmts {
            let stmt = conn.lock_session()?.prepare(sql)?;
            tracing::debug!(statement_id = stmt.id, params = stmt.param_count, "Prepared server-side statement");
            Some(stmt)
        } else {
            None
        };
        let param_count = server.as_ref().map_or(info.placeholder_count(), |s| s.param_count);

        Ok(Self {
            conn,
            info,
            server,
            bindings: BindingSet::new(param_count),
            batch: BatchQueue::new(),
            keys: GeneratedKeysLedger::new(generated_keys.is_enabled()),
            generated_keys,
            query_timeout: None,
            cancel: Arc::new(CancelState::default()),
            state: StatementState::Open,
        })
    }

    pub fn state(&self) -> StatementState {
        state_of(self.state, &self.conn)
    }

    #[allow(clippy::result_large_err)]
    fn check_open(&self) -> Result<()> {
        check_state(self.state())
    }

    pub fn sql(&self) -> &str {
        self.info.sql()
    }

    pub fn query_info(&self) -> &QueryInfo {
        &self.info
    }

    pub fn parameter_count(&self) -> usize {
        self.bindings.len()
    }

    /// Server handle, when prepared server-side.
    pub fn server_statement(&self) -> Option<&ServerStatement> {
        self.server.as_ref()
    }

    /// Bind a value to a 1-based parameter index.
    #[allow(clippy::result_large_err)]
    pub fn set_value(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.check_open()?;
        self.bindings.set_value(index, value)
    }

    /// Bind a value sent as the given field type.
    #[allow(clippy::result_large_err)]
    pub fn set_object(&mut self, index: usize, value: impl Into<Value>, field_type: FieldType) -> Result<()> {
        self.check_open()?;
        self.bindings.set_typed(index, value, field_type)
    }

    #[allow(clippy::result_large_err)]
    pub fn set_int(&mut self, index: usize, value: i32) -> Result<()> {
        self.set_value(index, value)
    }

    #[allow(clippy::result_large_err)]
    pub fn set_long(&mut self, index: usize, value: i64) -> Result<()> {
        self.set_value(index, value)
    }

    #[allow(clippy::result_large_err)]
    pub fn set_double(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_value(index, value)
    }

    #[allow(clippy::result_large_err)]
    pub fn set_boolean(&mut self, index: usize, value: bool) -> Result<()> {
        self.set_value(index, value)
    }

    #[allow(clippy::result_large_err)]
    pub fn set_string(&mut self, index: usize, value: &str) -> Result<()> {
        self.set_value(index, value)
    }

    #[allow(clippy::result_large_err)]
    pub fn set_bytes(&mut self, index: usize, value: &[u8]) -> Result<()> {
        self.set_value(index, value)
    }

    #[allow(clippy::result_large_err)]
    pub fn set_null(&mut self, index: usize, field_type: FieldType) -> Result<()> {
        self.check_open()?;
        self.bindings.set_null(index, field_type)
    }

    /// Bind a byte stream; `length` is `None` when unknown.
    #[allow(clippy::result_large_err)]
    pub fn set_binary_stream(
        &mut self,
        index: usize,
        reader: impl Read + Send + 'static,
        length: Option<u64>,
    ) -> Result<()> {
        self.check_open()?;
        self.bindings
            .set_stream(index, StreamSource::new(reader), length)
    }

    #[allow(clippy::result_large_err)]
    pub fn clear_parameters(&mut self) -> Result<()> {
        self.check_open()?;
        self.bindings.clear();
        Ok(())
    }

    /// Queue a snapshot of the current bindings.
    #[allow(clippy::result_large_err)]
    pub fn add_batch(&mut self) -> Result<()> {
        self.check_open()?;
        if let Some(index) = self.bindings.first_unset() {
            return Err(Error::Statement(StatementError::new(
                StatementErrorKind::IllegalState,
                format!("No value specified for parameter {index}"),
            )));
        }
        self.batch.push_bindings(self.bindings.clone());
        Ok(())
    }

    /// Queue a SQL string. The batch then always runs serially.
    #[allow(clippy::result_large_err)]
    pub fn add_batch_sql(&mut self, sql: impl Into<String>) -> Result<()> {
        self.check_open()?;
        self.batch.push_sql(sql);
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn clear_batch(&mut self) -> Result<()> {
        self.check_open()?;
        self.batch.clear();
        Ok(())
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Run the queued batch, returning one count per entry.
    ///
    /// Counts above `i32::MAX` are clamped; use
    /// [`execute_large_batch`](Self::execute_large_batch) for exact values.
    #[allow(clippy::result_large_err)]
    pub fn execute_batch(&mut self) -> Result<Vec<i32>> {
        self.execute_large_batch().map(|counts| clamp_to_i32(&counts))
    }

    /// Run the queued batch, returning one count per entry.
    ///
    /// On failure the error is [`Error::BatchUpdate`] carrying the counts
    /// known so far.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self), fields(sql = %self.info.sql()))]
    pub fn execute_large_batch(&mut self) -> Result<Vec<i64>> {
        let batch = self.batch.drain();
        self.check_open()?;
        self.keys.clear();
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(entries = batch.len(), "Executing batch");
        let start = Instant::now();

        let result = self.conn.execute_locked(&self.cancel, self.query_timeout, |session| {
            let mut ctx = BatchContext {
                session,
                config: &self.conn.config,
                cancel: self.cancel.as_ref(),
                keys: &mut self.keys,
            };
            let target = PreparedTarget {
                info: &self.info,
                server: self.server.as_ref(),
            };
            execute_prepared_batch(&mut ctx, target, &batch)
        });

        match &result {
            Ok(counts) => tracing::info!(
                entries = counts.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "Batch complete"
            ),
            Err(e) => tracing::info!(
                elapsed_ms = start.elapsed().as_millis(),
                error = %e,
                "Batch failed"
            ),
        }
        result
    }

    /// Execute once with the current bindings.
    #[allow(clippy::result_large_err)]
    pub fn execute_update(&mut self) -> Result<i64> {
        self.check_open()?;
        if let Some(index) = self.bindings.first_unset() {
            return Err(Error::Statement(StatementError::new(
                StatementErrorKind::IllegalState,
                format!("No value specified for parameter {index}"),
            )));
        }
        self.keys.clear();

        self.conn.execute_locked(&self.cancel, self.query_timeout, |session| {
            let mut ctx = BatchContext {
                session,
                config: &self.conn.config,
                cancel: self.cancel.as_ref(),
                keys: &mut self.keys,
            };
            let target = PreparedTarget {
                info: &self.info,
                server: self.server.as_ref(),
            };
            execute_single(&mut ctx, target, self.bindings.values())
        })
    }

    /// Keys generated by the last execution.
    #[allow(clippy::result_large_err)]
    pub fn generated_keys(&self) -> Result<&[Row]> {
        self.check_open()?;
        if !self.generated_keys.is_enabled() {
            return keys_not_requested();
        }
        Ok(self.keys.rows())
    }

    pub fn set_query_timeout(&mut self, timeout: Duration) {
        self.query_timeout = (!timeout.is_zero()).then_some(timeout);
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    /// Handle that cancels this statement's running execution.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(
            Arc::clone(&self.cancel),
            self.conn.connection_id,
            self.conn.canceller.clone(),
        )
    }

    /// Close the statement, releasing its server handle. Closing twice is
    /// a no-op.
    #[allow(clippy::result_large_err)]
    pub fn close(&mut self) -> Result<()> {
        if self.state == StatementState::Closed {
            return Ok(());
        }
        self.state = StatementState::Closed;
        self.batch.clear();
        self.bindings.clear();

        match self.server.take() {
            Some(stmt) if !self.conn.is_closed() => {
                let mut session = self.conn.lock_session()?;
                session.close_prepared(stmt)
            }
            _ => Ok(()),
        }
    }
}

impl<S: Session> Drop for PreparedStatement<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close prepared statement");
        }
    }
}

/// A statement running SQL strings.
pub struct Statement<S: Session> {
    conn: Arc<ConnectionInner<S>>,
    batch: Vec<String>,
    keys: GeneratedKeysLedger,
    query_timeout: Option<Duration>,
    cancel: Arc<CancelState>,
    state: StatementState,
}

impl<S: Session> std::fmt::Debug for Statement<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("batch", &self.batch.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<S: Session> Statement<S> {
    pub(crate) fn new(conn: Arc<ConnectionInner<S>>) -> Self {
        Self {
            conn,
            batch: Vec::new(),
            keys: GeneratedKeysLedger::new(true),
            query_timeout: None,
            cancel: Arc::new(CancelState::default()),
            state: StatementState::Open,
        }
    }

    pub fn state(&self) -> StatementState {
        state_of(self.state, &self.conn)
    }

    #[allow(clippy::result_large_err)]
    fn check_open(&self) -> Result<()> {
        check_state(self.state())
    }

    #[allow(clippy::result_large_err)]
    pub fn add_batch(&mut self, sql: impl Into<String>) -> Result<()> {
        self.check_open()?;
        self.batch.push(sql.into());
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn clear_batch(&mut self) -> Result<()> {
        self.check_open()?;
        self.batch.clear();
        Ok(())
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    #[allow(clippy::result_large_err)]
    pub fn execute_batch(&mut self) -> Result<Vec<i32>> {
        self.execute_large_batch().map(|counts| clamp_to_i32(&counts))
    }

    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn execute_large_batch(&mut self) -> Result<Vec<i64>> {
        let sqls = std::mem::take(&mut self.batch);
        self.check_open()?;
        self.keys.clear();
        if sqls.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(entries = sqls.len(), "Executing statement batch");
        let start = Instant::now();

        let result = self.conn.execute_locked(&self.cancel, self.query_timeout, |session| {
            let mut ctx = BatchContext {
                session,
                config: &self.conn.config,
                cancel: self.cancel.as_ref(),
                keys: &mut self.keys,
            };
            execute_statement_batch(&mut ctx, &sqls)
        });

        if let Ok(counts) = &result {
            tracing::info!(
                entries = counts.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "Statement batch complete"
            );
        }
        result
    }

    /// Execute one SQL string.
    #[allow(clippy::result_large_err)]
    pub fn execute_update(&mut self, sql: &str) -> Result<i64> {
        self.check_open()?;
        self.keys.clear();
        self.conn.execute_locked(&self.cancel, self.query_timeout, |session| {
            let mut ctx = BatchContext {
                session,
                config: &self.conn.config,
                cancel: self.cancel.as_ref(),
                keys: &mut self.keys,
            };
            execute_sql(&mut ctx, sql)
        })
    }

    /// Keys generated by the last execution.
    #[allow(clippy::result_large_err)]
    pub fn generated_keys(&self) -> Result<&[Row]> {
        self.check_open()?;
        Ok(self.keys.rows())
    }

    pub fn set_query_timeout(&mut self, timeout: Duration) {
        self.query_timeout = (!timeout.is_zero()).then_some(timeout);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(
            Arc::clone(&self.cancel),
            self.conn.connection_id,
            self.conn.canceller.clone(),
        )
    }

    pub fn close(&mut self) {
        self.state = StatementState::Closed;
        self.batch.clear();
    }
}
