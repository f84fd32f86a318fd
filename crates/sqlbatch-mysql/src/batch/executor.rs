//! Running a drained batch against a session.
//!
//! Every path produces one update count per queued entry, in queue order,
//! and reports failures through a [`FailureCollector`]. Rewritten helper
//! statements are closed before returning, whatever the outcome.

use std::ops::Range;

use sqlbatch_core::error::{
    BatchUpdateError, Error, ProtocolError, Result, StatementError, StatementErrorKind,
};
use sqlbatch_core::session::{ExecResult, MultiResult, ServerStatement, Session};
use sqlbatch_core::BoundValue;

use super::accumulator::{GeneratedKeysLedger, ResultAccumulator, compensate_on_duplicate_key_update};
use super::failure::FailureCollector;
use super::queue::{BatchEntry, DrainedBatch};
use super::sizing::{ChunkPlan, plan_statement_chunks, values_per_round_trip};
use super::strategy::{BatchShape, Strategy, select_plain_strategy, select_strategy};
use crate::binding::BindingSet;
use crate::cancel::CancelState;
use crate::config::MySqlConfig;
use crate::query_info::{QueryInfo, trim_statement};
use crate::types::interpolate_bindings;

/// Everything a batch execution borrows from its statement and connection.
pub struct BatchContext<'a, S: Session> {
    pub session: &'a mut S,
    pub config: &'a MySqlConfig,
    pub cancel: &'a CancelState,
    pub keys: &'a mut GeneratedKeysLedger,
}

impl<S: Session> BatchContext<'_, S> {
    /// Run one round trip unless the batch was cancelled.
    #[allow(clippy::result_large_err)]
    fn round_trip<T>(&mut self, f: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        self.cancel.check()?;
        f(&mut *self.session).map_err(|e| self.cancel.map_error(e))
    }

    fn round_trip_multi(&mut self, sql: &str) -> MultiResult {
        if let Err(e) = self.cancel.check() {
            return MultiResult::failed(Vec::new(), e);
        }
        let mut multi = self.session.execute_multi(sql);
        multi.error = multi.error.map(|e| self.cancel.map_error(e));
        multi
    }

    fn max_allowed_packet(&self) -> usize {
        self.config
            .effective_max_allowed_packet(self.session.max_allowed_packet())
    }

    fn failure_collector(&self) -> FailureCollector {
        FailureCollector::new(
            self.config.continue_batch_on_error,
            self.session.rollback_on_lock_wait_timeout(),
        )
    }

    /// Exact count of one statement, collapsed to 1 for an upsert when
    /// `compensateOnDuplicateKeyUpdateCounts` is on.
    fn update_count(&self, result: &ExecResult, upsert: bool) -> i64 {
        let count = result.update_count();
        if upsert && self.config.compensate_on_duplicate_key_update_counts {
            compensate_on_duplicate_key_update(count)
        } else {
            count
        }
    }

    /// Shape of a raw SQL entry, parsed only when keys or counts need it.
    fn shape_of_sql(&self, sql: &str) -> EntryShape {
        if self.keys.is_enabled() || self.config.compensate_on_duplicate_key_update_counts {
            EntryShape::of(&QueryInfo::parse(sql, self.config))
        } else {
            EntryShape::default()
        }
    }

    fn record_keys(&mut self, result: &ExecResult, max_keys: u64, first_char: char) {
        let increment = self.session.auto_increment_increment();
        self.keys.record(result, max_keys, increment, first_char);
    }

    /// Run `f` with multi-statements on, restoring the session setting after.
    #[allow(clippy::result_large_err)]
    fn with_multi_statements<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let enable = !self.config.allow_multi_queries && !self.session.multi_statements_enabled();
        if enable {
            self.session
                .set_multi_statements(true)
                .map_err(|e| Error::BatchUpdate(BatchUpdateError::new(Vec::new(), e)))?;
        }

        let result = f(&mut *self);

        if enable {
            if let Err(e) = self.session.set_multi_statements(false) {
                tracing::warn!(error = %e, "Failed to disable multi-statements after batch");
            }
        }
        result
    }
}

/// What recording a statement's count and keys needs from its SQL.
#[derive(Debug, Clone, Copy)]
struct EntryShape {
    first_char: char,
    upsert: bool,
}

impl EntryShape {
    fn of(info: &QueryInfo) -> Self {
        Self {
            first_char: info.first_char(),
            upsert: info.contains_on_duplicate_key_update(),
        }
    }
}

impl Default for EntryShape {
    fn default() -> Self {
        Self {
            first_char: ' ',
            upsert: false,
        }
    }
}

/// The statement a prepared batch was queued on.
#[derive(Debug, Clone, Copy)]
pub struct PreparedTarget<'a> {
    pub info: &'a QueryInfo,
    /// Server handle when the statement was prepared server-side
    pub server: Option<&'a ServerStatement>,
}

impl PreparedTarget<'_> {
    /// Execute the statement once with `values`.
    #[allow(clippy::result_large_err)]
    pub fn execute<S: Session>(&self, ctx: &mut BatchContext<'_, S>, values: &[BoundValue]) -> Result<ExecResult> {
        match self.server {
            Some(stmt) => ctx.round_trip(|s| s.execute_prepared(stmt, values)),
            None => {
                let sql = interpolate_bindings(self.info.sql(), self.info.placeholder_offsets(), values)?;
                tracing::trace!(sql = %sql, "Executing bound statement");
                ctx.round_trip(|s| s.execute_text(&sql))
            }
        }
    }
}

#[derive(Debug)]
enum HelperHandle {
    Server(ServerStatement),
    Client { sql: String, offsets: Vec<usize> },
}

/// A multi-value INSERT prepared for a fixed number of rows.
#[derive(Debug)]
struct HelperStatement {
    handle: HelperHandle,
    rows: usize,
    bindings: Vec<BoundValue>,
}

impl HelperStatement {
    #[allow(clippy::result_large_err)]
    fn prepare<S: Session>(ctx: &mut BatchContext<'_, S>, info: &QueryInfo, rows: usize) -> Result<Self> {
        let sql = info.sql_for_batch(rows).ok_or_else(|| {
            Error::Protocol(ProtocolError {
                message: "statement cannot be rewritten as a multi-value INSERT".to_string(),
                source: None,
            })
        })?;

        let handle = if ctx.config.use_server_prep_stmts {
            HelperHandle::Server(ctx.round_trip(|s| s.prepare(&sql))?)
        } else {
            let offsets = QueryInfo::parse(&sql, ctx.config).placeholder_offsets().to_vec();
            HelperHandle::Client { sql, offsets }
        };
        tracing::debug!(rows, "Prepared multi-value helper statement");

        Ok(Self {
            handle,
            rows,
            bindings: Vec::with_capacity(rows * info.placeholder_count()),
        })
    }

    fn bind(&mut self, sets: &[&BindingSet]) {
        self.bindings.clear();
        for set in sets {
            self.bindings.extend(set.values().iter().cloned());
        }
    }

    #[allow(clippy::result_large_err)]
    fn execute<S: Session>(&self, ctx: &mut BatchContext<'_, S>) -> Result<ExecResult> {
        match &self.handle {
            HelperHandle::Server(stmt) => ctx.round_trip(|s| s.execute_prepared(stmt, &self.bindings)),
            HelperHandle::Client { sql, offsets } => {
                let sql = interpolate_bindings(sql, offsets, &self.bindings)?;
                ctx.round_trip(|s| s.execute_text(&sql))
            }
        }
    }

    fn clear_parameters(&mut self) {
        self.bindings.clear();
    }

    fn close<S: Session>(self, session: &mut S) {
        if let HelperHandle::Server(stmt) = self.handle {
            if let Err(e) = session.close_prepared(stmt) {
                tracing::warn!(rows = self.rows, error = %e, "Failed to close helper statement");
            }
        }
    }
}

/// Execute a drained prepared-statement batch.
#[allow(clippy::result_large_err)]
pub fn execute_prepared_batch<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    target: PreparedTarget<'_>,
    batch: &DrainedBatch,
) -> Result<Vec<i64>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    let sets = batch.binding_sets();
    let strategy = select_strategy(BatchShape {
        entry_count: batch.len(),
        has_raw_sql: batch.has_raw_sql || sets.is_none(),
        rewritable_as_multi_value: target.info.is_rewritable_as_multi_value(),
        rewrite_enabled: ctx.config.rewrite_batched_statements,
    });
    tracing::debug!(entries = batch.len(), strategy = ?strategy, "Selected batch strategy");

    match (strategy, sets) {
        (Strategy::MultiValueInsert, Some(sets)) => execute_multi_value(ctx, target.info, &sets),
        (Strategy::MultiStatement, Some(sets)) => execute_prepared_multi_statement(ctx, target.info, &sets),
        _ => execute_serial(ctx, Some(target), &batch.entries),
    }
}

/// Execute a plain statement batch of SQL strings.
#[allow(clippy::result_large_err)]
pub fn execute_statement_batch<S: Session>(ctx: &mut BatchContext<'_, S>, sqls: &[String]) -> Result<Vec<i64>> {
    if sqls.is_empty() {
        return Ok(Vec::new());
    }

    let strategy = select_plain_strategy(sqls.len(), ctx.config.rewrite_batched_statements);
    tracing::debug!(entries = sqls.len(), strategy = ?strategy, "Selected batch strategy");

    if strategy == Strategy::Serial {
        let entries: Vec<BatchEntry> = sqls.iter().cloned().map(BatchEntry::RawSql).collect();
        return execute_serial(ctx, None, &entries);
    }

    let chunks = plan_statement_chunks(sqls, ctx.max_allowed_packet());
    let mut acc = ResultAccumulator::new(sqls.len(), false);
    let mut failures = ctx.failure_collector();

    ctx.with_multi_statements(|ctx| {
        for chunk in chunks {
            let script = sqls[chunk.clone()]
                .iter()
                .map(|s| trim_statement(s))
                .collect::<Vec<_>>()
                .join(";");
            let shapes: Vec<EntryShape> = sqls[chunk.clone()]
                .iter()
                .map(|s| EntryShape::of(&QueryInfo::parse(s, ctx.config)))
                .collect();
            run_script(ctx, &script, chunk, &shapes, &mut acc, &mut failures)?;
        }
        Ok(())
    })?;

    failures.finish(acc)
}

/// One round trip per entry, exact counts.
#[allow(clippy::result_large_err)]
fn execute_serial<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    target: Option<PreparedTarget<'_>>,
    entries: &[BatchEntry],
) -> Result<Vec<i64>> {
    let mut acc = ResultAccumulator::new(entries.len(), false);
    let mut failures = ctx.failure_collector();

    for (index, entry) in entries.iter().enumerate() {
        tracing::trace!(index, "Executing batch entry");
        let (result, shape) = match entry {
            BatchEntry::Bindings(set) => match target {
                Some(target) => (target.execute(ctx, set.values()), EntryShape::of(target.info)),
                None => (
                    Err(Error::Statement(StatementError::new(
                        StatementErrorKind::Unsupported,
                        "bound parameters queued on a plain statement",
                    ))),
                    EntryShape::default(),
                ),
            },
            BatchEntry::RawSql(sql) => {
                let shape = ctx.shape_of_sql(sql);
                (ctx.round_trip(|s| s.execute_text(sql)), shape)
            }
        };

        match result {
            Ok(r) => {
                acc.record_exact(index, ctx.update_count(&r, shape.upsert));
                let max_keys = if shape.first_char == 'I' && shape.upsert { 1 } else { 0 };
                ctx.record_keys(&r, max_keys, shape.first_char);
            }
            Err(e) => failures.handle(e, &mut acc, index..index + 1, index)?,
        }
    }

    failures.finish(acc)
}

/// Chunks of `INSERT ... VALUES (...),(...)`.
#[allow(clippy::result_large_err)]
fn execute_multi_value<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    info: &QueryInfo,
    sets: &[&BindingSet],
) -> Result<Vec<i64>> {
    let clause_len = info.values_clause().map_or(0, str::len);
    let per_trip = values_per_round_trip(sets, clause_len + 1, info.sql().len(), ctx.max_allowed_packet());
    let plan = ChunkPlan::new(sets.len(), per_trip);
    tracing::debug!(
        entries = sets.len(),
        values_per_round_trip = plan.values_per_round_trip,
        full_chunks = plan.full_chunks(),
        remainder = plan.remainder(),
        "Executing multi-value INSERT batch"
    );

    let compensate = ctx.config.compensate_on_duplicate_key_update_counts && info.contains_on_duplicate_key_update();
    let mut acc = ResultAccumulator::new(sets.len(), compensate);
    let mut failures = ctx.failure_collector();
    let mut full: Option<HelperStatement> = None;
    let mut remainder: Option<HelperStatement> = None;

    let outcome = run_multi_value_chunks(
        ctx,
        info,
        sets,
        plan,
        &mut acc,
        &mut failures,
        [&mut full, &mut remainder],
    );

    for helper in [full, remainder].into_iter().flatten() {
        helper.close(&mut *ctx.session);
    }

    outcome?;
    failures.finish(acc)
}

#[allow(clippy::result_large_err)]
fn run_multi_value_chunks<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    info: &QueryInfo,
    sets: &[&BindingSet],
    plan: ChunkPlan,
    acc: &mut ResultAccumulator,
    failures: &mut FailureCollector,
    [full, remainder]: [&mut Option<HelperStatement>; 2],
) -> Result<()> {
    let max_keys = if info.contains_on_duplicate_key_update() { 1 } else { 0 };

    for chunk in plan.chunks() {
        let slot = if chunk.len() == plan.values_per_round_trip {
            &mut *full
        } else {
            &mut *remainder
        };

        tracing::debug!(first = chunk.start, rows = chunk.len(), "Executing multi-value chunk");
        match execute_chunk(ctx, info, slot, &sets[chunk.clone()]) {
            Ok(r) => {
                acc.record_chunk(chunk, r.update_count());
                ctx.record_keys(&r, max_keys, info.first_char());
            }
            Err(e) => {
                let completed = chunk.start;
                failures.handle(e, acc, chunk, completed)?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn execute_chunk<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    info: &QueryInfo,
    slot: &mut Option<HelperStatement>,
    sets: &[&BindingSet],
) -> Result<ExecResult> {
    if slot.is_none() {
        *slot = Some(HelperStatement::prepare(ctx, info, sets.len())?);
    }
    let Some(helper) = slot.as_mut() else {
        return Err(Error::Custom("helper statement was not prepared".to_string()));
    };

    helper.bind(sets);
    let result = helper.execute(ctx);
    helper.clear_parameters();
    result
}

/// Chunks of `stmt;stmt;...` with client-side bindings.
#[allow(clippy::result_large_err)]
fn execute_prepared_multi_statement<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    info: &QueryInfo,
    sets: &[&BindingSet],
) -> Result<Vec<i64>> {
    let per_trip = values_per_round_trip(sets, info.sql().len() + 1, info.sql().len(), ctx.max_allowed_packet());
    let plan = ChunkPlan::new(sets.len(), per_trip);
    tracing::debug!(
        entries = sets.len(),
        values_per_round_trip = plan.values_per_round_trip,
        "Executing multi-statement batch"
    );

    let template = trim_statement(info.sql());
    let shape = EntryShape::of(info);
    let mut acc = ResultAccumulator::new(sets.len(), false);
    let mut failures = ctx.failure_collector();

    ctx.with_multi_statements(|ctx| {
        for chunk in plan.chunks() {
            let script: Result<Vec<String>> = sets[chunk.clone()]
                .iter()
                .map(|set| interpolate_bindings(template, info.placeholder_offsets(), set.values()))
                .collect();
            match script {
                Ok(statements) => {
                    let script = statements.join(";");
                    let shapes = vec![shape; chunk.len()];
                    run_script(ctx, &script, chunk, &shapes, &mut acc, &mut failures)?;
                }
                Err(e) => {
                    let completed = chunk.start;
                    failures.handle(e, &mut acc, chunk, completed)?;
                }
            }
        }
        Ok(())
    })?;

    failures.finish(acc)
}

/// Send one multi-statement script covering `chunk` and record each
/// sub-statement's count and key. `shapes` lines up with `chunk`.
#[allow(clippy::result_large_err)]
fn run_script<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    script: &str,
    chunk: Range<usize>,
    shapes: &[EntryShape],
    acc: &mut ResultAccumulator,
    failures: &mut FailureCollector,
) -> Result<()> {
    tracing::debug!(first = chunk.start, statements = chunk.len(), "Executing multi-statement chunk");
    tracing::trace!(sql = %script, "Multi-statement script");

    let multi = ctx.round_trip_multi(script);
    let done = multi.results.len().min(chunk.len());
    for (i, (r, shape)) in multi.results.iter().take(done).zip(shapes).enumerate() {
        acc.record_exact(chunk.start + i, ctx.update_count(r, shape.upsert));
        ctx.record_keys(r, 1, shape.first_char);
    }

    let completed = chunk.start + done;
    let error = match multi.error {
        Some(e) => Some(e),
        None if done < chunk.len() => Some(Error::Protocol(ProtocolError {
            message: format!(
                "multi-statement returned {} results for {} statements",
                multi.results.len(),
                chunk.len()
            ),
            source: None,
        })),
        None => None,
    };
    if let Some(e) = error {
        failures.handle(e, acc, completed..chunk.end, completed)?;
    }
    Ok(())
}

/// Execute the statement once with its live bindings, recording keys.
#[allow(clippy::result_large_err)]
pub fn execute_single<S: Session>(
    ctx: &mut BatchContext<'_, S>,
    target: PreparedTarget<'_>,
    values: &[BoundValue],
) -> Result<i64> {
    let result = target.execute(ctx, values)?;
    let shape = EntryShape::of(target.info);
    let max_keys = if shape.upsert { 1 } else { 0 };
    ctx.record_keys(&result, max_keys, shape.first_char);
    Ok(ctx.update_count(&result, shape.upsert))
}

/// Execute one SQL string, recording keys.
#[allow(clippy::result_large_err)]
pub fn execute_sql<S: Session>(ctx: &mut BatchContext<'_, S>, sql: &str) -> Result<i64> {
    let shape = ctx.shape_of_sql(sql);
    let result = ctx.round_trip(|s| s.execute_text(sql))?;
    let max_keys = if shape.upsert { 1 } else { 0 };
    ctx.record_keys(&result, max_keys, shape.first_char);
    Ok(ctx.update_count(&result, shape.upsert))
}
