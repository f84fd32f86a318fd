//! Batch execution against a scripted in-memory session.
//!
//! The session logs every round trip as SQL text, so assertions read the
//! same whether bindings were interpolated client-side or sent to a
//! server-side statement.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sqlbatch_core::error::{QueryError, StatementErrorKind};
use sqlbatch_core::session::{ExecResult, MultiResult, QueryCanceller, ServerStatement};
use sqlbatch_core::BoundValue;
use sqlbatch_mysql::types::interpolate_bindings;
use sqlbatch_mysql::{
    Connection, EXECUTE_FAILED, Error, GeneratedKeys, MySqlConfig, QueryInfo, Result, SUCCESS_NO_INFO, Session,
    StatementState,
};

const INSERT: &str = "INSERT INTO t (a, b) VALUES (?, ?)";
const UPDATE: &str = "UPDATE t SET a = ? WHERE id = ?";

#[derive(Default)]
struct MockState {
    /// Every round trip, in order
    log: Vec<String>,
    /// SQL fragment -> vendor error code
    failures: Vec<(String, u16)>,
    /// SQL fragment -> how long the statement runs
    slow: Option<(String, Duration)>,
    affected_override: Option<u64>,
    next_insert_id: u64,
    multi_enabled: bool,
    fail_enable_multi: bool,
    next_statement_id: u32,
    prepared: Vec<ServerStatement>,
    closed: Vec<u32>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<MockState>,
    killed: AtomicBool,
    sleeping: AtomicBool,
    kills: AtomicUsize,
}

struct MockSession {
    shared: Arc<Shared>,
}

struct MockCanceller {
    shared: Arc<Shared>,
}

impl QueryCanceller for MockCanceller {
    fn cancel(&self, _connection_id: u64) -> Result<()> {
        self.shared.kills.fetch_add(1, Ordering::SeqCst);
        self.shared.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn server_error(code: u16) -> Error {
    let (sqlstate, message) = match code {
        1062 => ("23000", "Duplicate entry"),
        1213 => ("40001", "Deadlock found when trying to get lock"),
        1317 => ("70100", "Query execution was interrupted"),
        _ => ("HY000", "Server error"),
    };
    Error::Query(QueryError::from_server(code, sqlstate, message))
}

fn rows_in(sql: &str) -> u64 {
    if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") {
        sql.matches("),(").count() as u64 + 1
    } else {
        1
    }
}

impl MockSession {
    fn run(&self, sql: &str) -> Result<ExecResult> {
        let (failure, slow, affected, insert_id) = {
            let mut st = self.shared.state.lock().unwrap();
            let failure = st
                .failures
                .iter()
                .find(|(marker, _)| sql.contains(marker.as_str()))
                .map(|(_, code)| *code);
            let slow = st
                .slow
                .as_ref()
                .filter(|(marker, _)| sql.contains(marker.as_str()))
                .map(|(_, d)| *d);
            let rows = rows_in(sql);
            let affected = st.affected_override.unwrap_or(rows);
            let insert_id = if sql.starts_with("INSERT") && st.next_insert_id > 0 {
                let id = st.next_insert_id;
                st.next_insert_id += rows;
                id
            } else {
                0
            };
            (failure, slow, affected, insert_id)
        };

        if let Some(duration) = slow {
            self.sleep(duration)?;
        }
        match failure {
            Some(code) => Err(server_error(code)),
            None => Ok(ExecResult::ok(affected, insert_id)),
        }
    }

    fn sleep(&self, duration: Duration) -> Result<()> {
        self.shared.sleeping.store(true, Ordering::SeqCst);
        let start = Instant::now();
        let outcome = loop {
            if self.shared.killed.swap(false, Ordering::SeqCst) {
                break Err(server_error(1317));
            }
            if start.elapsed() >= duration {
                break Ok(());
            }
            thread::sleep(Duration::from_millis(2));
        };
        self.shared.sleeping.store(false, Ordering::SeqCst);
        outcome
    }

    fn log(&self, entry: impl Into<String>) {
        self.shared.state.lock().unwrap().log.push(entry.into());
    }
}

impl Session for MockSession {
    fn connection_id(&self) -> u64 {
        42
    }

    fn max_allowed_packet(&self) -> usize {
        64 * 1024 * 1024
    }

    fn multi_statements_enabled(&self) -> bool {
        self.shared.state.lock().unwrap().multi_enabled
    }

    fn set_multi_statements(&mut self, enabled: bool) -> Result<()> {
        let mut st = self.shared.state.lock().unwrap();
        if enabled && st.fail_enable_multi {
            return Err(server_error(1235));
        }
        st.multi_enabled = enabled;
        st.log
            .push(format!("SET multi_statements = {}", if enabled { "ON" } else { "OFF" }));
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<ServerStatement> {
        let mut st = self.shared.state.lock().unwrap();
        st.next_statement_id += 1;
        let stmt = ServerStatement {
            id: st.next_statement_id,
            sql: sql.to_string(),
            param_count: sql.matches('?').count(),
        };
        st.prepared.push(stmt.clone());
        Ok(stmt)
    }

    fn execute_prepared(&mut self, stmt: &ServerStatement, params: &[BoundValue]) -> Result<ExecResult> {
        let info = QueryInfo::parse(&stmt.sql, &MySqlConfig::new());
        let sql = interpolate_bindings(&stmt.sql, info.placeholder_offsets(), params)?;
        self.log(sql.clone());
        self.run(&sql)
    }

    fn close_prepared(&mut self, stmt: ServerStatement) -> Result<()> {
        self.shared.state.lock().unwrap().closed.push(stmt.id);
        Ok(())
    }

    fn execute_text(&mut self, sql: &str) -> Result<ExecResult> {
        self.log(sql);
        self.run(sql)
    }

    fn execute_multi(&mut self, sql: &str) -> MultiResult {
        self.log(sql);
        let mut results = Vec::new();
        for statement in sql.split(';') {
            match self.run(statement) {
                Ok(r) => results.push(r),
                Err(e) => return MultiResult::failed(results, e),
            }
        }
        MultiResult::completed(results)
    }

    fn canceller(&self) -> Option<Arc<dyn QueryCanceller>> {
        Some(Arc::new(MockCanceller {
            shared: Arc::clone(&self.shared),
        }))
    }
}

fn connect(config: MySqlConfig) -> (Connection<MockSession>, Arc<Shared>) {
    let shared = Arc::new(Shared::default());
    let session = MockSession {
        shared: Arc::clone(&shared),
    };
    (Connection::new(session, config), shared)
}

fn log_of(shared: &Shared) -> Vec<String> {
    shared.state.lock().unwrap().log.clone()
}

fn queue_pairs(stmt: &mut sqlbatch_mysql::PreparedStatement<MockSession>, rows: &[(i32, i32)]) {
    for &(a, b) in rows {
        stmt.set_int(1, a).unwrap();
        stmt.set_int(2, b).unwrap();
        stmt.add_batch().unwrap();
    }
}

fn rewriting() -> MySqlConfig {
    MySqlConfig::new().rewrite_batched_statements(true)
}

#[test]
fn serial_batch_preserves_order() {
    let (conn, shared) = connect(MySqlConfig::new());
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(10, 1), (20, 2), (30, 3)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1, 1, 1]);
    assert_eq!(
        log_of(&shared),
        vec![
            "UPDATE t SET a = 10 WHERE id = 1",
            "UPDATE t SET a = 20 WHERE id = 2",
            "UPDATE t SET a = 30 WHERE id = 3",
        ]
    );
    assert_eq!(stmt.batch_len(), 0);
}

#[test]
fn empty_batch_sends_nothing() {
    let (conn, shared) = connect(rewriting());
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    assert!(stmt.execute_batch().unwrap().is_empty());
    assert!(log_of(&shared).is_empty());
}

#[test]
fn single_row_chunk_reports_exact_count() {
    let (conn, shared) = connect(rewriting());
    shared.state.lock().unwrap().affected_override = Some(3);
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    queue_pairs(&mut stmt, &[(1, 10)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![3]);
}

#[test]
fn multi_value_chunks_fit_packet_limit() {
    // Each set is two 4-byte ints plus the 7-byte "(?, ?)," overhead, so a
    // packet of 84 bytes leaves room for three sets after the SQL itself.
    let (conn, shared) = connect(rewriting().max_allowed_packet(INSERT.len() + 50));
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    queue_pairs(&mut stmt, &[(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);

    let counts = stmt.execute_large_batch().unwrap();
    assert_eq!(counts, vec![SUCCESS_NO_INFO; 5]);
    assert_eq!(
        log_of(&shared),
        vec![
            "INSERT INTO t (a, b) VALUES (1, 10),(2, 20),(3, 30)",
            "INSERT INTO t (a, b) VALUES (4, 40),(5, 50)",
        ]
    );
}

#[test]
fn unaffected_chunk_reports_zero() {
    let (conn, shared) = connect(rewriting());
    shared.state.lock().unwrap().affected_override = Some(0);
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    queue_pairs(&mut stmt, &[(1, 10), (2, 20), (3, 30)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![0, 0, 0]);
    assert_eq!(log_of(&shared).len(), 1);
}

#[test]
fn upsert_count_is_compensated() {
    let config = rewriting().compensate_on_duplicate_key_update_counts(true);
    let (conn, shared) = connect(config);
    shared.state.lock().unwrap().affected_override = Some(2);
    let mut stmt = conn
        .prepare_statement("INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE b = b + 1")
        .unwrap();
    queue_pairs(&mut stmt, &[(1, 10)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1]);
}

const UPSERT_WITH_PARAM: &str = "INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE b = ?";

fn queue_upserts(stmt: &mut sqlbatch_mysql::PreparedStatement<MockSession>, rows: &[(i32, i32)]) {
    for &(a, b) in rows {
        stmt.set_int(1, a).unwrap();
        stmt.set_int(2, b).unwrap();
        stmt.set_int(3, b).unwrap();
        stmt.add_batch().unwrap();
    }
}

#[test]
fn serial_upsert_count_is_compensated() {
    let config = MySqlConfig::new().compensate_on_duplicate_key_update_counts(true);
    let (conn, shared) = connect(config);
    shared.state.lock().unwrap().affected_override = Some(2);
    let mut stmt = conn
        .prepare_statement("INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE b = b + 1")
        .unwrap();
    queue_pairs(&mut stmt, &[(1, 10)]);
    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1]);

    queue_pairs(&mut stmt, &[(1, 10), (2, 20)]);
    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1, 1]);
    assert_eq!(log_of(&shared).len(), 3);
}

#[test]
fn unrewritable_upsert_count_is_compensated() {
    let config = rewriting().compensate_on_duplicate_key_update_counts(true);
    let (conn, shared) = connect(config);
    shared.state.lock().unwrap().affected_override = Some(2);
    let mut stmt = conn.prepare_statement(UPSERT_WITH_PARAM).unwrap();
    assert!(!stmt.query_info().is_rewritable_as_multi_value());
    queue_upserts(&mut stmt, &[(1, 10)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1]);
    assert_eq!(
        log_of(&shared),
        vec!["INSERT INTO t (a, b) VALUES (1, 10) ON DUPLICATE KEY UPDATE b = 10"]
    );
}

#[test]
fn multi_statement_upsert_counts_are_compensated() {
    let config = rewriting().compensate_on_duplicate_key_update_counts(true);
    let (conn, shared) = connect(config);
    shared.state.lock().unwrap().affected_override = Some(0);
    let mut stmt = conn.prepare_statement(UPSERT_WITH_PARAM).unwrap();
    queue_upserts(&mut stmt, &[(1, 10), (2, 20), (3, 30), (4, 40)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1, 1, 1, 1]);
    assert_eq!(log_of(&shared).len(), 3);
}

#[test]
fn execute_update_compensates_upsert_count() {
    let config = MySqlConfig::new().compensate_on_duplicate_key_update_counts(true);
    let (conn, shared) = connect(config);
    shared.state.lock().unwrap().affected_override = Some(2);

    let mut stmt = conn.prepare_statement(UPSERT_WITH_PARAM).unwrap();
    stmt.set_int(1, 1).unwrap();
    stmt.set_int(2, 10).unwrap();
    stmt.set_int(3, 10).unwrap();
    assert_eq!(stmt.execute_update().unwrap(), 1);

    let mut plain = conn.create_statement().unwrap();
    let sql = "INSERT INTO t (a, b) VALUES (1, 10) ON DUPLICATE KEY UPDATE b = 11";
    assert_eq!(plain.execute_update(sql).unwrap(), 1);
    assert_eq!(plain.execute_update("UPDATE t SET b = 1").unwrap(), 2);
}

#[test]
fn upsert_counts_are_raw_without_compensation() {
    let (conn, shared) = connect(MySqlConfig::new());
    shared.state.lock().unwrap().affected_override = Some(2);
    let mut stmt = conn.prepare_statement(UPSERT_WITH_PARAM).unwrap();
    queue_upserts(&mut stmt, &[(1, 10)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![2]);
}

#[test]
fn mixed_batch_runs_serially() {
    let (conn, shared) = connect(rewriting());
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    queue_pairs(&mut stmt, &[(1, 10), (2, 20)]);
    stmt.add_batch_sql("DELETE FROM t WHERE a = 1").unwrap();
    queue_pairs(&mut stmt, &[(3, 30)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1, 1, 1, 1]);
    assert_eq!(
        log_of(&shared),
        vec![
            "INSERT INTO t (a, b) VALUES (1, 10)",
            "INSERT INTO t (a, b) VALUES (2, 20)",
            "DELETE FROM t WHERE a = 1",
            "INSERT INTO t (a, b) VALUES (3, 30)",
        ]
    );
}

#[test]
fn failure_truncates_when_not_continuing() {
    let (conn, shared) = connect(MySqlConfig::new().continue_batch_on_error(false));
    shared
        .state
        .lock()
        .unwrap()
        .failures
        .push(("id = 3".to_string(), 1062));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3), (4, 4)]);

    let err = stmt.execute_large_batch().unwrap_err();
    let batch = err.as_batch_update().unwrap();
    assert_eq!(batch.large_update_counts, vec![1, 1]);
    assert_eq!(batch.cause().vendor_code(), Some(1062));
    assert_eq!(log_of(&shared).len(), 3);
    assert_eq!(stmt.batch_len(), 0);
}

#[test]
fn continue_on_error_marks_failed_entries() {
    let (conn, shared) = connect(MySqlConfig::new());
    shared
        .state
        .lock()
        .unwrap()
        .failures
        .push(("id = 2".to_string(), 1062));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3)]);

    let err = stmt.execute_batch().unwrap_err();
    let batch = err.as_batch_update().unwrap();
    assert_eq!(batch.update_counts(), vec![1, -3, 1]);
    assert_eq!(log_of(&shared).len(), 3);
}

#[test]
fn deadlock_stops_batch_even_when_continuing() {
    let (conn, shared) = connect(MySqlConfig::new());
    shared
        .state
        .lock()
        .unwrap()
        .failures
        .push(("id = 2".to_string(), 1213));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3)]);

    let err = stmt.execute_large_batch().unwrap_err();
    assert_eq!(err.as_batch_update().unwrap().large_update_counts, vec![1]);
    assert_eq!(log_of(&shared).len(), 2);
}

#[test]
fn failed_chunk_truncates_to_chunk_start() {
    let config = rewriting()
        .continue_batch_on_error(false)
        .max_allowed_packet(INSERT.len() + 50);
    let (conn, shared) = connect(config);
    shared
        .state
        .lock()
        .unwrap()
        .failures
        .push(("(4, 40)".to_string(), 1062));
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    queue_pairs(&mut stmt, &[(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);

    let err = stmt.execute_large_batch().unwrap_err();
    assert_eq!(
        err.as_batch_update().unwrap().large_update_counts,
        vec![SUCCESS_NO_INFO; 3]
    );
}

#[test]
fn server_helper_statements_are_closed() {
    let config = rewriting()
        .use_server_prep_stmts(true)
        .max_allowed_packet(INSERT.len() + 50);
    let (conn, shared) = connect(config);
    shared
        .state
        .lock()
        .unwrap()
        .failures
        .push(("(4, 40)".to_string(), 1062));
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    queue_pairs(&mut stmt, &[(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);

    let err = stmt.execute_large_batch().unwrap_err();
    assert_eq!(
        err.as_batch_update().unwrap().large_update_counts,
        vec![SUCCESS_NO_INFO, SUCCESS_NO_INFO, SUCCESS_NO_INFO, EXECUTE_FAILED, EXECUTE_FAILED]
    );

    let st = shared.state.lock().unwrap();
    let helpers: Vec<u32> = st
        .prepared
        .iter()
        .filter(|p| p.sql.contains("),("))
        .map(|p| p.id)
        .collect();
    assert_eq!(helpers.len(), 2);
    assert_eq!(st.closed, helpers);
    drop(st);

    stmt.close().unwrap();
    assert_eq!(shared.state.lock().unwrap().closed.len(), 3);
}

#[test]
fn prepared_multi_statement_toggles_session_option() {
    let (conn, shared) = connect(rewriting());
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3), (4, 4)]);

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1, 1, 1, 1]);
    assert_eq!(
        log_of(&shared),
        vec![
            "SET multi_statements = ON",
            "UPDATE t SET a = 1 WHERE id = 1;UPDATE t SET a = 2 WHERE id = 2;\
             UPDATE t SET a = 3 WHERE id = 3;UPDATE t SET a = 4 WHERE id = 4",
            "SET multi_statements = OFF",
        ]
    );
}

#[test]
fn three_entries_do_not_use_multi_statements() {
    let (conn, shared) = connect(rewriting());
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3)]);

    stmt.execute_large_batch().unwrap();
    assert_eq!(log_of(&shared).len(), 3);
}

#[test]
fn multi_statement_failure_keeps_completed_counts() {
    let (conn, shared) = connect(rewriting());
    shared
        .state
        .lock()
        .unwrap()
        .failures
        .push(("id = 3".to_string(), 1062));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);

    let err = stmt.execute_large_batch().unwrap_err();
    assert_eq!(
        err.as_batch_update().unwrap().large_update_counts,
        vec![1, 1, EXECUTE_FAILED, EXECUTE_FAILED, EXECUTE_FAILED]
    );
    assert!(!shared.state.lock().unwrap().multi_enabled);
}

#[test]
fn multi_statement_enable_failure_is_batch_failure() {
    let (conn, shared) = connect(rewriting());
    shared.state.lock().unwrap().fail_enable_multi = true;
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3), (4, 4)]);

    let err = stmt.execute_large_batch().unwrap_err();
    assert!(err.as_batch_update().unwrap().large_update_counts.is_empty());
    assert!(log_of(&shared).is_empty());
    assert_eq!(stmt.batch_len(), 0);
}

#[test]
fn allow_multi_queries_skips_toggle() {
    let (conn, shared) = connect(rewriting().allow_multi_queries(true));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3), (4, 4)]);

    stmt.execute_large_batch().unwrap();
    assert_eq!(log_of(&shared).len(), 1);
}

#[test]
fn generated_keys_span_the_batch() {
    let (conn, shared) = connect(rewriting());
    shared.state.lock().unwrap().next_insert_id = 100;
    let mut stmt = conn
        .prepare_statement_with_keys(INSERT, GeneratedKeys::ReturnGeneratedKeys)
        .unwrap();
    queue_pairs(&mut stmt, &[(1, 10), (2, 20), (3, 30)]);
    stmt.execute_large_batch().unwrap();

    let keys: Vec<i64> = stmt
        .generated_keys()
        .unwrap()
        .iter()
        .map(|row| row.get_as::<i64>(0).unwrap())
        .collect();
    assert_eq!(keys, vec![100, 101, 102]);
}

#[test]
fn upsert_chunk_yields_one_key() {
    let (conn, shared) = connect(rewriting());
    shared.state.lock().unwrap().next_insert_id = 7;
    let mut stmt = conn
        .prepare_statement_with_keys(
            "INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE b = b + 1",
            GeneratedKeys::ReturnGeneratedKeys,
        )
        .unwrap();
    queue_pairs(&mut stmt, &[(1, 10), (2, 20)]);
    stmt.execute_large_batch().unwrap();

    assert_eq!(stmt.generated_keys().unwrap().len(), 1);
}

#[test]
fn keys_require_request() {
    let (conn, _shared) = connect(MySqlConfig::new());
    let stmt = conn.prepare_statement(INSERT).unwrap();
    let err = stmt.generated_keys().unwrap_err();
    assert_eq!(err.statement_kind(), Some(StatementErrorKind::Unsupported));
}

#[test]
fn unset_parameter_rejected_by_add_batch() {
    let (conn, _shared) = connect(MySqlConfig::new());
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    stmt.set_int(1, 1).unwrap();

    let err = stmt.add_batch().unwrap_err();
    assert_eq!(err.statement_kind(), Some(StatementErrorKind::IllegalState));
    assert!(err.to_string().contains("parameter 2"));
    assert_eq!(stmt.batch_len(), 0);
}

#[test]
fn large_counts_are_clamped() {
    let (conn, shared) = connect(MySqlConfig::new());
    shared.state.lock().unwrap().affected_override = Some(u64::from(u32::MAX));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1)]);

    assert_eq!(stmt.execute_batch().unwrap(), vec![i32::MAX]);
}

#[test]
fn timeout_cancels_running_batch() {
    let (conn, shared) = connect(MySqlConfig::new());
    shared.state.lock().unwrap().slow = Some(("id = 2".to_string(), Duration::from_secs(5)));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    stmt.set_query_timeout(Duration::from_millis(50));
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3)]);

    let err = stmt.execute_large_batch().unwrap_err();
    let batch = err.as_batch_update().unwrap();
    assert_eq!(batch.large_update_counts, vec![1]);
    assert!(matches!(batch.cause(), Error::Timeout));
    assert_eq!(shared.kills.load(Ordering::SeqCst), 1);
    assert_eq!(log_of(&shared).len(), 2);
}

#[test]
fn timeout_spans_multi_value_chunks() {
    let (conn, shared) = connect(rewriting().max_allowed_packet(INSERT.len() + 50));
    shared.state.lock().unwrap().slow = Some(("(4, 40)".to_string(), Duration::from_secs(5)));
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    stmt.set_query_timeout(Duration::from_millis(50));
    queue_pairs(&mut stmt, &[(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);

    let err = stmt.execute_large_batch().unwrap_err();
    let batch = err.as_batch_update().unwrap();
    assert_eq!(batch.large_update_counts, vec![SUCCESS_NO_INFO; 3]);
    assert!(matches!(batch.cause(), Error::Timeout));
    assert_eq!(shared.kills.load(Ordering::SeqCst), 1);
    assert_eq!(
        log_of(&shared),
        vec![
            "INSERT INTO t (a, b) VALUES (1, 10),(2, 20),(3, 30)",
            "INSERT INTO t (a, b) VALUES (4, 40),(5, 50)",
        ]
    );
}

#[test]
fn timeout_inside_multi_statement_script() {
    let (conn, shared) = connect(rewriting());
    shared.state.lock().unwrap().slow = Some(("id = 3".to_string(), Duration::from_secs(5)));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    stmt.set_query_timeout(Duration::from_millis(50));
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);

    let err = stmt.execute_large_batch().unwrap_err();
    let batch = err.as_batch_update().unwrap();
    assert_eq!(batch.large_update_counts, vec![1, 1]);
    assert!(matches!(batch.cause(), Error::Timeout));
    assert_eq!(shared.kills.load(Ordering::SeqCst), 1);

    let log = log_of(&shared);
    assert_eq!(log.len(), 3);
    assert_eq!(log[2], "SET multi_statements = OFF");
    assert!(!shared.state.lock().unwrap().multi_enabled);
}

#[test]
fn cancel_handle_stops_batch() {
    let (conn, shared) = connect(MySqlConfig::new());
    shared.state.lock().unwrap().slow = Some(("id = 2".to_string(), Duration::from_secs(5)));
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1), (2, 2), (3, 3)]);

    let handle = stmt.cancel_handle();
    assert!(!handle.cancel());

    let watcher = Arc::clone(&shared);
    let canceller = thread::spawn(move || {
        while !watcher.sleeping.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        handle.cancel()
    });

    let err = stmt.execute_large_batch().unwrap_err();
    assert!(canceller.join().unwrap());
    let batch = err.as_batch_update().unwrap();
    assert_eq!(batch.large_update_counts, vec![1]);
    assert!(matches!(batch.cause(), Error::Cancelled));
}

#[test]
fn plain_statement_batch_uses_multi_statements_above_four() {
    let (conn, shared) = connect(rewriting());
    let mut stmt = conn.create_statement().unwrap();
    for id in 1..=5 {
        stmt.add_batch(format!("DELETE FROM t WHERE id = {id};")).unwrap();
    }

    assert_eq!(stmt.execute_large_batch().unwrap(), vec![1; 5]);
    let log = log_of(&shared);
    assert_eq!(log.len(), 3);
    assert_eq!(
        log[1],
        "DELETE FROM t WHERE id = 1;DELETE FROM t WHERE id = 2;DELETE FROM t WHERE id = 3;\
         DELETE FROM t WHERE id = 4;DELETE FROM t WHERE id = 5"
    );
}

#[test]
fn plain_statement_batch_of_four_is_serial() {
    let (conn, shared) = connect(rewriting());
    let mut stmt = conn.create_statement().unwrap();
    for id in 1..=4 {
        stmt.add_batch(format!("DELETE FROM t WHERE id = {id}")).unwrap();
    }

    assert_eq!(stmt.execute_batch().unwrap(), vec![1; 4]);
    assert_eq!(log_of(&shared).len(), 4);
}

#[test]
fn plain_statement_collects_keys() {
    let (conn, shared) = connect(MySqlConfig::new());
    shared.state.lock().unwrap().next_insert_id = 5;
    let mut stmt = conn.create_statement().unwrap();

    assert_eq!(stmt.execute_update("INSERT INTO t (a) VALUES (1),(2)").unwrap(), 2);
    assert_eq!(stmt.generated_keys().unwrap().len(), 2);
}

#[test]
fn execute_update_uses_live_bindings() {
    let (conn, shared) = connect(MySqlConfig::new());
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    stmt.set_int(1, 9).unwrap();
    stmt.set_int(2, 4).unwrap();

    assert_eq!(stmt.execute_update().unwrap(), 1);
    assert_eq!(log_of(&shared), vec!["UPDATE t SET a = 9 WHERE id = 4"]);
}

#[test]
fn closed_statement_rejects_operations() {
    let (conn, _shared) = connect(MySqlConfig::new());
    let mut stmt = conn.prepare_statement(INSERT).unwrap();
    stmt.close().unwrap();
    stmt.close().unwrap();

    assert_eq!(stmt.state(), StatementState::Closed);
    let err = stmt.set_int(1, 1).unwrap_err();
    assert_eq!(err.statement_kind(), Some(StatementErrorKind::Closed));
}

#[test]
fn closing_connection_invalidates_statements() {
    let (conn, _shared) = connect(MySqlConfig::new());
    let mut stmt = conn.prepare_statement(UPDATE).unwrap();
    queue_pairs(&mut stmt, &[(1, 1)]);
    conn.close().unwrap();

    assert_eq!(stmt.state(), StatementState::Invalid);
    let err = stmt.execute_large_batch().unwrap_err();
    assert_eq!(err.statement_kind(), Some(StatementErrorKind::Invalid));
    assert_eq!(stmt.batch_len(), 0);
    assert!(conn.prepare_statement(UPDATE).is_err());
}
