//! Connections and the lock that serializes their statements.
//!
//! A [`Connection`] wraps one [`Session`] in a mutex. Every statement made
//! from the connection shares that mutex and holds it for the whole of an
//! execution, so statements on one connection never interleave round trips.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sqlbatch_core::error::{ConnectionError, ConnectionErrorKind, Error, Result};
use sqlbatch_core::session::{QueryCanceller, Session};

use crate::cache::QueryInfoCache;
use crate::cancel::{CancelQueryTimer, CancelState};
use crate::config::{GeneratedKeys, MySqlConfig};
use crate::query_info::QueryInfo;
use crate::statement::{PreparedStatement, Statement};

pub(crate) struct ConnectionInner<S: Session> {
    session: Mutex<S>,
    pub(crate) config: MySqlConfig,
    cache: Mutex<QueryInfoCache>,
    closed: AtomicBool,
    pub(crate) connection_id: u64,
    pub(crate) canceller: Option<Arc<dyn QueryCanceller>>,
}

fn poisoned(what: &str) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("{what} lock poisoned"),
        source: None,
    })
}

impl<S: Session> ConnectionInner<S> {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                message: "No operations allowed after connection closed".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn lock_session(&self) -> Result<MutexGuard<'_, S>> {
        self.session.lock().map_err(|_| poisoned("session"))
    }

    /// Parsed shape of `sql`, through the query-info cache.
    #[allow(clippy::result_large_err)]
    pub(crate) fn query_info(&self, sql: &str) -> Result<Arc<QueryInfo>> {
        let mut cache = self.cache.lock().map_err(|_| poisoned("query info cache"))?;
        Ok(cache.get_or_parse(sql, &self.config))
    }

    /// Run `f` holding the session lock, under a cancel timer when a
    /// timeout applies.
    #[allow(clippy::result_large_err)]
    pub(crate) fn execute_locked<T>(
        &self,
        cancel: &Arc<CancelState>,
        timeout: Option<Duration>,
        f: impl FnOnce(&mut S) -> Result<T>,
    ) -> Result<T> {
        self.check_open()?;
        let mut session = self.lock_session()?;
        cancel.begin();

        let timeout = timeout.filter(|t| self.config.enable_query_timeouts && !t.is_zero());
        let timer = match timeout {
            Some(t) => {
                match CancelQueryTimer::start(t, Arc::clone(cancel), self.connection_id, self.canceller.clone()) {
                    Ok(timer) => Some(timer),
                    Err(e) => {
                        cancel.end();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let result = f(&mut *session);

        if let Some(timer) = timer {
            timer.stop();
        }
        cancel.end();
        result
    }
}

/// A MySQL connection.
///
/// Cloning yields another handle to the same session.
pub struct Connection<S: Session> {
    inner: Arc<ConnectionInner<S>>,
}

impl<S: Session> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Session> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.inner.connection_id)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl<S: Session> Connection<S> {
    /// Wrap an established session.
    pub fn new(session: S, config: MySqlConfig) -> Self {
        let connection_id = session.connection_id();
        let canceller = session.canceller();
        tracing::debug!(connection_id, "Opened connection");
        Self {
            inner: Arc::new(ConnectionInner {
                cache: Mutex::new(QueryInfoCache::new(&config)),
                session: Mutex::new(session),
                config,
                closed: AtomicBool::new(false),
                connection_id,
                canceller,
            }),
        }
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.inner.config
    }

    /// Server thread id of the session.
    pub fn connection_id(&self) -> u64 {
        self.inner.connection_id
    }

    /// Prepare a statement without generated-key collection.
    #[allow(clippy::result_large_err)]
    pub fn prepare_statement(&self, sql: &str) -> Result<PreparedStatement<S>> {
        self.prepare_statement_with_keys(sql, GeneratedKeys::NoGeneratedKeys)
    }

    /// Prepare a statement, choosing whether generated keys are collected.
    #[allow(clippy::result_large_err)]
    pub fn prepare_statement_with_keys(&self, sql: &str, keys: GeneratedKeys) -> Result<PreparedStatement<S>> {
        PreparedStatement::new(Arc::clone(&self.inner), sql, keys)
    }

    /// Create a plain statement for SQL-string batches.
    #[allow(clippy::result_large_err)]
    pub fn create_statement(&self) -> Result<Statement<S>> {
        self.inner.check_open()?;
        Ok(Statement::new(Arc::clone(&self.inner)))
    }

    /// Parsed shape of `sql` as this connection sees it.
    #[allow(clippy::result_large_err)]
    pub fn query_info(&self, sql: &str) -> Result<Arc<QueryInfo>> {
        self.inner.query_info(sql)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Close the connection. Statements made from it become invalid.
    #[allow(clippy::result_large_err)]
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut cache = self
            .inner
            .cache
            .lock()
            .map_err(|_| poisoned("query info cache"))?;
        cache.clear();
        tracing::debug!(connection_id = self.inner.connection_id, "Closed connection");
        Ok(())
    }
}
