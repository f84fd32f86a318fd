//! Error types for batch execution.

use std::fmt;

use crate::counts::clamp_to_i32;

/// The primary error type for all sqlbatch operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (lost connection, lock poisoned)
    Connection(ConnectionError),
    /// Statement rejected by the server
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Protocol errors reported by the session layer
    Protocol(ProtocolError),
    /// Configuration errors
    Config(ConfigError),
    /// Misuse of a statement (closed, unset parameters, bad index)
    Statement(StatementError),
    /// A batch failed; carries the partial update counts
    BatchUpdate(BatchUpdateError),
    /// I/O errors (reading parameter streams)
    Io(std::io::Error),
    /// The statement timeout expired
    Timeout,
    /// The statement was cancelled by the caller
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Connection lost during operation
    Disconnected,
    /// Connection was closed by the caller
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sqlstate: Option<String>,
    /// MySQL vendor error code (e.g. 1213 for a deadlock)
    pub vendor_code: Option<u16>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Deadlock detected; the server rolled back the transaction
    Deadlock,
    /// Lock wait timeout exceeded
    LockWaitTimeout,
    /// Statement timeout (server-side max execution time)
    Timeout,
    /// Query was interrupted (KILL QUERY)
    Cancelled,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct StatementError {
    pub kind: StatementErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// Operation on a closed statement
    Closed,
    /// Operation on a statement whose connection went away
    Invalid,
    /// A parameter slot was never bound
    IllegalState,
    /// Parameter index outside `1..=param_count`
    ParameterIndex,
    /// Operation not allowed for this statement shape
    Unsupported,
}

/// A batch failed part way.
///
/// `update_counts` is either truncated to the entries completed before a
/// fatal failure, or holds every entry with `EXECUTE_FAILED` markers when
/// the batch continued past recoverable failures.
#[derive(Debug)]
pub struct BatchUpdateError {
    pub large_update_counts: Vec<i64>,
    pub cause: Box<Error>,
}

impl BatchUpdateError {
    /// Create a batch failure carrying the given counts.
    pub fn new(large_update_counts: Vec<i64>, cause: Error) -> Self {
        Self {
            large_update_counts,
            cause: Box::new(cause),
        }
    }

    /// Update counts as `i32`, clamping anything above `i32::MAX`.
    pub fn update_counts(&self) -> Vec<i32> {
        clamp_to_i32(&self.large_update_counts)
    }

    /// The error that stopped (or was first recorded during) the batch.
    pub fn cause(&self) -> &Error {
        &self.cause
    }
}

impl QueryError {
    /// Build a query error from a server error packet, classifying the
    /// MySQL vendor code.
    pub fn from_server(vendor_code: u16, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = match vendor_code {
            1213 => QueryErrorKind::Deadlock,
            1205 => QueryErrorKind::LockWaitTimeout,
            1317 => QueryErrorKind::Cancelled,
            3024 | 1907 => QueryErrorKind::Timeout,
            1062 | 1451 | 1452 | 1048 | 1216 | 1217 => QueryErrorKind::Constraint,
            1064 | 1149 => QueryErrorKind::Syntax,
            _ => QueryErrorKind::Database,
        };
        Self {
            kind,
            sqlstate: Some(sqlstate.into()),
            vendor_code: Some(vendor_code),
            message: message.into(),
            source: None,
        }
    }
}

impl StatementError {
    pub fn new(kind: StatementErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Error {
    /// Is this a timeout or a cancellation, whether raised locally by the
    /// cancel timer or reported by the server?
    pub fn is_timeout_or_cancel(&self) -> bool {
        match self {
            Error::Timeout | Error::Cancelled => true,
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Timeout | QueryErrorKind::Cancelled),
            _ => false,
        }
    }

    /// Get the MySQL vendor error code if available.
    pub fn vendor_code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => q.vendor_code,
            Error::BatchUpdate(b) => b.cause.vendor_code(),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "40001" for a deadlock)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            Error::BatchUpdate(b) => b.cause.sqlstate(),
            _ => None,
        }
    }

    /// Statement misuse kind, if this is a statement error.
    pub fn statement_kind(&self) -> Option<StatementErrorKind> {
        match self {
            Error::Statement(s) => Some(s.kind),
            _ => None,
        }
    }

    /// The batch failure payload, if this is a batch update error.
    pub fn as_batch_update(&self) -> Option<&BatchUpdateError> {
        match self {
            Error::BatchUpdate(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Statement(e) => write!(f, "Statement error: {}", e.message),
            Error::BatchUpdate(e) => write!(f, "{}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Statement cancelled due to timeout"),
            Error::Cancelled => write!(f, "Statement cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::BatchUpdate(e) => Some(e.cause.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.vendor_code, &self.sqlstate) {
            (Some(code), Some(state)) => {
                write!(f, "{} (errno {}, SQLSTATE {})", self.message, code, state)
            }
            (None, Some(state)) => write!(f, "{} (SQLSTATE {})", self.message, state),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for BatchUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch update failed after {} update counts: {}",
            self.large_update_counts.len(),
            self.cause
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<StatementError> for Error {
    fn from(err: StatementError) -> Self {
        Error::Statement(err)
    }
}

impl From<BatchUpdateError> for Error {
    fn from(err: BatchUpdateError) -> Self {
        Error::BatchUpdate(err)
    }
}

/// Result type alias for sqlbatch operations.
pub type Result<T> = std::result::Result<T, Error>;
