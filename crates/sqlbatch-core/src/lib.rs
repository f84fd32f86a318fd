//! Core types for sqlbatch.
//!
//! `sqlbatch-core` holds everything the MySQL batch engine shares with the
//! wire layer below it:
//!
//! - **Values** (`Value`, `BoundValue`) bound to statement parameters
//! - **Rows** returned as generated keys or result sets
//! - **Errors** including the `BatchUpdateError` carrying partial counts
//! - **Session** traits standing for one server connection

pub mod bound;
pub mod counts;
pub mod error;
pub mod row;
pub mod session;
pub mod value;

pub use bound::{BoundValue, FieldType, StreamSource, encode_binary_value};
pub use counts::{EXECUTE_FAILED, NOT_ATTEMPTED, SUCCESS_NO_INFO, clamp_to_i32};
pub use error::{
    BatchUpdateError, ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError,
    QueryError, QueryErrorKind, Result, StatementError, StatementErrorKind, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use session::{ExecResult, GENERATED_KEY_COLUMN, MultiResult, QueryCanceller, ServerStatement, Session};
pub use value::{DateTimeParts, Value};
