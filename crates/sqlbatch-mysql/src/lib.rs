//! Batched statement execution for MySQL.
//!
//! This crate runs JDBC-style statement batches over a MySQL
//! [`Session`](sqlbatch_core::Session). It provides:
//!
//! - Per-statement batch queues of bound parameter sets and raw SQL
//! - Rewriting of `INSERT ... VALUES` batches into multi-value INSERTs
//! - Multi-statement scripts for batches that cannot be rewritten that way
//! - Chunking so every round trip fits in `max_allowed_packet`
//! - Update counts per entry, including partial counts on failure
//! - Generated-key collection across a whole batch
//! - Query timeouts and cancellation from another thread
//!
//! # Strategy
//!
//! | Batch                                   | Execution                  |
//! |-----------------------------------------|----------------------------|
//! | contains raw SQL                        | one round trip per entry   |
//! | rewritable INSERT, rewrite enabled      | multi-value INSERT chunks  |
//! | more than 3 entries, rewrite enabled    | multi-statement chunks     |
//! | anything else                           | one round trip per entry   |
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlbatch_mysql::{Connection, MySqlConfig};
//!
//! let config = MySqlConfig::new().rewrite_batched_statements(true);
//! let conn = Connection::new(session, config);
//!
//! let mut stmt = conn.prepare_statement("INSERT INTO t (a, b) VALUES (?, ?)")?;
//! for (a, b) in rows {
//!     stmt.set_int(1, a)?;
//!     stmt.set_string(2, b)?;
//!     stmt.add_batch()?;
//! }
//! let counts = stmt.execute_batch()?;
//! ```

pub mod batch;
pub mod binding;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod query_info;
pub mod statement;
pub mod types;

pub use binding::BindingSet;
pub use cache::QueryInfoCache;
pub use cancel::{CancelHandle, CancelQueryTimer, CancelState, CancelStatus};
pub use config::{GeneratedKeys, MySqlConfig};
pub use connection::Connection;
pub use query_info::{QueryInfo, StatementKind};
pub use statement::{PreparedStatement, Statement, StatementState};

pub use sqlbatch_core::{
    BatchUpdateError, BoundValue, EXECUTE_FAILED, Error, FieldType, Result, Row, SUCCESS_NO_INFO, Session, Value,
};
