//! Batching configuration.
//!
//! The connection properties that steer batch execution, with the same
//! names and defaults as the MySQL JDBC driver so existing connection
//! strings carry over.

use serde::{Deserialize, Serialize};
use sqlbatch_core::error::{ConfigError, Error, Result};

/// Whether a statement collects auto-increment keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeneratedKeys {
    /// Keys are not collected
    #[default]
    NoGeneratedKeys,
    /// Keys are collected into the statement's generated-keys ledger
    ReturnGeneratedKeys,
}

impl GeneratedKeys {
    pub const fn is_enabled(self) -> bool {
        matches!(self, GeneratedKeys::ReturnGeneratedKeys)
    }
}

/// Batching configuration for a MySQL connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MySqlConfig {
    /// Rewrite batches into multi-value INSERTs or multi-statement scripts
    pub rewrite_batched_statements: bool,
    /// Keep executing after a recoverable per-entry failure
    pub continue_batch_on_error: bool,
    /// Report 1 instead of 2 or 0 for ON DUPLICATE KEY UPDATE rows
    pub compensate_on_duplicate_key_update_counts: bool,
    /// Skip scanning SQL for ON DUPLICATE KEY UPDATE (ignored when rewriting)
    pub dont_check_on_duplicate_key_update_in_sql: bool,
    /// Prepare statements on the server instead of interpolating client-side
    pub use_server_prep_stmts: bool,
    /// Multi-statements are already enabled for the session
    pub allow_multi_queries: bool,
    /// Honor per-statement query timeouts
    pub enable_query_timeouts: bool,
    /// Overrides the server-reported `max_allowed_packet` when set
    pub max_allowed_packet: Option<usize>,
    /// Cache parsed SQL shape per connection
    pub cache_prep_stmts: bool,
    /// Number of entries kept in the parse cache
    pub prep_stmt_cache_size: usize,
    /// Longest SQL admitted to the parse cache
    pub prep_stmt_cache_sql_limit: usize,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            rewrite_batched_statements: false,
            continue_batch_on_error: true,
            compensate_on_duplicate_key_update_counts: false,
            dont_check_on_duplicate_key_update_in_sql: false,
            use_server_prep_stmts: false,
            allow_multi_queries: false,
            enable_query_timeouts: true,
            max_allowed_packet: None,
            cache_prep_stmts: false,
            prep_stmt_cache_size: 25,
            prep_stmt_cache_sql_limit: 256,
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rewrite_batched_statements(mut self, enabled: bool) -> Self {
        self.rewrite_batched_statements = enabled;
        self
    }

    pub fn continue_batch_on_error(mut self, enabled: bool) -> Self {
        self.continue_batch_on_error = enabled;
        self
    }

    pub fn compensate_on_duplicate_key_update_counts(mut self, enabled: bool) -> Self {
        self.compensate_on_duplicate_key_update_counts = enabled;
        self
    }

    pub fn dont_check_on_duplicate_key_update_in_sql(mut self, enabled: bool) -> Self {
        self.dont_check_on_duplicate_key_update_in_sql = enabled;
        self
    }

    pub fn use_server_prep_stmts(mut self, enabled: bool) -> Self {
        self.use_server_prep_stmts = enabled;
        self
    }

    pub fn allow_multi_queries(mut self, enabled: bool) -> Self {
        self.allow_multi_queries = enabled;
        self
    }

    pub fn enable_query_timeouts(mut self, enabled: bool) -> Self {
        self.enable_query_timeouts = enabled;
        self
    }

    /// Set the max allowed packet size used to size rewritten batches.
    pub fn max_allowed_packet(mut self, size: usize) -> Self {
        self.max_allowed_packet = Some(size);
        self
    }

    pub fn cache_prep_stmts(mut self, enabled: bool) -> Self {
        self.cache_prep_stmts = enabled;
        self
    }

    pub fn prep_stmt_cache_size(mut self, size: usize) -> Self {
        self.prep_stmt_cache_size = size;
        self
    }

    pub fn prep_stmt_cache_sql_limit(mut self, limit: usize) -> Self {
        self.prep_stmt_cache_sql_limit = limit;
        self
    }

    /// Should SQL be scanned for ON DUPLICATE KEY UPDATE?
    pub fn check_on_duplicate_key_update(&self) -> bool {
        !self.dont_check_on_duplicate_key_update_in_sql || self.rewrite_batched_statements
    }

    /// Packet limit for a session reporting `server_value`.
    pub fn effective_max_allowed_packet(&self, server_value: usize) -> usize {
        self.max_allowed_packet.unwrap_or(server_value)
    }

    /// Apply one property by its connection-string name.
    #[allow(clippy::result_large_err)]
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "rewriteBatchedStatements" => self.rewrite_batched_statements = parse_bool(name, value)?,
            "continueBatchOnError" => self.continue_batch_on_error = parse_bool(name, value)?,
            "compensateOnDuplicateKeyUpdateCounts" => {
                self.compensate_on_duplicate_key_update_counts = parse_bool(name, value)?;
            }
            "dontCheckOnDuplicateKeyUpdateInSQL" => {
                self.dont_check_on_duplicate_key_update_in_sql = parse_bool(name, value)?;
            }
            "useServerPrepStmts" => self.use_server_prep_stmts = parse_bool(name, value)?,
            "allowMultiQueries" => self.allow_multi_queries = parse_bool(name, value)?,
            "enableQueryTimeouts" => self.enable_query_timeouts = parse_bool(name, value)?,
            "maxAllowedPacket" => self.max_allowed_packet = Some(parse_usize(name, value)?),
            "cachePrepStmts" => self.cache_prep_stmts = parse_bool(name, value)?,
            "prepStmtCacheSize" => self.prep_stmt_cache_size = parse_usize(name, value)?,
            "prepStmtCacheSqlLimit" => self.prep_stmt_cache_sql_limit = parse_usize(name, value)?,
            _ => {
                return Err(config_error(format!("unknown connection property '{name}'")));
            }
        }
        Ok(())
    }

    /// Parse `name=value&name=value` pairs over the defaults.
    #[allow(clippy::result_large_err)]
    pub fn from_query_string(query: &str) -> Result<Self> {
        let mut config = Self::default();
        for pair in query.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| config_error(format!("property '{pair}' has no value")))?;
            config.set_property(name.trim(), value.trim())?;
        }
        Ok(config)
    }

    /// Parse a JSON configuration document.
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid configuration: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }
}

fn config_error(message: String) -> Error {
    Error::Config(ConfigError {
        message,
        source: None,
    })
}

#[allow(clippy::result_large_err)]
fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(config_error(format!(
            "property '{name}' expects a boolean, got '{value}'"
        ))),
    }
}

#[allow(clippy::result_large_err)]
fn parse_usize(name: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|e: std::num::ParseIntError| {
        Error::Config(ConfigError {
            message: format!("property '{name}' expects a number, got '{value}'"),
            source: Some(Box::new(e)),
        })
    })
}
