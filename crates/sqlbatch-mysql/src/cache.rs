//! Per-connection cache of parsed SQL shapes.
//!
//! Parsing a statement for batch rewriting scans the whole SQL text, so a
//! connection that prepares the same SQL repeatedly keeps the result here.
//! The cache belongs to one [`Connection`](crate::connection::Connection)
//! and is emptied when that connection closes.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::MySqlConfig;
use crate::query_info::QueryInfo;

/// LRU cache of [`QueryInfo`] keyed by SQL text.
///
/// Entries are kept in recency order: a hit moves its entry to the back and
/// eviction removes from the front.
#[derive(Debug)]
pub struct QueryInfoCache {
    entries: IndexMap<String, Arc<QueryInfo>>,
    max_size: usize,
    sql_limit: usize,
    enabled: bool,
}

impl QueryInfoCache {
    /// Create a cache sized by `prepStmtCacheSize` and `prepStmtCacheSqlLimit`.
    pub fn new(config: &MySqlConfig) -> Self {
        Self {
            entries: IndexMap::with_capacity(config.prep_stmt_cache_size),
            max_size: config.prep_stmt_cache_size,
            sql_limit: config.prep_stmt_cache_sql_limit,
            enabled: config.cache_prep_stmts && config.prep_stmt_cache_size > 0,
        }
    }

    /// Return the cached shape of `sql`, parsing and admitting it on a miss.
    pub fn get_or_parse(&mut self, sql: &str, config: &MySqlConfig) -> Arc<QueryInfo> {
        if !self.enabled || sql.len() > self.sql_limit {
            return Arc::new(QueryInfo::parse(sql, config));
        }

        if let Some(index) = self.entries.get_index_of(sql) {
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
            tracing::trace!(sql = sql, "Query info cache hit");
            if let Some((_, info)) = self.entries.get_index(last) {
                return Arc::clone(info);
            }
        }

        tracing::trace!(sql = sql, "Query info cache miss");
        let info = Arc::new(QueryInfo::parse(sql, config));
        if self.entries.len() >= self.max_size {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                tracing::trace!(sql = %evicted, "Evicted LRU query info");
            }
        }
        self.entries.insert(sql.to_string(), Arc::clone(&info));
        info
    }

    pub fn contains(&self, sql: &str) -> bool {
        self.entries.contains_key(sql)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        tracing::debug!("Query info cache cleared");
    }
}
