//! Pending batch entries.

use crate::binding::BindingSet;

/// One queued invocation.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    /// SQL text added with `add_batch_sql`
    RawSql(String),
    /// A snapshot of the statement's bindings added with `add_batch`
    Bindings(BindingSet),
}

/// Ordered queue of pending invocations.
///
/// Insertion order is execution order. Once a raw SQL entry is queued the
/// batch can no longer be rewritten; the flag resets when the queue is
/// drained or cleared.
#[derive(Debug, Default)]
pub struct BatchQueue {
    entries: Vec<BatchEntry>,
    has_raw_sql: bool,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bindings(&mut self, bindings: BindingSet) {
        self.entries.push(BatchEntry::Bindings(bindings));
    }

    pub fn push_sql(&mut self, sql: impl Into<String>) {
        self.entries.push(BatchEntry::RawSql(sql.into()));
        self.has_raw_sql = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_raw_sql(&self) -> bool {
        self.has_raw_sql
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Remove and return every entry, leaving the queue empty.
    pub fn drain(&mut self) -> DrainedBatch {
        let has_raw_sql = std::mem::take(&mut self.has_raw_sql);
        DrainedBatch {
            entries: std::mem::take(&mut self.entries),
            has_raw_sql,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.has_raw_sql = false;
    }
}

/// Entries taken from a [`BatchQueue`] for one execution.
#[derive(Debug, Default)]
pub struct DrainedBatch {
    pub entries: Vec<BatchEntry>,
    pub has_raw_sql: bool,
}

impl DrainedBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binding sets in queue order, `None` if any entry is raw SQL.
    pub fn binding_sets(&self) -> Option<Vec<&BindingSet>> {
        self.entries
            .iter()
            .map(|e| match e {
                BatchEntry::Bindings(set) => Some(set),
                BatchEntry::RawSql(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_drain() {
        let mut queue = BatchQueue::new();
        let mut set = BindingSet::new(1);
        set.set_value(1, 1_i32).unwrap();
        queue.push_bindings(set.clone());
        set.set_value(1, 2_i32).unwrap();
        queue.push_bindings(set);
        assert_eq!(queue.len(), 2);
        assert!(!queue.has_raw_sql());

        let drained = queue.drain();
        assert!(queue.is_empty());
        assert_eq!(drained.len(), 2);
        assert_eq!(drained.binding_sets().unwrap().len(), 2);
    }

    #[test]
    fn test_raw_sql_disables_rewrite_until_cleared() {
        let mut queue = BatchQueue::new();
        queue.push_bindings(BindingSet::new(0));
        queue.push_sql("DELETE FROM t");
        assert!(queue.has_raw_sql());
        assert!(matches!(queue.entries()[1], BatchEntry::RawSql(_)));

        let drained = queue.drain();
        assert!(drained.has_raw_sql);
        assert!(drained.binding_sets().is_none());
        assert!(!queue.has_raw_sql());

        queue.push_sql("DELETE FROM t");
        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.has_raw_sql());
    }
}
