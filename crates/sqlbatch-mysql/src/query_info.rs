//! SQL shape analysis for batch rewriting.
//!
//! [`QueryInfo`] records what the batch engine needs to know about a
//! statement: where its `?` placeholders are, whether it is a single-row
//! `INSERT ... VALUES (...)` that can be widened into a multi-value INSERT,
//! and whether it carries an ON DUPLICATE KEY UPDATE clause.
//!
//! Analysis runs over a masked copy of the SQL in which string literals,
//! quoted identifiers and comments are blanked out byte for byte, so
//! offsets found in the mask are valid in the original text.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::MySqlConfig;

static LITERALS_AND_COMMENTS: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?s)'(?:[^'\\]|\\.|'')*'?|"(?:[^"\\]|\\.|"")*"?|`(?:[^`]|``)*`?|/\*.*?(?:\*/|$)|--[ \t][^\n]*|#[^\n]*"#,
    )
});
static VALUES_KEYWORD: LazyLock<Regex> = LazyLock::new(|| compile(r"\bVALUES?\b"));
static ON_DUPLICATE_KEY_UPDATE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\bON\s+DUPLICATE\s+KEY\s+UPDATE\b"));
static LAST_INSERT_ID_CALL: LazyLock<Regex> = LazyLock::new(|| compile(r"\bLAST_INSERT_ID\s*\("));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| unreachable!("invalid built-in pattern {pattern}: {e}"))
}

/// Leading keyword of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Replace,
    Update,
    Delete,
    Select,
    Other,
}

/// Byte span of the single `( ... )` group following VALUES.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValuesGroup {
    start: usize,
    end: usize,
}

/// Parsed shape of one SQL statement.
#[derive(Debug, Clone)]
pub struct QueryInfo {
    sql: String,
    kind: StatementKind,
    first_char: char,
    placeholders: Vec<usize>,
    contains_on_duplicate_key_update: bool,
    multi_statement: bool,
    values_group: Option<ValuesGroup>,
    rewritable_as_multi_value: bool,
}

impl QueryInfo {
    /// Analyze `sql` under the given configuration.
    pub fn parse(sql: &str, config: &MySqlConfig) -> Self {
        let masked = mask_literals_and_comments(sql);
        let upper = masked.to_ascii_uppercase();

        let trimmed = upper.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        let first_char = trimmed.chars().next().unwrap_or(' ');
        let keyword: String = trimmed
            .chars()
            .take_while(char::is_ascii_alphabetic)
            .collect();
        let kind = match keyword.as_str() {
            "INSERT" => StatementKind::Insert,
            "REPLACE" => StatementKind::Replace,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "SELECT" | "WITH" => StatementKind::Select,
            _ => StatementKind::Other,
        };

        let placeholders: Vec<usize> = masked.match_indices('?').map(|(i, _)| i).collect();
        let multi_statement = is_multi_statement(&masked);

        let odku_at = if config.check_on_duplicate_key_update() && kind == StatementKind::Insert {
            ON_DUPLICATE_KEY_UPDATE.find(&upper).map(|m| m.start())
        } else {
            None
        };

        let values_group = match kind {
            StatementKind::Insert | StatementKind::Replace => find_values_group(&upper),
            _ => None,
        };

        let rewritable_as_multi_value = match values_group {
            Some(group) if !multi_statement => {
                let all_inside = placeholders.iter().all(|&p| p > group.start && p < group.end);
                let tail_calls_last_insert_id = odku_at
                    .is_some_and(|at| LAST_INSERT_ID_CALL.is_match(&upper[at..]));
                all_inside && !tail_calls_last_insert_id
            }
            _ => false,
        };

        Self {
            sql: sql.to_string(),
            kind,
            first_char,
            placeholders,
            contains_on_duplicate_key_update: odku_at.is_some(),
            multi_statement,
            values_group,
            rewritable_as_multi_value,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// First significant character, upper-cased (`'R'` for REPLACE).
    pub fn first_char(&self) -> char {
        self.first_char
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Byte offsets of the `?` placeholders in [`sql`](Self::sql).
    pub fn placeholder_offsets(&self) -> &[usize] {
        &self.placeholders
    }

    pub fn contains_on_duplicate_key_update(&self) -> bool {
        self.contains_on_duplicate_key_update
    }

    pub fn is_multi_statement(&self) -> bool {
        self.multi_statement
    }

    /// Can this statement be widened into `VALUES (...),(...),...`?
    pub fn is_rewritable_as_multi_value(&self) -> bool {
        self.rewritable_as_multi_value
    }

    /// The `( ... )` group after VALUES, parentheses included.
    pub fn values_clause(&self) -> Option<&str> {
        self.values_group.map(|g| &self.sql[g.start..g.end])
    }

    /// SQL inserting `rows` copies of the values group.
    ///
    /// Returns `None` when the statement is not rewritable.
    pub fn sql_for_batch(&self, rows: usize) -> Option<String> {
        if !self.rewritable_as_multi_value || rows == 0 {
            return None;
        }
        let group = self.values_group?;
        let clause = &self.sql[group.start..group.end];
        let mut sql = String::with_capacity(self.sql.len() + (clause.len() + 1) * (rows - 1));
        sql.push_str(&self.sql[..group.end]);
        for _ in 1..rows {
            sql.push(',');
            sql.push_str(clause);
        }
        sql.push_str(&self.sql[group.end..]);
        Some(sql)
    }
}

/// Strip trailing whitespace and statement terminators.
pub fn trim_statement(sql: &str) -> &str {
    sql.trim_end_matches(|c: char| c.is_whitespace() || c == ';')
}

/// Blank out string literals, quoted identifiers and comments.
pub fn mask_literals_and_comments(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut last = 0;
    for m in LITERALS_AND_COMMENTS.find_iter(sql) {
        masked.push_str(&sql[last..m.start()]);
        masked.extend(std::iter::repeat_n(' ', m.len()));
        last = m.end();
    }
    masked.push_str(&sql[last..]);
    masked
}

fn is_multi_statement(masked: &str) -> bool {
    masked
        .find(';')
        .is_some_and(|at| !masked[at..].trim_start_matches(|c: char| c.is_whitespace() || c == ';').is_empty())
}

/// Locate a single parenthesized group after VALUES in upper-cased masked SQL.
fn find_values_group(upper: &str) -> Option<ValuesGroup> {
    let keyword = VALUES_KEYWORD.find(upper)?;
    let bytes = upper.as_bytes();

    let mut start = keyword.end();
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    if bytes.get(start) != Some(&b'(') {
        return None;
    }

    let mut depth = 0_usize;
    let mut end = None;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end?;

    let rest = upper[end..].trim_start();
    if rest.starts_with(',') {
        return None;
    }
    if upper[end..].contains("SELECT") {
        return None;
    }
    Some(ValuesGroup { start, end })
}
