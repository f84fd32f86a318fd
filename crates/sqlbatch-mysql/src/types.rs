//! MySQL text-protocol literals.
//!
//! Client-side prepared statements never reach the server as prepared
//! statements: their bindings are rendered as SQL literals and spliced into
//! the text at the placeholder offsets found by
//! [`QueryInfo`](crate::query_info::QueryInfo).

use sqlbatch_core::error::{Error, Result, StatementError, StatementErrorKind};
use sqlbatch_core::{BoundValue, DateTimeParts, Value};

/// Quote and escape a string for the MySQL text protocol.
pub fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => result.push_str("''"),
            '\\' => result.push_str("\\\\"),
            '\0' => result.push_str("\\0"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\x1a' => result.push_str("\\Z"),
            _ => result.push(ch),
        }
    }
    result.push('\'');
    result
}

/// Render bytes as a hex literal.
pub fn escape_bytes(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut result = String::with_capacity(data.len() * 2 + 3);
    result.push_str("X'");
    for byte in data {
        let _ = write!(result, "{byte:02X}");
    }
    result.push('\'');
    result
}

fn format_float(f: f64) -> String {
    if f.is_finite() {
        f.to_string()
    } else {
        "NULL".to_string()
    }
}

fn format_date(p: &DateTimeParts) -> String {
    format!("{:04}-{:02}-{:02}", p.year, p.month, p.day)
}

fn format_time_of_day(p: &DateTimeParts) -> String {
    if p.micros == 0 {
        format!("{:02}:{:02}:{:02}", p.hour, p.minute, p.second)
    } else {
        format!(
            "{:02}:{:02}:{:02}.{:06}",
            p.hour, p.minute, p.second, p.micros
        )
    }
}

/// Format a value as a MySQL SQL literal.
pub fn format_value_for_sql(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::TinyInt(i) => i.to_string(),
        Value::SmallInt(i) => i.to_string(),
        Value::Int(i) => i.to_string(),
        Value::BigInt(i) => i.to_string(),
        Value::Float(f) => format_float(f64::from(*f)),
        Value::Double(f) => format_float(*f),
        Value::Decimal(s) => s.clone(),
        Value::Text(s) => escape_string(s),
        Value::Bytes(b) => escape_bytes(b),
        Value::Json(j) => escape_string(&j.to_string()),
        Value::Date(d) => format!("'{}'", format_date(&DateTimeParts::from_days(*d))),
        Value::Time(t) => {
            let sign = if *t < 0 { "-" } else { "" };
            let p = DateTimeParts::from_time_micros(t.abs());
            let hours = t.abs() / 3_600_000_000;
            let clock = format_time_of_day(&p);
            format!("'{sign}{hours:02}{}'", &clock[2..])
        }
        Value::Timestamp(t) => {
            let p = DateTimeParts::from_timestamp_micros(*t);
            format!("'{} {}'", format_date(&p), format_time_of_day(&p))
        }
    }
}

/// Render one binding as a literal, reading streams to the end.
#[allow(clippy::result_large_err)]
pub fn format_binding_for_sql(binding: &BoundValue) -> Result<String> {
    match binding {
        BoundValue::Unset => Err(Error::Statement(StatementError::new(
            StatementErrorKind::IllegalState,
            "No value specified for parameter",
        ))),
        BoundValue::Null { .. } => Ok("NULL".to_string()),
        BoundValue::Value { value, .. } => Ok(format_value_for_sql(value)),
        BoundValue::Stream { source, length, .. } => Ok(escape_bytes(&source.read_all(*length)?)),
    }
}

/// Splice bindings into `sql` at the given placeholder byte offsets.
#[allow(clippy::result_large_err)]
pub fn interpolate_bindings(sql: &str, offsets: &[usize], bindings: &[BoundValue]) -> Result<String> {
    if offsets.len() != bindings.len() {
        return Err(Error::Statement(StatementError::new(
            StatementErrorKind::ParameterIndex,
            format!(
                "statement has {} placeholders but {} values were bound",
                offsets.len(),
                bindings.len()
            ),
        )));
    }

    let mut result = String::with_capacity(sql.len() + bindings.len() * 16);
    let mut last = 0;
    for (&offset, binding) in offsets.iter().zip(bindings) {
        result.push_str(&sql[last..offset]);
        result.push_str(&format_binding_for_sql(binding)?);
        last = offset + 1;
    }
    result.push_str(&sql[last..]);
    Ok(result)
}
