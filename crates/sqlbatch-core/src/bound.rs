//! Parameter slots and their wire encoding.
//!
//! A [`BoundValue`] is one positional parameter of a prepared statement.
//! Materialized values are encoded to MySQL binary-protocol bytes when they
//! are bound, so batch sizing can measure them without re-encoding. Streams
//! stay as readers until execution.

#![allow(clippy::cast_possible_truncation)]

use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::value::{DateTimeParts, Value};

/// MySQL field type codes used to tag bound parameters.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    /// FLOAT (MYSQL_TYPE_FLOAT)
    Float = 0x04,
    /// DOUBLE (MYSQL_TYPE_DOUBLE)
    Double = 0x05,
    /// NULL (MYSQL_TYPE_NULL)
    Null = 0x06,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// DATE (MYSQL_TYPE_DATE)
    Date = 0x0A,
    /// TIME (MYSQL_TYPE_TIME)
    Time = 0x0B,
    /// DATETIME (MYSQL_TYPE_DATETIME)
    DateTime = 0x0C,
    /// JSON (MYSQL_TYPE_JSON)
    Json = 0xF5,
    /// NEWDECIMAL (MYSQL_TYPE_NEWDECIMAL)
    NewDecimal = 0xF6,
    /// BLOB (MYSQL_TYPE_BLOB)
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
}

impl FieldType {
    /// The type a value is sent as when the caller gives no explicit type.
    pub const fn for_value(value: &Value) -> Self {
        match value {
            Value::Null => FieldType::Null,
            Value::Bool(_) | Value::TinyInt(_) => FieldType::Tiny,
            Value::SmallInt(_) => FieldType::Short,
            Value::Int(_) => FieldType::Long,
            Value::BigInt(_) => FieldType::LongLong,
            Value::Float(_) => FieldType::Float,
            Value::Double(_) => FieldType::Double,
            Value::Decimal(_) => FieldType::NewDecimal,
            Value::Text(_) => FieldType::VarString,
            Value::Bytes(_) => FieldType::Blob,
            Value::Date(_) => FieldType::Date,
            Value::Time(_) => FieldType::Time,
            Value::Timestamp(_) => FieldType::DateTime,
            Value::Json(_) => FieldType::Json,
        }
    }

    /// Is this type sent as a length-prefixed byte string?
    pub const fn is_length_prefixed(self) -> bool {
        matches!(
            self,
            FieldType::Json | FieldType::NewDecimal | FieldType::Blob | FieldType::VarString
        )
    }
}

/// A caller-supplied byte stream bound to a parameter.
///
/// Clones share the same reader: a queued batch entry and the live binding
/// it was copied from point at one stream, which is consumed once.
#[derive(Clone)]
pub struct StreamSource {
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
}

impl StreamSource {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    /// Read the stream, stopping after `length` bytes when a length is known.
    #[allow(clippy::result_large_err)]
    pub fn read_all(&self, length: Option<u64>) -> Result<Vec<u8>> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| Error::Custom("parameter stream lock poisoned".to_string()))?;
        let mut buf = Vec::new();
        match length {
            Some(len) => {
                reader.as_mut().take(len).read_to_end(&mut buf)?;
            }
            None => {
                reader.read_to_end(&mut buf)?;
            }
        }
        Ok(buf)
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").finish_non_exhaustive()
    }
}

/// One positional parameter slot.
#[derive(Debug, Clone, Default)]
pub enum BoundValue {
    /// Never bound since the statement was prepared or its parameters cleared
    #[default]
    Unset,
    /// SQL NULL
    Null { declared_type: FieldType },
    /// A materialized value with its binary-protocol encoding
    Value {
        value: Value,
        bytes: Vec<u8>,
        declared_type: FieldType,
    },
    /// A byte stream sent as long data; `length` is `None` when unknown
    Stream {
        source: StreamSource,
        length: Option<u64>,
        declared_type: FieldType,
    },
}

impl BoundValue {
    /// Bind a value, encoding it with its natural field type.
    pub fn from_value(value: Value) -> Self {
        let declared_type = FieldType::for_value(&value);
        Self::with_type(value, declared_type)
    }

    /// Bind a value with an explicit field type.
    pub fn with_type(value: Value, declared_type: FieldType) -> Self {
        if value.is_null() {
            return BoundValue::Null { declared_type };
        }
        let bytes = encode_binary_value(&value, declared_type);
        BoundValue::Value {
            value,
            bytes,
            declared_type,
        }
    }

    /// Bind a stream of bytes.
    pub fn stream(source: StreamSource, length: Option<u64>) -> Self {
        BoundValue::Stream {
            source,
            length,
            declared_type: FieldType::Blob,
        }
    }

    pub const fn is_set(&self) -> bool {
        !matches!(self, BoundValue::Unset)
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, BoundValue::Null { .. })
    }

    pub const fn is_stream(&self) -> bool {
        matches!(self, BoundValue::Stream { .. })
    }

    /// Wire-ready bytes of a materialized value.
    pub fn byte_representation(&self) -> Option<&[u8]> {
        match self {
            BoundValue::Value { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    /// Declared length of a streamed value; `-1` when unknown, `None` when
    /// the slot is not a stream.
    pub fn stream_length(&self) -> Option<i64> {
        match self {
            BoundValue::Stream { length, .. } => Some(
                length
                    .and_then(|l| i64::try_from(l).ok())
                    .unwrap_or(-1),
            ),
            _ => None,
        }
    }

    pub fn declared_type(&self) -> Option<FieldType> {
        match self {
            BoundValue::Unset => None,
            BoundValue::Null { declared_type }
            | BoundValue::Value { declared_type, .. }
            | BoundValue::Stream { declared_type, .. } => Some(*declared_type),
        }
    }

    /// The materialized value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            BoundValue::Value { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Encode a value for the binary protocol.
pub fn encode_binary_value(value: &Value, field_type: FieldType) -> Vec<u8> {
    match value {
        Value::Null => vec![],

        Value::Bool(b) => vec![u8::from(*b)],

        Value::TinyInt(i) => vec![*i as u8],

        Value::SmallInt(i) => i.to_le_bytes().to_vec(),

        Value::Int(i) => match field_type {
            FieldType::LongLong => i64::from(*i).to_le_bytes().to_vec(),
            _ => i.to_le_bytes().to_vec(),
        },

        Value::BigInt(i) => match field_type {
            FieldType::Tiny => vec![*i as u8],
            FieldType::Short => (*i as i16).to_le_bytes().to_vec(),
            FieldType::Long => (*i as i32).to_le_bytes().to_vec(),
            _ => i.to_le_bytes().to_vec(),
        },

        Value::Float(f) => f.to_le_bytes().to_vec(),

        Value::Double(f) => f.to_le_bytes().to_vec(),

        Value::Decimal(s) | Value::Text(s) => encode_length_prefixed_bytes(s.as_bytes()),

        Value::Bytes(b) => encode_length_prefixed_bytes(b),

        Value::Json(j) => encode_length_prefixed_bytes(j.to_string().as_bytes()),

        Value::Date(d) => {
            let p = DateTimeParts::from_days(*d);
            let mut out = vec![4];
            out.extend_from_slice(&(p.year as u16).to_le_bytes());
            out.push(p.month as u8);
            out.push(p.day as u8);
            out
        }

        Value::Time(t) => {
            let negative = *t < 0;
            let p = DateTimeParts::from_time_micros(t.abs());
            let days = (t.abs() / 86_400_000_000) as u32;
            let mut out = vec![if p.micros == 0 { 8 } else { 12 }, u8::from(negative)];
            out.extend_from_slice(&days.to_le_bytes());
            out.push(p.hour as u8);
            out.push(p.minute as u8);
            out.push(p.second as u8);
            if p.micros != 0 {
                out.extend_from_slice(&p.micros.to_le_bytes());
            }
            out
        }

        Value::Timestamp(t) => {
            let p = DateTimeParts::from_timestamp_micros(*t);
            let mut out = vec![if p.micros == 0 { 7 } else { 11 }];
            out.extend_from_slice(&(p.year as u16).to_le_bytes());
            out.push(p.month as u8);
            out.push(p.day as u8);
            out.push(p.hour as u8);
            out.push(p.minute as u8);
            out.push(p.second as u8);
            if p.micros != 0 {
                out.extend_from_slice(&p.micros.to_le_bytes());
            }
            out
        }
    }
}

/// Encode bytes with a length-encoded-integer prefix.
fn encode_length_prefixed_bytes(data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut result = Vec::with_capacity(len + 9);

    if len < 251 {
        result.push(len as u8);
    } else if len < 0x10000 {
        result.push(0xFC);
        result.extend_from_slice(&(len as u16).to_le_bytes());
    } else if len < 0x0100_0000 {
        result.push(0xFD);
        result.push((len & 0xFF) as u8);
        result.push(((len >> 8) & 0xFF) as u8);
        result.push(((len >> 16) & 0xFF) as u8);
    } else {
        result.push(0xFE);
        result.extend_from_slice(&(len as u64).to_le_bytes());
    }

    result.extend_from_slice(data);
    result
}
