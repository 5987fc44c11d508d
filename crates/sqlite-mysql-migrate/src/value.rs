//! SQL value types for source-to-target data transfer.

use chrono::{Datelike, NaiveDateTime, Timelike};

/// A single cell value in transit from SQLite to MySQL.
///
/// SQLite stores exactly five storage classes; `DateTime` is the one
/// synthesized addition, produced when an epoch integer is normalized for
/// a DATETIME-mapped column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,

    /// 64-bit signed integer (SQLite INTEGER storage class).
    Integer(i64),

    /// 64-bit floating point (SQLite REAL storage class).
    Real(f64),

    /// UTF-8 text.
    Text(String),

    /// Opaque binary data.
    Blob(Vec<u8>),

    /// Timestamp without timezone, normalized from an epoch integer.
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render the value for error messages.
    ///
    /// Blobs are summarized by length; text is truncated so a pathological
    /// row does not flood the log.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => {
                if s.chars().count() > 64 {
                    let head: String = s.chars().take(64).collect();
                    format!("'{}...' ({} bytes)", head, s.len())
                } else {
                    format!("'{}'", s)
                }
            }
            SqlValue::Blob(b) => format!("<blob {} bytes>", b.len()),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl From<SqlValue> for mysql_async::Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => mysql_async::Value::NULL,
            SqlValue::Integer(i) => mysql_async::Value::Int(i),
            SqlValue::Real(f) => mysql_async::Value::Double(f),
            SqlValue::Text(s) => mysql_async::Value::Bytes(s.into_bytes()),
            SqlValue::Blob(b) => mysql_async::Value::Bytes(b),
            SqlValue::DateTime(dt) => mysql_async::Value::Date(
                dt.year() as u16,
                dt.month() as u8,
                dt.day() as u8,
                dt.hour() as u8,
                dt.minute() as u8,
                dt.second() as u8,
                dt.and_utc().timestamp_subsec_micros(),
            ),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

/// An ordered sequence of values aligned to a table's column order.
pub type Row = Vec<SqlValue>;
