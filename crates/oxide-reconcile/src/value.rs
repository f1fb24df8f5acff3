//! Logical column types and row values.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text layout used to store timestamps in text-affinity columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Logical data type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// Boolean.
    Bool,
    /// Point in time (UTC).
    Timestamp,
    /// Raw bytes.
    Bytes,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A single cell value.
///
/// `Null` is distinct from every zero value: an unset nullable column reads
/// back as `Null`, never as `0` or `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Text value.
    String(String),
    /// Integer value.
    Int64(i64),
    /// Floating point value.
    Float64(f64),
    /// Boolean value.
    Bool(bool),
    /// Timestamp value.
    Timestamp(DateTime<Utc>),
    /// Binary value.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the logical type carried by this value, `None` for NULL.
    #[must_use]
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::String(_) => Some(ColumnType::String),
            Self::Int64(_) => Some(ColumnType::Int64),
            Self::Float64(_) => Some(ColumnType::Float64),
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Timestamp(_) => Some(ColumnType::Timestamp),
            Self::Bytes(_) => Some(ColumnType::Bytes),
        }
    }

    /// Returns whether this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a raw scanned value into the storage type of a column.
    ///
    /// Drivers report values in their native storage classes (SQLite keeps
    /// booleans as integers and timestamps as text); this maps them back.
    pub fn coerce(self, target: ColumnType) -> Result<Self, String> {
        if self.column_type().map_or(true, |ty| ty == target) {
            return Ok(self);
        }
        match (self, target) {
            (Self::Int64(i), ColumnType::Float64) => Ok(Self::Float64(i as f64)),
            (Self::Int64(i), ColumnType::Bool) => Ok(Self::Bool(i != 0)),
            (Self::Float64(f), ColumnType::Int64) if f.fract() == 0.0 => Ok(Self::Int64(f as i64)),
            (Self::String(s), ColumnType::Int64) => s
                .trim()
                .parse()
                .map(Self::Int64)
                .map_err(|e| format!("'{s}' is not an integer: {e}")),
            (Self::String(s), ColumnType::Float64) => s
                .trim()
                .parse()
                .map(Self::Float64)
                .map_err(|e| format!("'{s}' is not a number: {e}")),
            (Self::String(s), ColumnType::Bool) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "t" => Ok(Self::Bool(true)),
                "0" | "false" | "f" => Ok(Self::Bool(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            (Self::String(s), ColumnType::Timestamp) => parse_timestamp(&s).map(Self::Timestamp),
            (Self::String(s), ColumnType::Bytes) => Ok(Self::Bytes(s.into_bytes())),
            (Self::Bytes(b), ColumnType::String) => String::from_utf8(b)
                .map(Self::String)
                .map_err(|e| format!("invalid UTF-8: {e}")),
            (Self::Int64(i), ColumnType::String) => Ok(Self::String(i.to_string())),
            (Self::Float64(f), ColumnType::String) => Ok(Self::String(f.to_string())),
            (Self::Bool(b), ColumnType::String) => Ok(Self::String(b.to_string())),
            (Self::Timestamp(t), ColumnType::String) => Ok(Self::String(format_timestamp(&t))),
            (value, target) => Err(format!("cannot convert {value:?} to {target}")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Formats a timestamp with [`TIMESTAMP_FORMAT`].
#[must_use]
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a timestamp written as [`TIMESTAMP_FORMAT`], RFC 3339 or a bare date.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    let text = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        return Ok(dt.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{text}' is not a timestamp"))
}
