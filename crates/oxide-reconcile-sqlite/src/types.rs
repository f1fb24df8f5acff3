//! Mapping between logical column types and SQLite declared types.
//!
//! SQLite keeps whatever type name a column was declared with, so the
//! names written here are the names read back by introspection. Names
//! written by other tools fall back to SQLite's affinity rules.

use std::sync::OnceLock;

use oxide_reconcile::error::{Error, Result};
use oxide_reconcile::schema::Column;
use oxide_reconcile::value::ColumnType;
use regex::Regex;

/// Returns the declared type for a column.
#[must_use]
pub fn declared_type(column: &Column) -> String {
    match (column.data_type, column.max_size) {
        (ColumnType::String, 0) => "TEXT".to_string(),
        (ColumnType::String, size) => format!("VARCHAR({size})"),
        (ColumnType::Int64, _) => "BIGINT".to_string(),
        (ColumnType::Float64, _) => "DOUBLE".to_string(),
        (ColumnType::Bool, _) => "BOOLEAN".to_string(),
        (ColumnType::Timestamp, _) => "TIMESTAMP".to_string(),
        (ColumnType::Bytes, 0) => "BLOB".to_string(),
        (ColumnType::Bytes, size) => format!("BLOB({size})"),
    }
}

/// Returns the literal used to fill existing rows when a NOT NULL column is
/// added.
#[must_use]
pub fn zero_literal(data_type: ColumnType) -> &'static str {
    match data_type {
        ColumnType::String => "''",
        ColumnType::Int64 | ColumnType::Bool => "0",
        ColumnType::Float64 => "0.0",
        ColumnType::Timestamp => "'1970-01-01 00:00:00'",
        ColumnType::Bytes => "X''",
    }
}

/// Returns the type name used to convert copied values during a table
/// rebuild, `None` when the value is copied as is.
#[must_use]
pub fn cast_target(data_type: ColumnType) -> Option<&'static str> {
    match data_type {
        ColumnType::String => Some("TEXT"),
        ColumnType::Int64 => Some("INTEGER"),
        ColumnType::Float64 => Some("REAL"),
        ColumnType::Bool | ColumnType::Timestamp | ColumnType::Bytes => None,
    }
}

fn declared_type_regex() -> &'static Regex {
    static DECLARED: OnceLock<Regex> = OnceLock::new();
    DECLARED.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_ ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*\d+\s*)?\))?\s*$")
            .expect("Invalid declared type regex")
    })
}

/// Parses a declared type into a logical type and maximum size.
pub fn parse_declared_type(declared: &str) -> Result<(ColumnType, usize)> {
    if declared.trim().is_empty() {
        return Ok((ColumnType::Bytes, 0));
    }
    let captures = declared_type_regex()
        .captures(declared)
        .ok_or_else(|| Error::UnsupportedType(declared.to_string()))?;
    let name = captures[1].to_ascii_uppercase();
    let size = captures
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);

    let data_type = match name.as_str() {
        "VARCHAR" | "CHAR" | "NVARCHAR" | "NCHAR" | "CHARACTER" | "VARYING CHARACTER"
        | "TEXT" | "CLOB" | "STRING" => ColumnType::String,
        "BIGINT" | "INT" | "INTEGER" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "INT8" => {
            ColumnType::Int64
        }
        "DOUBLE" | "DOUBLE PRECISION" | "REAL" | "FLOAT" | "NUMERIC" | "DECIMAL" => {
            ColumnType::Float64
        }
        "BOOLEAN" | "BOOL" => ColumnType::Bool,
        "TIMESTAMP" | "DATETIME" | "DATE" => ColumnType::Timestamp,
        "BLOB" | "BINARY" | "VARBINARY" => ColumnType::Bytes,
        other => affinity(other),
    };
    let size = match data_type {
        ColumnType::String | ColumnType::Bytes => size,
        _ => 0,
    };
    Ok((data_type, size))
}

/// SQLite's column affinity rules, in their documented precedence.
fn affinity(name: &str) -> ColumnType {
    if name.contains("INT") {
        ColumnType::Int64
    } else if name.contains("CHAR") || name.contains("CLOB") || name.contains("TEXT") {
        ColumnType::String
    } else if name.contains("BLOB") {
        ColumnType::Bytes
    } else {
        ColumnType::Float64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_types_parse_back() {
        let columns = [
            Column::new("a", ColumnType::String),
            Column::new("b", ColumnType::String).max_size(20),
            Column::new("c", ColumnType::Int64),
            Column::new("d", ColumnType::Float64),
            Column::new("e", ColumnType::Bool),
            Column::new("f", ColumnType::Timestamp),
            Column::new("g", ColumnType::Bytes),
            Column::new("h", ColumnType::Bytes).max_size(16),
        ];
        for column in &columns {
            let parsed = parse_declared_type(&declared_type(column)).unwrap();
            assert_eq!(
                parsed,
                (column.data_type, column.max_size),
                "{}",
                column.name
            );
        }
    }

    #[test]
    fn test_foreign_declarations_use_affinity() {
        assert_eq!(
            parse_declared_type("unsigned big int").unwrap(),
            (ColumnType::Int64, 0)
        );
        assert_eq!(
            parse_declared_type("nvarchar(100)").unwrap(),
            (ColumnType::String, 100)
        );
        assert_eq!(
            parse_declared_type("DECIMAL(10, 5)").unwrap(),
            (ColumnType::Float64, 0)
        );
        assert_eq!(parse_declared_type("").unwrap(), (ColumnType::Bytes, 0));
        assert!(matches!(parse_declared_type("int["), Err(Error::UnsupportedType(_))));
    }
}
