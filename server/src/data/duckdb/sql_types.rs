//! SQL type wrappers for DuckDB
//!
//! Shared type wrappers for converting Rust types to DuckDB-compatible SQL values.

use chrono::{DateTime, Utc};
use duckdb::ToSql;
use duckdb::types::{ToSqlOutput, Value, ValueRef};
use serde_json::Value as JsonValue;

use crate::utils::json::json_to_opt_string;
use crate::utils::time::to_sql_timestamp;

/// Wrapper for DateTime<Utc> to implement ToSql for DuckDB TIMESTAMP
pub struct SqlTimestamp(pub DateTime<Utc>);

impl ToSql for SqlTimestamp {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Text(to_sql_timestamp(&self.0))))
    }
}

/// JSON value stored as text in a `*_dump` VARCHAR column
///
/// `Null` is stored as SQL NULL, never as the text `null`.
pub struct SqlJson<'a>(pub &'a JsonValue);

impl ToSql for SqlJson<'_> {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        match json_to_opt_string(self.0) {
            Some(text) => Ok(ToSqlOutput::Owned(Value::Text(text))),
            None => Ok(ToSqlOutput::Borrowed(ValueRef::Null)),
        }
    }
}

/// Optional JSON value; `None` and `Some(Null)` both store SQL NULL
pub struct SqlOptJson<'a>(pub Option<&'a JsonValue>);

impl ToSql for SqlOptJson<'_> {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        match self.0.and_then(json_to_opt_string) {
            Some(text) => Ok(ToSqlOutput::Owned(Value::Text(text))),
            None => Ok(ToSqlOutput::Borrowed(ValueRef::Null)),
        }
    }
}
