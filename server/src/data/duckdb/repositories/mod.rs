//! DuckDB repositories
//!
//! Synchronous functions over a borrowed `Connection`. Callers run them on
//! the blocking pool through `DuckdbService::with_conn`.

pub mod calls;
pub mod feedback;
pub mod files;
pub mod objects;
pub mod stats;
pub mod tables;

use duckdb::Connection;

use super::filters::SqlParams;
use crate::data::error::DataError;
use crate::utils::sql::placeholders;

/// Run a `SELECT COUNT(*)`-shaped query
pub(crate) fn execute_count(
    conn: &Connection,
    sql: &str,
    params: &SqlParams,
) -> Result<u64, DataError> {
    let mut stmt = conn.prepare(sql)?;
    let count: i64 = stmt.query_row(params.as_sql_refs().as_slice(), |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// `col IN (?, ...)`, or `FALSE` for an empty list
pub(crate) fn in_condition(col: &str, values: &[String], params: &mut SqlParams) -> String {
    if values.is_empty() {
        return "FALSE".to_string();
    }
    for v in values {
        params.push(v.clone());
    }
    format!("{} IN ({})", col, placeholders(values.len()))
}

/// ` LIMIT n OFFSET m`, omitting absent parts
pub(crate) fn limit_offset(limit: Option<u64>, offset: Option<u64>) -> String {
    let mut sql = String::new();
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = offset.filter(|o| *o > 0) {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    sql
}
