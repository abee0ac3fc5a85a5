//! Content-addressed table storage
//!
//! Rows are stored once per project under their digest; a table is the
//! ordered list of its row digests.

use std::collections::HashMap;

use duckdb::{Connection, OptionalExt};
use serde_json::Value as JsonValue;

use super::{execute_count, in_condition};
use crate::core::constants::DUCKDB_IN_BATCH_SIZE;
use crate::data::duckdb::filters::SqlParams;
use crate::data::duckdb::in_transaction;
use crate::data::duckdb::sql_types::SqlJson;
use crate::data::error::DataError;
use crate::utils::json::parse_json_dump;

/// Store rows (digest, value); rows already present are left untouched
pub fn insert_rows(
    conn: &Connection,
    project_id: &str,
    rows: &[(String, JsonValue)],
) -> Result<(), DataError> {
    if rows.is_empty() {
        return Ok(());
    }
    in_transaction(conn, |conn| -> Result<(), DataError> {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO table_rows (project_id, digest, val_dump) VALUES (?, ?, ?)",
        )?;
        for (digest, val) in rows {
            stmt.execute(duckdb::params![project_id, digest, SqlJson(val)])?;
        }
        Ok(())
    })?;
    tracing::trace!(project_id, rows = rows.len(), "Stored table rows");
    Ok(())
}

/// Store a table definition; an identical digest is a no-op
pub fn insert_table(
    conn: &Connection,
    project_id: &str,
    digest: &str,
    row_digests: &[String],
) -> Result<(), DataError> {
    let dump = serde_json::to_string(row_digests)?;
    conn.execute(
        "INSERT OR IGNORE INTO tables (project_id, digest, row_digests_dump, row_count) \
         VALUES (?, ?, ?, ?)",
        duckdb::params![project_id, digest, dump, row_digests.len() as i64],
    )?;
    Ok(())
}

/// Ordered row digests of a table, `None` when the table does not exist
pub fn table_row_digests(
    conn: &Connection,
    project_id: &str,
    digest: &str,
) -> Result<Option<Vec<String>>, DataError> {
    let dump: Option<String> = conn
        .query_row(
            "SELECT row_digests_dump FROM tables WHERE project_id = ? AND digest = ?",
            duckdb::params![project_id, digest],
            |row| row.get(0),
        )
        .optional()?;
    match dump {
        Some(dump) => Ok(Some(serde_json::from_str(&dump)?)),
        None => Ok(None),
    }
}

/// Row count of a table, `None` when the table does not exist
pub fn table_row_count(
    conn: &Connection,
    project_id: &str,
    digest: &str,
) -> Result<Option<u64>, DataError> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT row_count FROM tables WHERE project_id = ? AND digest = ?",
            duckdb::params![project_id, digest],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.map(|c| c.max(0) as u64))
}

/// Load row values by digest; digests that are not stored are absent from the map
pub fn load_rows(
    conn: &Connection,
    project_id: &str,
    digests: &[String],
) -> Result<HashMap<String, JsonValue>, DataError> {
    let mut unique: Vec<String> = digests.to_vec();
    unique.sort();
    unique.dedup();

    let mut rows = HashMap::with_capacity(unique.len());
    for chunk in unique.chunks(DUCKDB_IN_BATCH_SIZE) {
        let mut params = SqlParams::default();
        params.push(project_id);
        let condition = in_condition("digest", chunk, &mut params);
        let sql = format!(
            "SELECT digest, val_dump FROM table_rows WHERE project_id = ? AND {}",
            condition
        );
        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map(params.as_sql_refs().as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        for entry in mapped {
            let (digest, dump) = entry?;
            rows.insert(digest, parse_json_dump(dump.as_deref()));
        }
    }
    Ok(rows)
}

/// Number of stored tables in a project
pub fn count_tables(conn: &Connection, project_id: &str) -> Result<u64, DataError> {
    let mut params = SqlParams::default();
    params.push(project_id);
    execute_count(
        conn,
        "SELECT COUNT(*) FROM tables WHERE project_id = ?",
        &params,
    )
}
