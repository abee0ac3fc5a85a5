//! Call fragment storage and reconciled call reads
//!
//! Every event lands in `call_parts`. The merged read picks, per call id,
//! the first start, the last end, the last non-null rename and any delete.
//! A call without a start is invisible; a call with any delete is a
//! tombstone. `calls_complete` is kept in sync for every project by
//! re-materializing the touched ids after each write.

use chrono::{DateTime, Utc};
use duckdb::{Connection, Row};

use super::{execute_count, in_condition, limit_offset};
use crate::data::duckdb::filters::{
    CallsFieldResolver, CallsLayout, SqlParams, compile_predicate, compile_sort,
};
use crate::data::duckdb::sql_types::{SqlJson, SqlOptJson, SqlTimestamp};
use crate::data::error::DataError;
use crate::data::types::{
    CallSchema, CallsFilter, EndedCall, Query, SortBy, StartedCall, ThreadSchema,
    ThreadsQueryFilter,
};
use crate::utils::json::parse_json_dump;
use crate::utils::sql::placeholders;
use crate::utils::time::{micros_to_datetime, to_sql_timestamp};

/// Reconciled columns in `calls_complete` order
const CALL_COLUMNS: &str = "project_id, id, trace_id, parent_id, thread_id, turn_id, op_name, \
     display_name, started_at, ended_at, attributes_dump, inputs_dump, output_dump, exception, \
     summary_dump, wb_user_id, wb_run_id, deleted_at";

/// Columns selected for `row_to_call`, relative to alias `c`
const CALL_SELECT: &str = "c.project_id, c.id, c.trace_id, c.parent_id, c.thread_id, c.turn_id, \
     c.op_name, c.display_name, EPOCH_US(c.started_at), EPOCH_US(c.ended_at), c.attributes_dump, \
     c.inputs_dump, c.output_dump, c.exception, c.summary_dump, c.wb_user_id, c.wb_run_id, \
     EPOCH_US(c.deleted_at)";

/// Read-time reconciliation over `call_parts`
///
/// Binds `project_id` first, then whatever `scope` binds.
fn merged_calls_sql(scope: &str, include_deleted: bool) -> String {
    let visibility = if include_deleted {
        ""
    } else {
        "WHERE d.id IS NULL"
    };
    format!(
        "WITH parts AS (
            SELECT * FROM call_parts WHERE project_id = ? {scope}
        ),
        starts AS (
            SELECT * FROM parts WHERE part_kind = 'start'
            QUALIFY row_number() OVER (PARTITION BY id ORDER BY seq) = 1
        ),
        ends AS (
            SELECT * FROM parts WHERE part_kind = 'end'
            QUALIFY row_number() OVER (PARTITION BY id ORDER BY seq DESC) = 1
        ),
        renames AS (
            SELECT id, display_name FROM parts
            WHERE part_kind = 'update' AND display_name IS NOT NULL
            QUALIFY row_number() OVER (PARTITION BY id ORDER BY seq DESC) = 1
        ),
        deletes AS (
            SELECT id, max(deleted_at) AS deleted_at FROM parts
            WHERE part_kind = 'delete' GROUP BY id
        )
        SELECT s.project_id, s.id, s.trace_id, s.parent_id, s.thread_id, s.turn_id, s.op_name,
               coalesce(r.display_name, s.display_name) AS display_name,
               s.started_at, e.ended_at, s.attributes_dump, s.inputs_dump,
               e.output_dump, e.exception, e.summary_dump,
               s.wb_user_id, s.wb_run_id, d.deleted_at
        FROM starts s
        LEFT JOIN ends e ON e.id = s.id
        LEFT JOIN renames r ON r.id = s.id
        LEFT JOIN deletes d ON d.id = s.id
        {visibility}"
    )
}

/// Visible calls of one project as a relation aliased `c`; binds `project_id`
fn calls_source(layout: CallsLayout) -> String {
    match layout {
        CallsLayout::Merged => format!("({}) c", merged_calls_sql("", false)),
        CallsLayout::Complete => {
            "(SELECT * FROM calls_complete WHERE project_id = ? AND deleted_at IS NULL) c"
                .to_string()
        }
    }
}

fn row_to_call(row: &Row) -> Result<CallSchema, duckdb::Error> {
    let json_or_empty = |dump: Option<String>| match parse_json_dump(dump.as_deref()) {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        v => v,
    };
    let output_dump: Option<String> = row.get(12)?;

    Ok(CallSchema {
        project_id: row.get(0)?,
        id: row.get(1)?,
        trace_id: row.get(2)?,
        parent_id: row.get(3)?,
        thread_id: row.get(4)?,
        turn_id: row.get(5)?,
        op_name: row.get(6)?,
        display_name: row.get(7)?,
        started_at: micros_to_datetime(row.get(8)?),
        ended_at: row.get::<_, Option<i64>>(9)?.map(micros_to_datetime),
        attributes: json_or_empty(row.get(10)?),
        inputs: json_or_empty(row.get(11)?),
        output: output_dump.map(|d| parse_json_dump(Some(&d))),
        exception: row.get(13)?,
        summary: json_or_empty(row.get(14)?),
        wb_user_id: row.get(15)?,
        wb_run_id: row.get(16)?,
        deleted_at: row.get::<_, Option<i64>>(17)?.map(micros_to_datetime),
    })
}

// ============================================================================
// Writes
// ============================================================================

/// Append a start fragment; `id` and `trace_id` are already resolved
pub fn insert_start(
    conn: &Connection,
    start: &StartedCall,
    id: &str,
    trace_id: &str,
) -> Result<(), DataError> {
    conn.execute(
        "INSERT INTO call_parts (part_kind, project_id, id, trace_id, parent_id, thread_id, \
         turn_id, op_name, display_name, started_at, attributes_dump, inputs_dump, wb_user_id, \
         wb_run_id) VALUES ('start', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        duckdb::params![
            start.project_id,
            id,
            trace_id,
            start.parent_id,
            start.thread_id,
            start.turn_id,
            start.op_name,
            start.display_name,
            SqlTimestamp(start.started_at),
            SqlJson(&start.attributes),
            SqlJson(&start.inputs),
            start.wb_user_id,
            start.wb_run_id,
        ],
    )?;
    tracing::trace!(project_id = %start.project_id, call_id = %id, "Stored call start");
    Ok(())
}

pub fn insert_end(conn: &Connection, end: &EndedCall) -> Result<(), DataError> {
    conn.execute(
        "INSERT INTO call_parts (part_kind, project_id, id, ended_at, output_dump, exception, \
         summary_dump) VALUES ('end', ?, ?, ?, ?, ?, ?)",
        duckdb::params![
            end.project_id,
            end.id,
            SqlTimestamp(end.ended_at),
            SqlOptJson(end.output.as_ref()),
            end.exception,
            SqlJson(&end.summary),
        ],
    )?;
    tracing::trace!(project_id = %end.project_id, call_id = %end.id, "Stored call end");
    Ok(())
}

pub fn insert_update(
    conn: &Connection,
    project_id: &str,
    id: &str,
    display_name: Option<&str>,
    wb_user_id: Option<&str>,
) -> Result<(), DataError> {
    conn.execute(
        "INSERT INTO call_parts (part_kind, project_id, id, display_name, wb_user_id) \
         VALUES ('update', ?, ?, ?, ?)",
        duckdb::params![project_id, id, display_name, wb_user_id],
    )?;
    Ok(())
}

/// Tombstone `ids`; returns how many of them were visible beforehand
///
/// Tombstones are stored for unstarted ids too, so a late start stays hidden.
pub fn insert_deletes(
    conn: &Connection,
    project_id: &str,
    ids: &[String],
    wb_user_id: Option<&str>,
    deleted_at: DateTime<Utc>,
) -> Result<u64, DataError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let mut params = SqlParams::default();
    params.push(project_id);
    let condition = in_condition("c.id", ids, &mut params);
    let visible = execute_count(
        conn,
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            calls_source(CallsLayout::Merged),
            condition
        ),
        &params,
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO call_parts (part_kind, project_id, id, wb_user_id, deleted_at) \
         VALUES ('delete', ?, ?, ?, ?)",
    )?;
    for id in ids {
        stmt.execute(duckdb::params![
            project_id,
            id,
            wb_user_id,
            SqlTimestamp(deleted_at)
        ])?;
    }
    Ok(visible)
}

/// Rebuild the `calls_complete` rows of `ids` from their fragments
pub fn materialize(conn: &Connection, project_id: &str, ids: &[String]) -> Result<(), DataError> {
    if ids.is_empty() {
        return Ok(());
    }
    let id_placeholders = placeholders(ids.len());

    let mut params = SqlParams::default();
    params.push(project_id);
    for id in ids {
        params.push(id.clone());
    }

    conn.execute(
        &format!(
            "DELETE FROM calls_complete WHERE project_id = ? AND id IN ({})",
            id_placeholders
        ),
        params.as_sql_refs().as_slice(),
    )?;

    let scope = format!("AND id IN ({})", id_placeholders);
    let inserted = conn.execute(
        &format!(
            "INSERT INTO calls_complete ({cols}) SELECT {cols} FROM ({merged})",
            cols = CALL_COLUMNS,
            merged = merged_calls_sql(&scope, true)
        ),
        params.as_sql_refs().as_slice(),
    )?;
    tracing::trace!(project_id, ids = ids.len(), inserted, "Materialized complete calls");
    Ok(())
}

// ============================================================================
// Reads
// ============================================================================

/// Filtering shared by calls queries and counts
pub struct CallsSelection<'a> {
    pub project_id: &'a str,
    pub filter: Option<&'a CallsFilter>,
    pub query: Option<&'a Query>,
}

/// Build `FROM ... WHERE ...` for a selection; returns SQL and bind values
fn selection_sql(
    layout: CallsLayout,
    selection: &CallsSelection<'_>,
) -> Result<(String, SqlParams), DataError> {
    let mut params = SqlParams::default();
    params.push(selection.project_id);
    let mut conditions: Vec<String> = Vec::new();

    if let Some(filter) = selection.filter {
        let lists = [
            ("c.op_name", &filter.op_names),
            ("c.id", &filter.call_ids),
            ("c.trace_id", &filter.trace_ids),
            ("c.parent_id", &filter.parent_ids),
            ("c.thread_id", &filter.thread_ids),
            ("c.wb_user_id", &filter.wb_user_ids),
            ("c.wb_run_id", &filter.wb_run_ids),
        ];
        for (col, values) in lists {
            if let Some(values) = values {
                conditions.push(in_condition(col, values, &mut params));
            }
        }
        if filter.trace_roots_only == Some(true) {
            conditions.push("c.parent_id IS NULL".to_string());
        }
    }

    if let Some(query) = selection.query {
        let resolver = CallsFieldResolver::new("c", layout);
        conditions.push(compile_predicate(&query.expr, &resolver, &mut params)?);
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    Ok((format!("FROM {}{}", calls_source(layout), where_clause), params))
}

/// Query reconciled calls
pub fn query_calls(
    conn: &Connection,
    layout: CallsLayout,
    selection: &CallsSelection<'_>,
    sort_by: Option<&[SortBy]>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<Vec<CallSchema>, DataError> {
    let (from_where, params) = selection_sql(layout, selection)?;

    let resolver = CallsFieldResolver::new("c", layout);
    let order = match sort_by {
        Some(keys) if !keys.is_empty() => format!("{}, c.id ASC", compile_sort(keys, &resolver)?),
        _ => "c.started_at ASC, c.id ASC".to_string(),
    };

    let sql = format!(
        "SELECT {} {} ORDER BY {}{}",
        CALL_SELECT,
        from_where,
        order,
        limit_offset(limit, offset)
    );
    let mut stmt = conn.prepare(&sql)?;
    let calls = stmt
        .query_map(params.as_sql_refs().as_slice(), row_to_call)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(calls)
}

/// Count reconciled calls, optionally capped at `limit`
pub fn count_calls(
    conn: &Connection,
    layout: CallsLayout,
    selection: &CallsSelection<'_>,
    limit: Option<u64>,
) -> Result<u64, DataError> {
    let (from_where, params) = selection_sql(layout, selection)?;
    let sql = format!(
        "SELECT COUNT(*) FROM (SELECT 1 {}{})",
        from_where,
        limit_offset(limit, None)
    );
    execute_count(conn, &sql, &params)
}

/// Aggregate root calls by `thread_id` (merged layout only)
pub fn query_threads(
    conn: &Connection,
    project_id: &str,
    filter: Option<&ThreadsQueryFilter>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<Vec<ThreadSchema>, DataError> {
    let mut params = SqlParams::default();
    params.push(project_id);
    let mut conditions = vec![
        "c.thread_id IS NOT NULL".to_string(),
        "c.parent_id IS NULL".to_string(),
    ];
    if let Some(after) = filter.and_then(|f| f.after_date) {
        conditions.push("c.started_at >= CAST(? AS TIMESTAMP)".to_string());
        params.push(to_sql_timestamp(&after));
    }
    if let Some(before) = filter.and_then(|f| f.before_date) {
        conditions.push("c.started_at < CAST(? AS TIMESTAMP)".to_string());
        params.push(to_sql_timestamp(&before));
    }

    let sql = format!(
        "SELECT c.thread_id,
                COUNT(*) AS turn_count,
                EPOCH_US(MIN(c.started_at)) AS start_time,
                EPOCH_US(MAX(COALESCE(c.ended_at, c.started_at))) AS last_updated,
                arg_min(COALESCE(c.turn_id, c.id), c.started_at) AS first_turn_id,
                arg_max(COALESCE(c.turn_id, c.id), c.started_at) AS last_turn_id
         FROM {} WHERE {}
         GROUP BY c.thread_id
         ORDER BY last_updated DESC, c.thread_id ASC{}",
        calls_source(CallsLayout::Merged),
        conditions.join(" AND "),
        limit_offset(limit, offset)
    );

    let mut stmt = conn.prepare(&sql)?;
    let threads = stmt
        .query_map(params.as_sql_refs().as_slice(), |row| {
            Ok(ThreadSchema {
                thread_id: row.get(0)?,
                turn_count: row.get::<_, i64>(1)?.max(0) as u64,
                start_time: micros_to_datetime(row.get(2)?),
                last_updated: micros_to_datetime(row.get(3)?),
                first_turn_id: row.get(4)?,
                last_turn_id: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(threads)
}

/// Count visible calls of a project
pub fn count_project_calls(
    conn: &Connection,
    layout: CallsLayout,
    project_id: &str,
) -> Result<u64, DataError> {
    let mut params = SqlParams::default();
    params.push(project_id);
    execute_count(
        conn,
        &format!("SELECT COUNT(*) FROM {}", calls_source(layout)),
        &params,
    )
}
