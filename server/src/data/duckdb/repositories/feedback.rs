//! Feedback rows attached to refs

use duckdb::{Connection, Row};

use super::{in_condition, limit_offset};
use crate::core::constants::DUCKDB_IN_BATCH_SIZE;
use crate::data::duckdb::filters::{
    FeedbackFieldResolver, SqlParams, compile_predicate, compile_sort,
};
use crate::data::duckdb::sql_types::{SqlJson, SqlTimestamp};
use crate::data::error::DataError;
use crate::data::types::{FeedbackSchema, Query, SortBy};
use crate::utils::json::parse_json_dump;
use crate::utils::time::micros_to_datetime;

const FEEDBACK_SELECT: &str = "f.id, f.project_id, f.weave_ref, f.feedback_type, f.payload_dump, \
     f.creator, f.wb_user_id, EPOCH_US(f.created_at), f.runnable_ref, f.call_ref, f.trigger_ref";

fn row_to_feedback(row: &Row) -> Result<FeedbackSchema, duckdb::Error> {
    let payload: Option<String> = row.get(4)?;
    Ok(FeedbackSchema {
        id: row.get(0)?,
        project_id: row.get(1)?,
        weave_ref: row.get(2)?,
        feedback_type: row.get(3)?,
        payload: parse_json_dump(payload.as_deref()),
        creator: row.get(5)?,
        wb_user_id: row.get(6)?,
        created_at: micros_to_datetime(row.get(7)?),
        runnable_ref: row.get(8)?,
        call_ref: row.get(9)?,
        trigger_ref: row.get(10)?,
    })
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: &SqlParams,
) -> Result<Vec<FeedbackSchema>, DataError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params.as_sql_refs().as_slice(), row_to_feedback)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn insert_feedback(conn: &Connection, feedback: &FeedbackSchema) -> Result<(), DataError> {
    conn.execute(
        "INSERT INTO feedback (id, project_id, weave_ref, feedback_type, payload_dump, creator, \
         wb_user_id, runnable_ref, call_ref, trigger_ref, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        duckdb::params![
            feedback.id,
            feedback.project_id,
            feedback.weave_ref,
            feedback.feedback_type,
            SqlJson(&feedback.payload),
            feedback.creator,
            feedback.wb_user_id,
            feedback.runnable_ref,
            feedback.call_ref,
            feedback.trigger_ref,
            SqlTimestamp(feedback.created_at),
        ],
    )?;
    tracing::trace!(
        project_id = %feedback.project_id,
        feedback_id = %feedback.id,
        feedback_type = %feedback.feedback_type,
        "Inserted feedback"
    );
    Ok(())
}

/// Overwrite an existing row in place, keeping `id` and `project_id`
///
/// Returns the number of rows updated (0 when the id is unknown).
pub fn replace_feedback(conn: &Connection, feedback: &FeedbackSchema) -> Result<u64, DataError> {
    let updated = conn.execute(
        "UPDATE feedback SET weave_ref = ?, feedback_type = ?, payload_dump = ?, creator = ?, \
         wb_user_id = ?, runnable_ref = ?, call_ref = ?, trigger_ref = ?, created_at = ? \
         WHERE project_id = ? AND id = ?",
        duckdb::params![
            feedback.weave_ref,
            feedback.feedback_type,
            SqlJson(&feedback.payload),
            feedback.creator,
            feedback.wb_user_id,
            feedback.runnable_ref,
            feedback.call_ref,
            feedback.trigger_ref,
            SqlTimestamp(feedback.created_at),
            feedback.project_id,
            feedback.id,
        ],
    )?;
    Ok(updated as u64)
}

/// Query feedback rows with an optional expression, sort and paging
///
/// Rows come back ordered by the requested sort, then `created_at`, then `id`.
pub fn query_feedback(
    conn: &Connection,
    project_id: &str,
    query: Option<&Query>,
    sort_by: Option<&[SortBy]>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<Vec<FeedbackSchema>, DataError> {
    let resolver = FeedbackFieldResolver::new("f");
    let mut params = SqlParams::default();
    params.push(project_id);

    let mut sql = format!(
        "SELECT {} FROM feedback f WHERE f.project_id = ?",
        FEEDBACK_SELECT
    );
    if let Some(query) = query {
        let predicate = compile_predicate(&query.expr, &resolver, &mut params)?;
        sql.push_str(&format!(" AND ({})", predicate));
    }

    sql.push_str(" ORDER BY ");
    if let Some(sort_by) = sort_by.filter(|s| !s.is_empty()) {
        sql.push_str(&compile_sort(sort_by, &resolver)?);
        sql.push_str(", ");
    }
    sql.push_str("f.created_at ASC, f.id ASC");
    sql.push_str(&limit_offset(limit, offset));

    collect(conn, &sql, &params)
}

/// Feedback attached to any of `weave_refs`, newest first
pub fn feedback_for_refs(
    conn: &Connection,
    project_id: &str,
    weave_refs: &[String],
) -> Result<Vec<FeedbackSchema>, DataError> {
    let mut out = Vec::new();
    for chunk in weave_refs.chunks(DUCKDB_IN_BATCH_SIZE) {
        let mut params = SqlParams::default();
        params.push(project_id);
        let condition = in_condition("f.weave_ref", chunk, &mut params);
        let sql = format!(
            "SELECT {} FROM feedback f WHERE f.project_id = ? AND {} \
             ORDER BY f.created_at DESC, f.id DESC",
            FEEDBACK_SELECT, condition
        );
        out.extend(collect(conn, &sql, &params)?);
    }
    Ok(out)
}

/// Hard-delete by id, returning the number of rows removed
pub fn delete_feedback(
    conn: &Connection,
    project_id: &str,
    ids: &[String],
) -> Result<u64, DataError> {
    let mut deleted = 0u64;
    for chunk in ids.chunks(DUCKDB_IN_BATCH_SIZE) {
        let mut params = SqlParams::default();
        params.push(project_id);
        let condition = in_condition("id", chunk, &mut params);
        let sql = format!("DELETE FROM feedback WHERE project_id = ? AND {}", condition);
        deleted += conn.execute(&sql, params.as_sql_refs().as_slice())? as u64;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::duckdb::migrations::run_migrations;
    use crate::data::types::Expr;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn feedback(
        id: &str,
        weave_ref: &str,
        feedback_type: &str,
        payload: serde_json::Value,
    ) -> FeedbackSchema {
        FeedbackSchema {
            id: id.to_string(),
            project_id: "e/p".to_string(),
            weave_ref: weave_ref.to_string(),
            feedback_type: feedback_type.to_string(),
            payload,
            creator: None,
            wb_user_id: Some("u1".to_string()),
            created_at: Utc::now(),
            runnable_ref: None,
            call_ref: None,
            trigger_ref: None,
        }
    }

    #[test]
    fn test_insert_and_query_by_payload() {
        let conn = test_conn();
        let mut first = feedback(
            "f1",
            "weave:///e/p/call/c1",
            "wandb.note.1",
            json!({"note": "hi"}),
        );
        first.created_at = Utc::now() - Duration::seconds(10);
        insert_feedback(&conn, &first).unwrap();
        insert_feedback(
            &conn,
            &feedback("f2", "weave:///e/p/call/c2", "score", json!({"value": 0.9})),
        )
        .unwrap();

        let all = query_feedback(&conn, "e/p", None, None, None, None).unwrap();
        let ids: Vec<&str> = all.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2"]);
        assert_eq!(all[0].payload, json!({"note": "hi"}));

        let query = Query::new(Expr::gt(Expr::field("payload.value"), Expr::lit(json!(0.5))));
        let hits = query_feedback(&conn, "e/p", Some(&query), None, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "f2");

        let page = query_feedback(
            &conn,
            "e/p",
            None,
            Some(&[SortBy::desc("created_at")]),
            Some(1),
            None,
        )
        .unwrap();
        assert_eq!(page[0].id, "f2");
    }

    #[test]
    fn test_replace_and_delete() {
        let conn = test_conn();
        let original = feedback("f1", "weave:///e/p/call/c1", "score", json!({"v": 1}));
        insert_feedback(&conn, &original).unwrap();

        let replaced = feedback("f1", "weave:///e/p/call/c1", "score", json!({"v": 2}));
        assert_eq!(replace_feedback(&conn, &replaced).unwrap(), 1);
        let missing = feedback("nope", "weave:///e/p/call/c1", "score", json!({}));
        assert_eq!(replace_feedback(&conn, &missing).unwrap(), 0);

        let rows = feedback_for_refs(&conn, "e/p", &["weave:///e/p/call/c1".to_string()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, json!({"v": 2}));

        assert_eq!(delete_feedback(&conn, "e/p", &["f1".into(), "f9".into()]).unwrap(), 1);
        assert!(
            feedback_for_refs(&conn, "e/p", &["weave:///e/p/call/c1".to_string()])
                .unwrap()
                .is_empty()
        );
    }
}
