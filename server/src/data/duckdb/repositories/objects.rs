//! Object version storage
//!
//! `version_index` is the number of versions (deleted included) that existed
//! for the object when a digest was first stored. `is_latest` is computed at
//! read time as the highest surviving index.

use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt, Row};

use super::{execute_count, in_condition, limit_offset};
use crate::data::duckdb::filters::SqlParams;
use crate::data::duckdb::in_transaction;
use crate::data::duckdb::sql_types::{SqlJson, SqlTimestamp};
use crate::data::error::DataError;
use crate::data::types::{ObjQueryReq, ObjSchema, ObjectKind, SortBy};
use crate::utils::json::parse_json_dump;
use crate::utils::time::{micros_to_datetime, to_sql_timestamp};

/// Which version of an object to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Digest(String),
    Latest,
    Index(u64),
}

/// A version about to be stored
#[derive(Debug, Clone)]
pub struct NewObjectVersion<'a> {
    pub project_id: &'a str,
    pub object_id: &'a str,
    pub digest: &'a str,
    pub kind: ObjectKind,
    pub base_object_class: Option<&'a str>,
    pub val: &'a serde_json::Value,
    pub wb_user_id: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

/// What `create_version` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Digest already live under this object
    Existing,
    /// Digest was deleted and has been restored at its original index
    Restored,
    Inserted { version_index: u64 },
}

/// Relation of all versions with `is_latest`, aliased `v`; binds `project_id`
const VERSIONS_SOURCE: &str = "(
    SELECT *,
           deleted_at IS NULL AND version_index = max(CASE WHEN deleted_at IS NULL THEN version_index END)
               OVER (PARTITION BY object_id) AS is_latest
    FROM object_versions WHERE project_id = ?
) v";

/// Sortable fields and their columns
const SORTABLE: &[(&str, &str)] = &[
    ("created_at", "v.created_at"),
    ("object_id", "v.object_id"),
    ("version_index", "v.version_index"),
    ("digest", "v.digest"),
];

fn select_columns(metadata_only: bool) -> String {
    format!(
        "v.project_id, v.object_id, v.digest, v.version_index, v.is_latest, v.kind, \
         v.base_object_class, EPOCH_US(v.created_at), EPOCH_US(v.deleted_at), {}, v.wb_user_id",
        if metadata_only { "NULL" } else { "v.val_dump" }
    )
}

fn row_to_object(row: &Row) -> Result<ObjSchema, duckdb::Error> {
    let kind: String = row.get(5)?;
    let val_dump: Option<String> = row.get(9)?;
    Ok(ObjSchema {
        project_id: row.get(0)?,
        object_id: row.get(1)?,
        digest: row.get(2)?,
        version_index: row.get::<_, i64>(3)?.max(0) as u64,
        is_latest: row.get(4)?,
        kind: ObjectKind::parse(&kind),
        base_object_class: row.get(6)?,
        created_at: micros_to_datetime(row.get(7)?),
        deleted_at: row.get::<_, Option<i64>>(8)?.map(micros_to_datetime),
        val: parse_json_dump(val_dump.as_deref()),
        wb_user_id: row.get(10)?,
    })
}

/// Store a version unless its digest already exists under the object
pub fn create_version(
    conn: &Connection,
    version: &NewObjectVersion<'_>,
) -> Result<CreateOutcome, DataError> {
    in_transaction(conn, |conn| -> Result<CreateOutcome, DataError> {
        let existing: Option<Option<i64>> = conn
            .query_row(
                "SELECT EPOCH_US(deleted_at) FROM object_versions \
                 WHERE project_id = ? AND object_id = ? AND digest = ? LIMIT 1",
                duckdb::params![version.project_id, version.object_id, version.digest],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(None) => Ok(CreateOutcome::Existing),
            Some(Some(_)) => {
                conn.execute(
                    "UPDATE object_versions SET deleted_at = NULL \
                     WHERE project_id = ? AND object_id = ? AND digest = ?",
                    duckdb::params![version.project_id, version.object_id, version.digest],
                )?;
                Ok(CreateOutcome::Restored)
            }
            None => {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM object_versions WHERE project_id = ? AND object_id = ?",
                    duckdb::params![version.project_id, version.object_id],
                    |row| row.get(0),
                )?;
                conn.execute(
                    "INSERT INTO object_versions (project_id, object_id, digest, version_index, \
                     kind, base_object_class, val_dump, wb_user_id, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    duckdb::params![
                        version.project_id,
                        version.object_id,
                        version.digest,
                        count,
                        version.kind.as_str(),
                        version.base_object_class,
                        SqlJson(version.val),
                        version.wb_user_id,
                        SqlTimestamp(version.created_at),
                    ],
                )?;
                Ok(CreateOutcome::Inserted {
                    version_index: count.max(0) as u64,
                })
            }
        }
    })
}

/// Read one live version
pub fn read_version(
    conn: &Connection,
    project_id: &str,
    object_id: &str,
    selector: &VersionSelector,
    metadata_only: bool,
) -> Result<Option<ObjSchema>, DataError> {
    let mut params = SqlParams::default();
    params.push(project_id);
    params.push(object_id);

    let condition = match selector {
        VersionSelector::Digest(digest) => {
            params.push(digest.clone());
            "v.digest = ?"
        }
        VersionSelector::Latest => "v.is_latest",
        VersionSelector::Index(index) => {
            params.push(index.to_string());
            "v.version_index = CAST(? AS BIGINT)"
        }
    };

    let sql = format!(
        "SELECT {} FROM {} WHERE v.object_id = ? AND v.deleted_at IS NULL AND {} LIMIT 1",
        select_columns(metadata_only),
        VERSIONS_SOURCE,
        condition
    );
    let mut stmt = conn.prepare(&sql)?;
    let obj = stmt
        .query_row(params.as_sql_refs().as_slice(), row_to_object)
        .optional()?;
    Ok(obj)
}

/// Query live versions
pub fn query_versions(conn: &Connection, req: &ObjQueryReq) -> Result<Vec<ObjSchema>, DataError> {
    let mut params = SqlParams::default();
    params.push(req.project_id.clone());
    let mut conditions = vec!["v.deleted_at IS NULL".to_string()];

    if let Some(filter) = &req.filter {
        if let Some(ids) = &filter.object_ids {
            conditions.push(in_condition("v.object_id", ids, &mut params));
        }
        if let Some(classes) = &filter.base_object_classes {
            conditions.push(in_condition("v.base_object_class", classes, &mut params));
        }
        match filter.is_op {
            Some(true) => conditions.push("v.kind = 'op'".to_string()),
            Some(false) => conditions.push("v.kind <> 'op'".to_string()),
            None => {}
        }
        if filter.latest_only == Some(true) {
            conditions.push("v.is_latest".to_string());
        }
    }

    let order = match req.sort_by.as_deref() {
        Some(keys) if !keys.is_empty() => order_clause(keys)?,
        _ => "v.object_id ASC, v.version_index ASC".to_string(),
    };

    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}{}",
        select_columns(req.metadata_only),
        VERSIONS_SOURCE,
        conditions.join(" AND "),
        order,
        limit_offset(req.limit, req.offset)
    );
    let mut stmt = conn.prepare(&sql)?;
    let objs = stmt
        .query_map(params.as_sql_refs().as_slice(), row_to_object)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(objs)
}

fn order_clause(keys: &[SortBy]) -> Result<String, DataError> {
    let mut parts = Vec::with_capacity(keys.len() + 1);
    for key in keys {
        let column = SORTABLE
            .iter()
            .find(|(name, _)| *name == key.field)
            .map(|(_, col)| *col)
            .ok_or_else(|| {
                DataError::validation(format!("cannot sort objects by '{}'", key.field))
            })?;
        parts.push(format!("{} {}", column, key.direction.as_sql()));
    }
    parts.push("v.object_id ASC, v.version_index ASC".to_string());
    Ok(parts.join(", "))
}

/// Soft-delete live versions; returns the number of versions deleted
pub fn delete_versions(
    conn: &Connection,
    project_id: &str,
    object_id: &str,
    digests: Option<&[String]>,
    deleted_at: DateTime<Utc>,
) -> Result<u64, DataError> {
    let mut params = SqlParams::default();
    params.push(to_sql_timestamp(&deleted_at));
    params.push(project_id);
    params.push(object_id);

    let mut sql = "UPDATE object_versions SET deleted_at = CAST(? AS TIMESTAMP) \
                   WHERE project_id = ? AND object_id = ? AND deleted_at IS NULL"
        .to_string();
    if let Some(digests) = digests {
        sql.push_str(" AND ");
        sql.push_str(&in_condition("digest", digests, &mut params));
    }

    let deleted = conn.execute(&sql, params.as_sql_refs().as_slice())?;
    Ok(deleted as u64)
}

/// Number of objects with at least one live version
pub fn count_objects(conn: &Connection, project_id: &str) -> Result<u64, DataError> {
    let mut params = SqlParams::default();
    params.push(project_id);
    execute_count(
        conn,
        "SELECT COUNT(DISTINCT object_id) FROM object_versions \
         WHERE project_id = ? AND deleted_at IS NULL",
        &params,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::duckdb::migrations::run_migrations;
    use crate::data::types::ObjectVersionFilter;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn create(conn: &Connection, object_id: &str, digest: &str) -> CreateOutcome {
        let val = json!({"d": digest});
        create_version(
            conn,
            &NewObjectVersion {
                project_id: "e/p",
                object_id,
                digest,
                kind: ObjectKind::Object,
                base_object_class: None,
                val: &val,
                wb_user_id: None,
                created_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_is_idempotent_per_digest() {
        let conn = test_conn();
        assert_eq!(
            create(&conn, "obj", "d0"),
            CreateOutcome::Inserted { version_index: 0 }
        );
        assert_eq!(create(&conn, "obj", "d0"), CreateOutcome::Existing);
        assert_eq!(
            create(&conn, "obj", "d1"),
            CreateOutcome::Inserted { version_index: 1 }
        );
    }

    #[test]
    fn test_latest_and_index_selectors() {
        let conn = test_conn();
        create(&conn, "obj", "d0");
        create(&conn, "obj", "d1");

        let latest = read_version(&conn, "e/p", "obj", &VersionSelector::Latest, false)
            .unwrap()
            .unwrap();
        assert_eq!(latest.digest, "d1");
        assert!(latest.is_latest);

        let first = read_version(&conn, "e/p", "obj", &VersionSelector::Index(0), true)
            .unwrap()
            .unwrap();
        assert_eq!(first.digest, "d0");
        assert!(!first.is_latest);
        assert!(first.val.is_null());
    }

    #[test]
    fn test_delete_recomputes_latest_without_renumbering() {
        let conn = test_conn();
        create(&conn, "obj", "d0");
        create(&conn, "obj", "d1");
        create(&conn, "obj", "d2");

        let deleted =
            delete_versions(&conn, "e/p", "obj", Some(&["d2".to_string()]), Utc::now()).unwrap();
        assert_eq!(deleted, 1);

        let latest = read_version(&conn, "e/p", "obj", &VersionSelector::Latest, true)
            .unwrap()
            .unwrap();
        assert_eq!(latest.digest, "d1");
        assert_eq!(latest.version_index, 1);

        assert_eq!(
            create(&conn, "obj", "d3"),
            CreateOutcome::Inserted { version_index: 3 }
        );
        assert_eq!(create(&conn, "obj", "d2"), CreateOutcome::Restored);
    }

    #[test]
    fn test_query_filters_and_sort() {
        let conn = test_conn();
        create(&conn, "b", "b0");
        create(&conn, "a", "a0");
        create(&conn, "a", "a1");

        let mut req = ObjQueryReq::new("e/p");
        req.filter = Some(ObjectVersionFilter {
            latest_only: Some(true),
            ..Default::default()
        });
        req.sort_by = Some(vec![SortBy::desc("object_id")]);
        let objs = query_versions(&conn, &req).unwrap();
        let digests: Vec<_> = objs.iter().map(|o| o.digest.as_str()).collect();
        assert_eq!(digests, vec!["b0", "a1"]);

        req.sort_by = Some(vec![SortBy::asc("val")]);
        assert!(query_versions(&conn, &req).is_err());
        assert_eq!(count_objects(&conn, "e/p").unwrap(), 2);
    }
}
