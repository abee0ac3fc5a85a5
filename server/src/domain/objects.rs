//! Versioned objects
//!
//! An object version is named by the digest of its canonical value. Storing
//! the same value twice under one `object_id` is a no-op that returns the
//! existing digest; storing a value whose version was deleted restores it at
//! its original `version_index`.

use chrono::Utc;
use serde_json::Value as JsonValue;

use super::digest::value_digest;
use super::service::TraceService;
use crate::data::duckdb::repositories::objects::{
    self as objects_repository, CreateOutcome, NewObjectVersion, VersionSelector,
};
use crate::data::error::DataError;
use crate::data::types::{
    ObjDeleteReq, ObjQueryReq, ObjReadReq, ObjSchema, ObjSchemaForInsert, ObjectKind,
};

/// Longest accepted object id
const MAX_OBJECT_ID_LEN: usize = 128;

/// `latest`, `v<N>`, or a concrete digest
pub fn parse_selector(digest: &str) -> VersionSelector {
    if digest == "latest" {
        return VersionSelector::Latest;
    }
    match digest.strip_prefix('v').map(str::parse::<u64>) {
        Some(Ok(index)) => VersionSelector::Index(index),
        _ => VersionSelector::Digest(digest.to_string()),
    }
}

/// `op` for op definitions, including custom types that wrap an op
pub fn detect_kind(val: &JsonValue) -> ObjectKind {
    let type_name = val.get("_type").and_then(JsonValue::as_str);
    let wrapped = val
        .get("weave_type")
        .and_then(|t| t.get("type"))
        .and_then(JsonValue::as_str);
    match (type_name, wrapped) {
        (Some("Op"), _) => ObjectKind::Op,
        (Some("CustomWeaveType"), Some("Op")) => ObjectKind::Op,
        _ => ObjectKind::Object,
    }
}

/// Class directly below `Object` in the value's `_bases` chain
///
/// `_bases` lists ancestors nearest first and ends with `Object, BaseModel`.
/// A direct `Object` subclass reports its own `_class_name`.
pub fn base_object_class(val: &JsonValue) -> Option<String> {
    let bases: Vec<&str> = val
        .get("_bases")?
        .as_array()?
        .iter()
        .filter_map(JsonValue::as_str)
        .collect();
    match bases.as_slice() {
        [.., base, "Object", "BaseModel"] => Some(base.to_string()),
        ["Object", "BaseModel"] => val
            .get("_class_name")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn validate_object_id(object_id: &str) -> Result<(), DataError> {
    if object_id.is_empty() {
        return Err(DataError::validation("object_id must not be empty"));
    }
    if object_id.len() > MAX_OBJECT_ID_LEN {
        return Err(DataError::validation(format!(
            "object_id must be at most {} characters",
            MAX_OBJECT_ID_LEN
        )));
    }
    if object_id.chars().any(char::is_control) {
        return Err(DataError::validation(
            "object_id must not contain control characters",
        ));
    }
    Ok(())
}

impl TraceService {
    pub(crate) async fn create_object(&self, obj: ObjSchemaForInsert) -> Result<String, DataError> {
        validate_object_id(&obj.object_id)?;
        let digest = value_digest(&obj.val);
        let kind = detect_kind(&obj.val);
        let base_class = base_object_class(&obj.val);

        let digest_owned = digest.clone();
        let outcome = self
            .duckdb
            .with_conn(move |conn| {
                objects_repository::create_version(
                    conn,
                    &NewObjectVersion {
                        project_id: &obj.project_id,
                        object_id: &obj.object_id,
                        digest: &digest_owned,
                        kind,
                        base_object_class: base_class.as_deref(),
                        val: &obj.val,
                        wb_user_id: obj.wb_user_id.as_deref(),
                        created_at: Utc::now(),
                    },
                )
            })
            .await?;

        match outcome {
            CreateOutcome::Existing => tracing::trace!(digest = %digest, "Object version exists"),
            CreateOutcome::Restored => tracing::debug!(digest = %digest, "Restored object version"),
            CreateOutcome::Inserted { version_index } => {
                tracing::debug!(digest = %digest, version_index, "Stored object version")
            }
        }
        Ok(digest)
    }

    pub(crate) async fn read_object(&self, req: ObjReadReq) -> Result<ObjSchema, DataError> {
        let selector = parse_selector(&req.digest);
        let label = format!("object {}:{}", req.object_id, req.digest);
        self.duckdb
            .with_conn(move |conn| {
                objects_repository::read_version(
                    conn,
                    &req.project_id,
                    &req.object_id,
                    &selector,
                    req.metadata_only,
                )
            })
            .await?
            .ok_or_else(|| DataError::not_found(label))
    }

    pub(crate) async fn query_objects(&self, req: ObjQueryReq) -> Result<Vec<ObjSchema>, DataError> {
        self.duckdb
            .with_conn(move |conn| objects_repository::query_versions(conn, &req))
            .await
    }

    pub(crate) async fn delete_objects(&self, req: ObjDeleteReq) -> Result<u64, DataError> {
        let deleted = self
            .duckdb
            .with_conn(move |conn| {
                objects_repository::delete_versions(
                    conn,
                    &req.project_id,
                    &req.object_id,
                    req.digests.as_deref(),
                    Utc::now(),
                )
            })
            .await?;
        tracing::debug!(deleted, "Deleted object versions");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::traits::TraceServer;
    use crate::data::types::{ObjCreateReq, ObjectVersionFilter, SortBy};
    use crate::domain::service::test_support::test_env;
    use serde_json::json;

    const P: &str = "e/p";

    fn create_req(object_id: &str, val: JsonValue) -> ObjCreateReq {
        ObjCreateReq {
            obj: ObjSchemaForInsert {
                project_id: P.into(),
                object_id: object_id.into(),
                val,
                wb_user_id: None,
            },
        }
    }

    fn delete_req(object_id: &str, digests: Option<Vec<String>>) -> ObjDeleteReq {
        ObjDeleteReq {
            project_id: P.into(),
            object_id: object_id.into(),
            digests,
        }
    }

    fn ids_query(object_id: &str) -> ObjQueryReq {
        ObjQueryReq {
            filter: Some(ObjectVersionFilter {
                object_ids: Some(vec![object_id.into()]),
                ..Default::default()
            }),
            ..ObjQueryReq::new(P)
        }
    }

    #[test]
    fn test_parse_selector() {
        assert_eq!(parse_selector("latest"), VersionSelector::Latest);
        assert_eq!(parse_selector("v12"), VersionSelector::Index(12));
        assert_eq!(
            parse_selector("vx"),
            VersionSelector::Digest("vx".to_string())
        );
    }

    #[test]
    fn test_detect_kind_and_base_class() {
        assert_eq!(detect_kind(&json!({"_type": "Op", "name": "f"})), ObjectKind::Op);
        assert_eq!(
            detect_kind(&json!({"_type": "CustomWeaveType", "weave_type": {"type": "Op"}})),
            ObjectKind::Op
        );
        assert_eq!(detect_kind(&json!({"_type": "Model"})), ObjectKind::Object);

        let direct = json!({"_class_name": "Model", "_bases": ["Object", "BaseModel"]});
        assert_eq!(base_object_class(&direct).as_deref(), Some("Model"));
        let nested =
            json!({"_class_name": "MyModel", "_bases": ["Model", "Object", "BaseModel"]});
        assert_eq!(base_object_class(&nested).as_deref(), Some("Model"));
        assert_eq!(base_object_class(&json!({"_bases": ["BaseModel"]})), None);
        assert_eq!(base_object_class(&json!([1, 2])), None);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let env = test_env().await;
        let s = &env.service;
        let a = s.obj_create(create_req("m", json!({"x": 1, "y": 2}))).await.unwrap();
        let b = s.obj_create(create_req("m", json!({"y": 2, "x": 1}))).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(s.objs_query(ids_query("m")).await.unwrap().objs.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_excluded_from_queries() {
        let env = test_env().await;
        let s = &env.service;
        let d = s
            .obj_create(create_req("m", json!({"v": 1})))
            .await
            .unwrap()
            .digest;

        let once = s
            .obj_delete(delete_req("m", Some(vec![d.clone()])))
            .await
            .unwrap();
        assert_eq!(once.num_deleted, 1);
        assert!(s.objs_query(ids_query("m")).await.unwrap().objs.is_empty());

        let twice = s
            .obj_delete(delete_req("m", Some(vec![d.clone()])))
            .await
            .unwrap();
        assert_eq!(twice.num_deleted, 0);
        let unknown = s
            .obj_delete(delete_req("m", Some(vec!["nope".into()])))
            .await
            .unwrap();
        assert_eq!(unknown.num_deleted, 0);

        let read = s
            .obj_read(ObjReadReq {
                project_id: P.into(),
                object_id: "m".into(),
                digest: d,
                metadata_only: false,
            })
            .await;
        assert!(matches!(read, Err(DataError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_version_index_survives_middle_delete() {
        let env = test_env().await;
        let s = &env.service;
        let mut digests = Vec::new();
        for v in 0..3 {
            digests.push(
                s.obj_create(create_req("m", json!({"v": v})))
                    .await
                    .unwrap()
                    .digest,
            );
        }
        s.obj_delete(delete_req("m", Some(vec![digests[1].clone()])))
            .await
            .unwrap();

        let objs = s.objs_query(ids_query("m")).await.unwrap().objs;
        let indexes: Vec<u64> = objs.iter().map(|o| o.version_index).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert!(objs[1].is_latest);

        s.obj_create(create_req("m", json!({"v": 3}))).await.unwrap();
        let latest = s
            .obj_read(ObjReadReq {
                project_id: P.into(),
                object_id: "m".into(),
                digest: "latest".into(),
                metadata_only: true,
            })
            .await
            .unwrap()
            .obj;
        assert_eq!(latest.version_index, 3);
        assert_eq!(latest.val, JsonValue::Null);

        let by_alias = s
            .obj_read(ObjReadReq {
                project_id: P.into(),
                object_id: "m".into(),
                digest: "v2".into(),
                metadata_only: false,
            })
            .await
            .unwrap()
            .obj;
        assert_eq!(by_alias.val, json!({"v": 2}));
        assert!(!by_alias.is_latest);
    }

    #[tokio::test]
    async fn test_recreating_deleted_digest_restores_it() {
        let env = test_env().await;
        let s = &env.service;
        let first = s
            .obj_create(create_req("m", json!({"v": 0})))
            .await
            .unwrap()
            .digest;
        s.obj_create(create_req("m", json!({"v": 1}))).await.unwrap();
        s.obj_delete(delete_req("m", None)).await.unwrap();

        let again = s
            .obj_create(create_req("m", json!({"v": 0})))
            .await
            .unwrap()
            .digest;
        assert_eq!(again, first);
        let objs = s.objs_query(ids_query("m")).await.unwrap().objs;
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].version_index, 0);
        assert!(objs[0].is_latest);
    }

    #[tokio::test]
    async fn test_query_filters_and_sorting() {
        let env = test_env().await;
        let s = &env.service;
        s.obj_create(create_req("b", json!({"_type": "Op"}))).await.unwrap();
        s.obj_create(create_req("a", json!({"v": 1}))).await.unwrap();
        s.obj_create(create_req("a", json!({"v": 2}))).await.unwrap();

        let latest_desc = s
            .objs_query(ObjQueryReq {
                filter: Some(ObjectVersionFilter {
                    latest_only: Some(true),
                    ..Default::default()
                }),
                sort_by: Some(vec![SortBy::desc("object_id")]),
                metadata_only: true,
                ..ObjQueryReq::new(P)
            })
            .await
            .unwrap()
            .objs;
        let names: Vec<&str> = latest_desc.iter().map(|o| o.object_id.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(latest_desc.iter().all(|o| o.val.is_null()));

        let ops = s
            .objs_query(ObjQueryReq {
                filter: Some(ObjectVersionFilter {
                    is_op: Some(true),
                    ..Default::default()
                }),
                ..ObjQueryReq::new(P)
            })
            .await
            .unwrap()
            .objs;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, ObjectKind::Op);

        let paged = s
            .objs_query(ObjQueryReq {
                limit: Some(1),
                offset: Some(1),
                sort_by: Some(vec![SortBy::asc("object_id")]),
                ..ObjQueryReq::new(P)
            })
            .await
            .unwrap()
            .objs;
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].object_id, "a");
        assert_eq!(paged[0].version_index, 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_object_id() {
        let env = test_env().await;
        let err = env
            .service
            .obj_create(create_req("", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Validation(_)));
    }
}
