//! Feedback on calls and objects
//!
//! Feedback types under the reserved `wandb.` prefix carry a fixed payload
//! shape; every other type accepts any JSON payload up to the size cap.

use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::refs::WeaveRef;
use super::service::TraceService;
use crate::core::constants::{
    FEEDBACK_MAX_PAYLOAD_BYTES, FEEDBACK_RESERVED_PREFIX, FEEDBACK_TYPE_NOTE,
    FEEDBACK_TYPE_REACTION, FEEDBACK_TYPE_RUNNABLE_PREFIX,
};
use crate::data::duckdb::repositories::feedback as feedback_repository;
use crate::data::error::DataError;
use crate::data::types::{
    Expr, FeedbackCreateReq, FeedbackCreateRes, FeedbackPurgeReq, FeedbackQueryReq,
    FeedbackReplaceReq, FeedbackSchema,
};
use crate::utils::json::get_path;
use crate::utils::time::micros_to_datetime;

/// Top-level fields a feedback query can project
const FEEDBACK_FIELDS: &[&str] = &[
    "id",
    "project_id",
    "weave_ref",
    "feedback_type",
    "payload",
    "creator",
    "wb_user_id",
    "created_at",
    "runnable_ref",
    "call_ref",
    "trigger_ref",
];

fn require_string_key(payload: &JsonValue, key: &str, feedback_type: &str) -> Result<(), DataError> {
    let valid = payload
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && obj.get(key).is_some_and(JsonValue::is_string));
    if valid {
        Ok(())
    } else {
        Err(DataError::validation(format!(
            "{} payload must be {{\"{}\": <string>}}",
            feedback_type, key
        )))
    }
}

/// Check a feedback request before it touches storage
pub fn validate_feedback(req: &FeedbackCreateReq) -> Result<(), DataError> {
    if req.feedback_type.is_empty() {
        return Err(DataError::validation("feedback_type must not be empty"));
    }

    let target = WeaveRef::parse(&req.weave_ref)?;
    if target.project_id() != req.project_id {
        return Err(DataError::validation(format!(
            "weave_ref {} is outside project {}",
            req.weave_ref, req.project_id
        )));
    }

    let payload_bytes = serde_json::to_vec(&req.payload)?.len();
    if payload_bytes > FEEDBACK_MAX_PAYLOAD_BYTES {
        return Err(DataError::validation(format!(
            "feedback payload is {} bytes, limit is {}",
            payload_bytes, FEEDBACK_MAX_PAYLOAD_BYTES
        )));
    }

    if !req.feedback_type.starts_with(FEEDBACK_RESERVED_PREFIX) {
        return Ok(());
    }
    match req.feedback_type.as_str() {
        FEEDBACK_TYPE_REACTION => require_string_key(&req.payload, "emoji", &req.feedback_type),
        FEEDBACK_TYPE_NOTE => require_string_key(&req.payload, "note", &req.feedback_type),
        other => match other.strip_prefix(FEEDBACK_TYPE_RUNNABLE_PREFIX) {
            Some(name) if !name.is_empty() => {
                let runnable_ref = req.runnable_ref.as_deref().ok_or_else(|| {
                    DataError::validation(format!("{} requires runnable_ref", other))
                })?;
                WeaveRef::parse(runnable_ref)?;
                Ok(())
            }
            _ => Err(DataError::validation(format!(
                "feedback type '{}' uses the reserved '{}' prefix",
                other, FEEDBACK_RESERVED_PREFIX
            ))),
        },
    }
}

fn to_schema(id: String, req: FeedbackCreateReq) -> FeedbackSchema {
    FeedbackSchema {
        id,
        project_id: req.project_id,
        weave_ref: req.weave_ref,
        feedback_type: req.feedback_type,
        payload: req.payload,
        creator: req.creator,
        wb_user_id: req.wb_user_id,
        created_at: micros_to_datetime(Utc::now().timestamp_micros()),
        runnable_ref: req.runnable_ref,
        call_ref: req.call_ref,
        trigger_ref: req.trigger_ref,
    }
}

fn created(feedback: &FeedbackSchema) -> FeedbackCreateRes {
    FeedbackCreateRes {
        id: feedback.id.clone(),
        created_at: feedback.created_at,
        wb_user_id: feedback.wb_user_id.clone(),
        payload: feedback.payload.clone(),
    }
}

/// Restrict rows to `fields`; dotted fields reach into the payload
fn project_fields(
    rows: Vec<FeedbackSchema>,
    fields: Option<&[String]>,
) -> Result<Vec<JsonValue>, DataError> {
    let Some(fields) = fields else {
        return rows
            .into_iter()
            .map(|row| serde_json::to_value(row).map_err(DataError::from))
            .collect();
    };
    for field in fields {
        let head = field.split('.').next().unwrap_or_default();
        if !FEEDBACK_FIELDS.contains(&head) {
            return Err(DataError::validation(format!("unknown feedback field '{}'", field)));
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let full = serde_json::to_value(row)?;
        let mut projected = Map::with_capacity(fields.len());
        for field in fields {
            let path: Vec<&str> = field.split('.').collect();
            let value = get_path(&full, &path).cloned().unwrap_or(JsonValue::Null);
            projected.insert(field.clone(), value);
        }
        out.push(JsonValue::Object(projected));
    }
    Ok(out)
}

fn id_literal(lhs: &Expr, rhs: &Expr) -> Option<String> {
    match (lhs, rhs) {
        (Expr::GetField(field), Expr::Literal(JsonValue::String(id)))
        | (Expr::Literal(JsonValue::String(id)), Expr::GetField(field))
            if field == "id" =>
        {
            Some(id.clone())
        }
        _ => None,
    }
}

/// Ids selected by a purge query: `id == x` or an `$or` of those
pub fn purge_ids(expr: &Expr) -> Result<Vec<String>, DataError> {
    let reject = || {
        DataError::validation("feedback purge only accepts $eq on id or an $or of those")
    };
    match expr {
        Expr::Eq((lhs, rhs)) => id_literal(lhs, rhs).map(|id| vec![id]).ok_or_else(reject),
        Expr::Or(operands) if !operands.is_empty() => operands
            .iter()
            .map(|operand| match operand {
                Expr::Eq((lhs, rhs)) => id_literal(lhs, rhs).ok_or_else(reject),
                _ => Err(reject()),
            })
            .collect(),
        _ => Err(reject()),
    }
}

impl TraceService {
    pub(crate) async fn create_feedback(
        &self,
        req: FeedbackCreateReq,
    ) -> Result<FeedbackCreateRes, DataError> {
        validate_feedback(&req)?;
        let feedback = to_schema(Uuid::now_v7().to_string(), req);
        let res = created(&feedback);
        self.duckdb
            .with_conn(move |conn| feedback_repository::insert_feedback(conn, &feedback))
            .await?;
        Ok(res)
    }

    pub(crate) async fn query_feedback(
        &self,
        req: FeedbackQueryReq,
    ) -> Result<Vec<JsonValue>, DataError> {
        let fields = req.fields.clone();
        let rows = self
            .duckdb
            .with_conn(move |conn| {
                feedback_repository::query_feedback(
                    conn,
                    &req.project_id,
                    req.query.as_ref(),
                    req.sort_by.as_deref(),
                    req.limit,
                    req.offset,
                )
            })
            .await?;
        project_fields(rows, fields.as_deref())
    }

    pub(crate) async fn purge_feedback(&self, req: FeedbackPurgeReq) -> Result<u64, DataError> {
        let ids = purge_ids(&req.query.expr)?;
        let deleted = self
            .duckdb
            .with_conn(move |conn| feedback_repository::delete_feedback(conn, &req.project_id, &ids))
            .await?;
        tracing::debug!(deleted, "Purged feedback");
        Ok(deleted)
    }

    pub(crate) async fn replace_feedback(
        &self,
        req: FeedbackReplaceReq,
    ) -> Result<FeedbackCreateRes, DataError> {
        validate_feedback(&req.feedback)?;
        let feedback_id = req.feedback_id;
        let feedback = to_schema(feedback_id.clone(), req.feedback);
        let res = created(&feedback);
        let updated = self
            .duckdb
            .with_conn(move |conn| feedback_repository::replace_feedback(conn, &feedback))
            .await?;
        if updated == 0 {
            return Err(DataError::not_found(format!("feedback {}", feedback_id)));
        }
        Ok(res)
    }
}
