//! Bridge wire frames
//!
//! Every frame is MessagePack (named fields). The request queue carries
//! [`ClientFrame`]s, the response queue carries [`BridgeResponse`]s. A
//! streaming request yields any number of `Item` bodies followed by exactly
//! one terminal body: `StreamEnd` or `Error`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::BridgeError;
use crate::data::error::DataError;

pub type RequestId = u64;

/// Method names carried in [`BridgeRequest::method`]
pub mod methods {
    pub const CALL_START: &str = "call_start";
    pub const CALL_END: &str = "call_end";
    pub const CALL_BATCH: &str = "call_batch";
    pub const CALL_READ: &str = "call_read";
    pub const CALLS_QUERY: &str = "calls_query";
    pub const CALLS_QUERY_STREAM: &str = "calls_query_stream";
    pub const CALLS_QUERY_STATS: &str = "calls_query_stats";
    pub const CALLS_DELETE: &str = "calls_delete";
    pub const CALL_UPDATE: &str = "call_update";
    pub const THREADS_QUERY: &str = "threads_query";
    pub const PROJECT_STATS: &str = "project_stats";
    pub const OBJ_CREATE: &str = "obj_create";
    pub const OBJ_READ: &str = "obj_read";
    pub const OBJS_QUERY: &str = "objs_query";
    pub const OBJ_DELETE: &str = "obj_delete";
    pub const TABLE_CREATE: &str = "table_create";
    pub const TABLE_CREATE_FROM_DIGESTS: &str = "table_create_from_digests";
    pub const TABLE_UPDATE: &str = "table_update";
    pub const TABLE_QUERY: &str = "table_query";
    pub const TABLE_QUERY_STREAM: &str = "table_query_stream";
    pub const TABLE_QUERY_STATS: &str = "table_query_stats";
    pub const REFS_READ_BATCH: &str = "refs_read_batch";
    pub const FILE_CREATE: &str = "file_create";
    pub const FILE_CONTENT_READ: &str = "file_content_read";
    pub const FEEDBACK_CREATE: &str = "feedback_create";
    pub const FEEDBACK_QUERY: &str = "feedback_query";
    pub const FEEDBACK_PURGE: &str = "feedback_purge";
    pub const FEEDBACK_REPLACE: &str = "feedback_replace";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: RequestId,
    pub method: String,
    /// MessagePack-encoded request struct
    pub payload: Vec<u8>,
}

/// Frames flowing from client to worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    Request(BridgeRequest),
    /// Ends the worker loop
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: RequestId,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// Unary result
    Value(Vec<u8>),
    /// One streamed row
    Item(Vec<u8>),
    /// Clean end of a stream
    StreamEnd,
    Error(RemoteError),
}

impl ResponseBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Item(_) => "item",
            Self::StreamEnd => "stream_end",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    Validation,
    NotFound,
    NotImplemented,
    Conflict,
    Timeout { timeout_secs: u64 },
    Unavailable,
    Other,
}

/// A [`DataError`] flattened for the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl From<&DataError> for RemoteError {
    fn from(e: &DataError) -> Self {
        let (kind, message) = match e {
            DataError::Validation(m) => (RemoteErrorKind::Validation, m.clone()),
            DataError::NotFound(m) => (RemoteErrorKind::NotFound, m.clone()),
            DataError::NotImplemented(m) => (RemoteErrorKind::NotImplemented, m.clone()),
            DataError::Conflict(m) => (RemoteErrorKind::Conflict, m.clone()),
            DataError::Timeout { timeout_secs, .. } => (
                RemoteErrorKind::Timeout {
                    timeout_secs: *timeout_secs,
                },
                e.to_string(),
            ),
            DataError::BackendUnavailable { .. } | DataError::Io(_) => {
                (RemoteErrorKind::Unavailable, e.to_string())
            }
            other => (RemoteErrorKind::Other, other.to_string()),
        };
        Self { kind, message }
    }
}

impl From<RemoteError> for DataError {
    fn from(e: RemoteError) -> Self {
        match e.kind {
            RemoteErrorKind::Validation => DataError::Validation(e.message),
            RemoteErrorKind::NotFound => DataError::NotFound(e.message),
            RemoteErrorKind::NotImplemented => DataError::NotImplemented(e.message),
            RemoteErrorKind::Conflict => DataError::Conflict(e.message),
            RemoteErrorKind::Timeout { timeout_secs } => DataError::timeout("remote", timeout_secs),
            RemoteErrorKind::Unavailable => DataError::backend_unavailable("remote", e.message),
            RemoteErrorKind::Other => DataError::Remote(e.message),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BridgeError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BridgeError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{CallsQueryReq, Expr, Query};
    use serde_json::json;

    #[test]
    fn test_request_payload_keeps_query_expression() {
        let query: Query = serde_json::from_value(json!({
            "$expr": {"$eq": [{"$getField": "op_name"}, {"$literal": "predict"}]}
        }))
        .unwrap();
        let req: CallsQueryReq = serde_json::from_value(json!({
            "project_id": "e/p",
            "query": query,
            "limit": 10
        }))
        .unwrap();
        let frame = ClientFrame::Request(BridgeRequest {
            id: 7,
            method: "calls_query".to_string(),
            payload: encode(&req).unwrap(),
        });

        let ClientFrame::Request(back) = decode(&encode(&frame).unwrap()).unwrap() else {
            panic!("expected request frame");
        };
        assert_eq!(back.id, 7);
        let back_req: CallsQueryReq = decode(&back.payload).unwrap();
        assert_eq!(back_req, req);
        assert!(matches!(back_req.query.unwrap().expr, Expr::Eq(_)));
    }

    #[test]
    fn test_remote_error_preserves_class() {
        let cases = [
            DataError::validation("bad"),
            DataError::not_found("gone"),
            DataError::not_implemented("v1"),
            DataError::timeout("duckdb", 30),
            DataError::Config("x".into()),
        ];
        let back: Vec<DataError> = cases
            .iter()
            .map(|e| DataError::from(RemoteError::from(e)))
            .collect();
        assert!(matches!(&back[0], DataError::Validation(m) if m == "bad"));
        assert!(matches!(&back[1], DataError::NotFound(m) if m == "gone"));
        assert!(matches!(back[2], DataError::NotImplemented(_)));
        assert!(matches!(
            back[3],
            DataError::Timeout {
                timeout_secs: 30,
                ..
            }
        ));
        assert!(matches!(back[4], DataError::Remote(_)));
    }
}
