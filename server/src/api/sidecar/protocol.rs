//! Sidecar wire format
//!
//! One JSON object per line in each direction. The client tags every frame
//! with an id; replies carry the same id and may arrive in any order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::bridge::RemoteError;
use crate::data::error::DataError;
use crate::data::types::{CallBatchItem, CallBatchItemRes};

pub type FrameId = u64;

/// Client to listener: one hot-path call event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarFrame {
    pub id: FrameId,
    pub call: CallBatchItem,
}

/// Listener to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarReply {
    pub id: FrameId,
    pub outcome: SidecarOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarOutcome {
    Ok(CallBatchItemRes),
    Error(RemoteError),
}

impl SidecarOutcome {
    pub fn from_result(result: Result<CallBatchItemRes, DataError>) -> Self {
        match result {
            Ok(res) => Self::Ok(res),
            Err(e) => Self::Error(RemoteError::from(&e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("sidecar socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed sidecar frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("sidecar connection closed")]
    Disconnected,

    #[error("sidecar reply timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl From<SidecarError> for DataError {
    fn from(e: SidecarError) -> Self {
        match e {
            SidecarError::Io(e) => DataError::Io(e),
            SidecarError::Frame(e) => DataError::Serialization(e.to_string()),
            SidecarError::Disconnected => {
                DataError::backend_unavailable("sidecar", "connection closed")
            }
            SidecarError::Timeout { timeout_secs } => DataError::timeout("sidecar", timeout_secs),
        }
    }
}

/// Serialize `value` as one newline-terminated line
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, SidecarError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, SidecarError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Best-effort id recovery from a line that failed to decode as a frame
pub fn salvage_id(line: &str) -> Option<FrameId> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{CallEndRes, CallStartRes};
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        let frame: SidecarFrame = serde_json::from_value(json!({
            "id": 3,
            "call": {
                "mode": "end",
                "req": {"end": {
                    "project_id": "e/p",
                    "id": "c1",
                    "ended_at": "2024-01-01T00:00:01Z",
                    "summary": {}
                }}
            }
        }))
        .unwrap();
        assert_eq!(frame.id, 3);
        assert!(matches!(frame.call, CallBatchItem::End(ref e) if e.end.id == "c1"));

        let line = encode_line(&frame).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert!(!line[..line.len() - 1].contains(&b'\n'));
        let back: SidecarFrame = decode_line(std::str::from_utf8(&line).unwrap()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_reply_outcomes() {
        let ok = SidecarOutcome::from_result(Ok(CallBatchItemRes::Start(CallStartRes {
            id: "c1".into(),
            trace_id: "t1".into(),
        })));
        let value = serde_json::to_value(SidecarReply { id: 1, outcome: ok }).unwrap();
        assert_eq!(value["outcome"]["ok"]["mode"], "start");
        assert_eq!(value["outcome"]["ok"]["res"]["trace_id"], "t1");

        let err = SidecarOutcome::from_result(Err(DataError::validation("op_name must not be empty")));
        let SidecarOutcome::Error(remote) = err else {
            panic!("expected error outcome");
        };
        assert!(matches!(DataError::from(remote), DataError::Validation(_)));

        let end = SidecarOutcome::from_result(Ok(CallBatchItemRes::End(CallEndRes {})));
        assert!(matches!(end, SidecarOutcome::Ok(CallBatchItemRes::End(_))));
    }

    #[test]
    fn test_salvage_id_from_bad_frame() {
        assert_eq!(salvage_id(r#"{"id": 9, "call": {"mode": "bogus"}}"#), Some(9));
        assert_eq!(salvage_id("not json"), None);
        assert_eq!(salvage_id(r#"{"call": {}}"#), None);
    }
}
