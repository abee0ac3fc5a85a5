use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{Query, SortBy};

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

// ============================================================================
// Call records
// ============================================================================

/// Fields carried by a call-start event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedCall {
    pub project_id: String,
    #[serde(default)]
    pub id: Option<String>,
    pub op_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default = "empty_object")]
    pub attributes: JsonValue,
    #[serde(default = "empty_object")]
    pub inputs: JsonValue,
    #[serde(default)]
    pub wb_user_id: Option<String>,
    #[serde(default)]
    pub wb_run_id: Option<String>,
}

/// Fields carried by a call-end event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndedCall {
    pub project_id: String,
    pub id: String,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub output: Option<JsonValue>,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default = "empty_object")]
    pub summary: JsonValue,
}

/// A reconciled call as seen by readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSchema {
    pub project_id: String,
    pub id: String,
    pub op_name: String,
    pub display_name: Option<String>,
    pub trace_id: String,
    pub parent_id: Option<String>,
    pub thread_id: Option<String>,
    pub turn_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attributes: JsonValue,
    pub inputs: JsonValue,
    pub output: Option<JsonValue>,
    pub exception: Option<String>,
    pub summary: JsonValue,
    pub wb_user_id: Option<String>,
    pub wb_run_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Writes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStartReq {
    pub start: StartedCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStartRes {
    pub id: String,
    pub trace_id: String,
}

/// Identity of a running call, enough to start a child in another process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentCall {
    pub id: String,
    pub trace_id: String,
}

impl From<CallStartRes> for ParentCall {
    fn from(res: CallStartRes) -> Self {
        Self {
            id: res.id,
            trace_id: res.trace_id,
        }
    }
}

impl StartedCall {
    /// Attach this call under `parent`, inheriting its trace
    pub fn with_parent(mut self, parent: &ParentCall) -> Self {
        self.parent_id = Some(parent.id.clone());
        self.trace_id = Some(parent.trace_id.clone());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEndReq {
    pub end: EndedCall,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallEndRes {}

/// One entry of an ordered write batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "req", rename_all = "snake_case")]
pub enum CallBatchItem {
    Start(CallStartReq),
    End(CallEndReq),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBatchReq {
    pub batch: Vec<CallBatchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "res", rename_all = "snake_case")]
pub enum CallBatchItemRes {
    Start(CallStartRes),
    End(CallEndRes),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBatchRes {
    pub res: Vec<CallBatchItemRes>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallUpdateReq {
    pub project_id: String,
    pub call_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub wb_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallUpdateRes {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsDeleteReq {
    pub project_id: String,
    pub call_ids: Vec<String>,
    #[serde(default)]
    pub wb_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsDeleteRes {
    pub num_deleted: u64,
}

// ============================================================================
// Reads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallReadReq {
    pub project_id: String,
    pub id: String,
    #[serde(default)]
    pub include_feedback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallReadRes {
    pub call: Option<CallSchema>,
}

/// Structured pre-filter, ANDed with the expression query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallsFilter {
    #[serde(default)]
    pub op_names: Option<Vec<String>>,
    #[serde(default)]
    pub call_ids: Option<Vec<String>>,
    #[serde(default)]
    pub trace_ids: Option<Vec<String>>,
    #[serde(default)]
    pub parent_ids: Option<Vec<String>>,
    #[serde(default)]
    pub thread_ids: Option<Vec<String>>,
    #[serde(default)]
    pub trace_roots_only: Option<bool>,
    #[serde(default)]
    pub wb_user_ids: Option<Vec<String>>,
    #[serde(default)]
    pub wb_run_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsQueryReq {
    pub project_id: String,
    #[serde(default)]
    pub filter: Option<CallsFilter>,
    #[serde(default)]
    pub query: Option<Query>,
    #[serde(default)]
    pub sort_by: Option<Vec<SortBy>>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub include_feedback: bool,
}

impl CallsQueryReq {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            filter: None,
            query: None,
            sort_by: None,
            limit: None,
            offset: None,
            include_feedback: false,
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsQueryRes {
    pub calls: Vec<CallSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsQueryStatsReq {
    pub project_id: String,
    #[serde(default)]
    pub filter: Option<CallsFilter>,
    #[serde(default)]
    pub query: Option<Query>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsQueryStatsRes {
    pub count: u64,
}

// ============================================================================
// Threads and project statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadsQueryFilter {
    #[serde(default)]
    pub after_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub before_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadsQueryReq {
    pub project_id: String,
    #[serde(default)]
    pub filter: Option<ThreadsQueryFilter>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

/// Aggregate over the root calls sharing a `thread_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSchema {
    pub thread_id: String,
    pub turn_count: u64,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub first_turn_id: String,
    pub last_turn_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadsQueryRes {
    pub threads: Vec<ThreadSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatsReq {
    pub project_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatsRes {
    pub calls_count: u64,
    pub objects_count: u64,
    pub tables_count: u64,
    pub files_count: u64,
    pub files_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_started_call_defaults() {
        let start: StartedCall = serde_json::from_value(json!({
            "project_id": "e/p",
            "op_name": "predict",
            "started_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(start.id.is_none());
        assert_eq!(start.attributes, json!({}));
        assert_eq!(start.inputs, json!({}));
    }

    #[test]
    fn test_batch_item_wire_shape() {
        let item = CallBatchItem::End(CallEndReq {
            end: EndedCall {
                project_id: "e/p".into(),
                id: "c1".into(),
                ended_at: DateTime::UNIX_EPOCH,
                output: None,
                exception: None,
                summary: json!({}),
            },
        });
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["mode"], "end");
        assert_eq!(v["req"]["end"]["id"], "c1");
    }
}
