use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{Query, SortBy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackCreateReq {
    pub project_id: String,
    pub weave_ref: String,
    pub feedback_type: String,
    pub payload: JsonValue,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub wb_user_id: Option<String>,
    #[serde(default)]
    pub runnable_ref: Option<String>,
    #[serde(default)]
    pub call_ref: Option<String>,
    #[serde(default)]
    pub trigger_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackCreateRes {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub wb_user_id: Option<String>,
    pub payload: JsonValue,
}

/// A stored feedback row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSchema {
    pub id: String,
    pub project_id: String,
    pub weave_ref: String,
    pub feedback_type: String,
    pub payload: JsonValue,
    pub creator: Option<String>,
    pub wb_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub runnable_ref: Option<String>,
    pub call_ref: Option<String>,
    pub trigger_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackQueryReq {
    pub project_id: String,
    /// Columns to return; all when absent
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub query: Option<Query>,
    #[serde(default)]
    pub sort_by: Option<Vec<SortBy>>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl FeedbackQueryReq {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            fields: None,
            query: None,
            sort_by: None,
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackQueryRes {
    /// One JSON object per feedback row, restricted to the requested fields
    pub result: Vec<JsonValue>,
}

/// Hard delete; the query may only select by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPurgeReq {
    pub project_id: String,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPurgeRes {
    pub num_deleted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReplaceReq {
    pub feedback_id: String,
    #[serde(flatten)]
    pub feedback: FeedbackCreateReq,
}

pub type FeedbackReplaceRes = FeedbackCreateRes;
