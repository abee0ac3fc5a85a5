use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::SortBy;

/// Object kind derived from its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Object,
    Op,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Op => "op",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "op" { Self::Op } else { Self::Object }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjSchemaForInsert {
    pub project_id: String,
    pub object_id: String,
    pub val: JsonValue,
    #[serde(default)]
    pub wb_user_id: Option<String>,
}

/// One stored version of an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjSchema {
    pub project_id: String,
    pub object_id: String,
    pub digest: String,
    pub version_index: u64,
    pub is_latest: bool,
    pub kind: ObjectKind,
    pub base_object_class: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// `Null` when queried with `metadata_only`
    pub val: JsonValue,
    pub wb_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjCreateReq {
    pub obj: ObjSchemaForInsert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjCreateRes {
    pub digest: String,
}

/// `digest` is a concrete digest, `latest`, or a version alias `v<N>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjReadReq {
    pub project_id: String,
    pub object_id: String,
    pub digest: String,
    #[serde(default)]
    pub metadata_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjReadRes {
    pub obj: ObjSchema,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectVersionFilter {
    #[serde(default)]
    pub base_object_classes: Option<Vec<String>>,
    #[serde(default)]
    pub object_ids: Option<Vec<String>>,
    #[serde(default)]
    pub is_op: Option<bool>,
    #[serde(default)]
    pub latest_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjQueryReq {
    pub project_id: String,
    #[serde(default)]
    pub filter: Option<ObjectVersionFilter>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub sort_by: Option<Vec<SortBy>>,
    #[serde(default)]
    pub metadata_only: bool,
}

impl ObjQueryReq {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            filter: None,
            limit: None,
            offset: None,
            sort_by: None,
            metadata_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjQueryRes {
    pub objs: Vec<ObjSchema>,
}

/// `digests: None` deletes every version of the object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjDeleteReq {
    pub project_id: String,
    pub object_id: String,
    #[serde(default)]
    pub digests: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjDeleteRes {
    pub num_deleted: u64,
}

// ============================================================================
// Refs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefsReadBatchReq {
    pub refs: Vec<String>,
}

/// `vals[i]` is the resolved value of `refs[i]` (`Null` when missing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefsReadBatchRes {
    pub vals: Vec<JsonValue>,
    /// `stable[i]` is set when `vals[i]` can never change; empty means unknown
    #[serde(default)]
    pub stable: Vec<bool>,
}
