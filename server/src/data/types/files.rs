use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCreateReq {
    pub project_id: String,
    pub name: String,
    pub content: Vec<u8>,
}

/// `digest` is the SHA-256 hex of the content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCreateRes {
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContentReadReq {
    pub project_id: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContentReadRes {
    pub content: Vec<u8>,
}
