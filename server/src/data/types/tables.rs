use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::SortBy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchemaForInsert {
    pub project_id: String,
    pub rows: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCreateReq {
    pub table: TableSchemaForInsert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCreateRes {
    pub digest: String,
    /// Row digests in input order
    pub row_digests: Vec<String>,
}

/// Assemble a table from rows that are already stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCreateFromDigestsReq {
    pub project_id: String,
    pub row_digests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCreateFromDigestsRes {
    pub digest: String,
}

/// A single table mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableUpdateSpec {
    Append { row: JsonValue },
    Pop { index: usize },
    Insert { index: usize, row: JsonValue },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableUpdateReq {
    pub project_id: String,
    pub base_digest: String,
    pub updates: Vec<TableUpdateSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableUpdateRes {
    pub digest: String,
    /// Digests of appended/inserted rows, in update order
    pub updated_row_digests: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRowFilter {
    #[serde(default)]
    pub row_digests: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQueryReq {
    pub project_id: String,
    pub digest: String,
    #[serde(default)]
    pub filter: Option<TableRowFilter>,
    #[serde(default)]
    pub sort_by: Option<Vec<SortBy>>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl TableQueryReq {
    pub fn new(project_id: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            digest: digest.into(),
            filter: None,
            sort_by: None,
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRowSchema {
    pub digest: String,
    pub val: JsonValue,
    /// Position of the row in the stored table
    pub original_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQueryRes {
    pub rows: Vec<TableRowSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQueryStatsReq {
    pub project_id: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQueryStatsRes {
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_spec_wire_shape() {
        let ops: Vec<TableUpdateSpec> = serde_json::from_value(json!([
            {"append": {"row": {"a": 1}}},
            {"pop": {"index": 0}},
            {"insert": {"index": 1, "row": {"b": 2}}}
        ]))
        .unwrap();
        assert_eq!(
            ops,
            vec![
                TableUpdateSpec::Append { row: json!({"a": 1}) },
                TableUpdateSpec::Pop { index: 0 },
                TableUpdateSpec::Insert {
                    index: 1,
                    row: json!({"b": 2})
                },
            ]
        );
    }
}
