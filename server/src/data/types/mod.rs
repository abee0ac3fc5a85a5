//! Request and response types for the trace server protocol
//!
//! Each operation takes a `project_id`-scoped request and returns a typed
//! response. The same types travel over the cross-process bridge (MessagePack)
//! and the sidecar socket (JSON).

mod calls;
mod feedback;
mod files;
mod objects;
mod query;
mod tables;

pub use calls::*;
pub use feedback::*;
pub use files::*;
pub use objects::*;
pub use query::*;
pub use tables::*;

use serde::{Deserialize, Serialize};

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One key of a (possibly composite) sort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_default_direction() {
        let s: SortBy = serde_json::from_str(r#"{"field": "created_at"}"#).unwrap();
        assert_eq!(s, SortBy::asc("created_at"));
        let s: SortBy =
            serde_json::from_str(r#"{"field": "created_at", "direction": "desc"}"#).unwrap();
        assert_eq!(s.direction.as_sql(), "DESC");
    }
}
