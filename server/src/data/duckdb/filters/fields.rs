//! Field resolution for call and feedback queries
//!
//! A resolver maps a dotted field path to a SQL expression and its static
//! type. Bracketed segments (`feedback.[wandb.runnable.x].payload`) are
//! opaque keys and never split on dots.

use super::QueryError;
use crate::utils::sql::quote_literal;

/// Static type of a resolved field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Text,
    Number,
    Bool,
    Timestamp,
    /// Text extracted from a JSON document; coerced by the comparison
    Dynamic,
}

/// Where a resolved field came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Column,
    Derived,
    JsonPath,
    Feedback,
}

/// Correlated rows a field ranges over, such as the feedback of one call
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    /// Value of the field on one row
    pub value: String,
    /// `FROM .. WHERE ..` selecting the rows; more conditions may be ANDed on
    pub from: String,
}

impl RowSet {
    /// True when some row satisfies `predicate`, false when rows exist but
    /// none does, NULL when no row has a value
    pub fn any(&self, predicate: &str) -> String {
        format!("(SELECT bool_or({}) {})", predicate, self.from)
    }

    /// True when some row carries a non-null value
    pub fn exists(&self, value: &str) -> String {
        format!("EXISTS (SELECT 1 {} AND {} IS NOT NULL)", self.from, value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// Scalar expression; for a row set, the value on the newest row
    pub sql: String,
    pub ty: Ty,
    pub kind: FieldKind,
    pub rows: Option<RowSet>,
}

impl ResolvedField {
    fn new(sql: impl Into<String>, ty: Ty, kind: FieldKind) -> Self {
        Self {
            sql: sql.into(),
            ty,
            kind,
            rows: None,
        }
    }

    /// Field over `rows`; `newest` orders them for the scalar form
    fn over_rows(rows: RowSet, newest: &str, ty: Ty, kind: FieldKind) -> Self {
        Self {
            sql: format!("(SELECT {} {} ORDER BY {} LIMIT 1)", rows.value, rows.from, newest),
            ty,
            kind,
            rows: Some(rows),
        }
    }
}

pub trait FieldResolver {
    /// Resolve a field referenced from a filter expression
    fn resolve(&self, path: &str) -> Result<ResolvedField, QueryError>;

    /// Resolve a field referenced from `sort_by`
    fn resolve_sort(&self, path: &str) -> Result<ResolvedField, QueryError> {
        self.resolve(path)
    }
}

/// Split a dotted path, keeping `[...]` segments intact
///
/// `feedback.[wandb.runnable.x].payload.score` splits into
/// `["feedback", "wandb.runnable.x", "payload", "score"]`.
pub fn split_field_path(path: &str) -> Result<Vec<String>, QueryError> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    let mut just_closed = false;

    while let Some(ch) = chars.next() {
        match ch {
            '[' if current.is_empty() => {
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed || inner.is_empty() {
                    return Err(QueryError::InvalidPath(path.to_string()));
                }
                segments.push(inner);
                just_closed = true;
                if let Some(&next) = chars.peek()
                    && next != '.'
                {
                    return Err(QueryError::InvalidPath(path.to_string()));
                }
            }
            '.' => {
                if just_closed {
                    just_closed = false;
                    continue;
                }
                if current.is_empty() {
                    return Err(QueryError::InvalidPath(path.to_string()));
                }
                segments.push(std::mem::take(&mut current));
            }
            ']' | '[' => return Err(QueryError::InvalidPath(path.to_string())),
            c => {
                just_closed = false;
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        segments.push(current);
    } else if !just_closed {
        return Err(QueryError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// `json_extract_string(col, '$."a"."b"')`, or the whole document for an empty path
fn json_extract(column: &str, keys: &[String]) -> Result<String, QueryError> {
    let mut json_path = String::from("$");
    for key in keys {
        if key.contains('"') {
            return Err(QueryError::InvalidPath(key.clone()));
        }
        json_path.push_str(&format!(".\"{}\"", key));
    }
    Ok(format!(
        "json_extract_string({}, {})",
        column,
        quote_literal(&json_path)
    ))
}

// ============================================================================
// Calls
// ============================================================================

/// Physical call layout a query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallsLayout {
    /// Reconciled at read time from `call_parts`
    Merged,
    /// Precomputed `calls_complete`
    Complete,
}

const CALL_TEXT_COLUMNS: &[&str] = &[
    "id",
    "project_id",
    "trace_id",
    "parent_id",
    "thread_id",
    "turn_id",
    "op_name",
    "display_name",
    "wb_user_id",
    "wb_run_id",
    "exception",
];

const CALL_TIMESTAMP_COLUMNS: &[&str] = &["started_at", "ended_at"];

/// JSON document columns, addressed as `<name>.<path>`
const CALL_JSON_COLUMNS: &[&str] = &["attributes", "inputs", "output", "summary"];

/// Feedback attributes reachable through `feedback.[type].<attr>`
const FEEDBACK_REF_ATTRS: &[&str] = &[
    "runnable_ref",
    "call_ref",
    "trigger_ref",
    "creator",
    "wb_user_id",
    "id",
];

/// Resolves call fields against a relation aliased as `alias`
#[derive(Debug, Clone)]
pub struct CallsFieldResolver {
    alias: String,
    layout: CallsLayout,
}

impl CallsFieldResolver {
    pub fn new(alias: impl Into<String>, layout: CallsLayout) -> Self {
        Self {
            alias: alias.into(),
            layout,
        }
    }

    pub fn merged(alias: impl Into<String>) -> Self {
        Self::new(alias, CallsLayout::Merged)
    }

    pub fn complete(alias: impl Into<String>) -> Self {
        Self::new(alias, CallsLayout::Complete)
    }

    fn col(&self, name: &str) -> String {
        format!("{}.{}", self.alias, name)
    }

    fn derived(&self, rest: &[String]) -> Option<ResolvedField> {
        if rest.len() != 2 || rest[0] != "weave" {
            return None;
        }
        let a = &self.alias;
        match rest[1].as_str() {
            "status" => Some(ResolvedField::new(
                format!(
                    "(CASE WHEN {a}.exception IS NOT NULL THEN 'error' \
                     WHEN {a}.ended_at IS NULL THEN 'running' ELSE 'success' END)"
                ),
                Ty::Text,
                FieldKind::Derived,
            )),
            "latency_ms" => Some(ResolvedField::new(
                format!("(epoch_ms({a}.ended_at) - epoch_ms({a}.started_at))"),
                Ty::Number,
                FieldKind::Derived,
            )),
            "trace_name" => Some(ResolvedField::new(
                format!("coalesce({a}.display_name, {a}.op_name)"),
                Ty::Text,
                FieldKind::Derived,
            )),
            _ => None,
        }
    }

    fn feedback(&self, path: &str, rest: &[String]) -> Result<ResolvedField, QueryError> {
        if self.layout == CallsLayout::Complete {
            return Err(QueryError::Unsupported(format!(
                "feedback field '{}' is not supported on the calls_complete layout",
                path
            )));
        }
        let (feedback_type, attr) = match rest {
            [feedback_type, attr, ..] => (feedback_type, attr.as_str()),
            _ => return Err(QueryError::InvalidPath(path.to_string())),
        };

        let (selected, ty) = match attr {
            "payload" => (json_extract("f.payload_dump", &rest[2..])?, Ty::Dynamic),
            a if FEEDBACK_REF_ATTRS.contains(&a) && rest.len() == 2 => {
                (format!("f.{}", a), Ty::Text)
            }
            _ => return Err(QueryError::UnknownField(path.to_string())),
        };

        let a = &self.alias;
        let rows = RowSet {
            value: selected,
            from: format!(
                "FROM feedback f \
                 WHERE f.project_id = {a}.project_id \
                 AND f.weave_ref = 'weave:///' || {a}.project_id || '/call/' || {a}.id \
                 AND f.feedback_type = {}",
                quote_literal(feedback_type)
            ),
        };
        Ok(ResolvedField::over_rows(
            rows,
            "f.created_at DESC",
            ty,
            FieldKind::Feedback,
        ))
    }
}

impl FieldResolver for CallsFieldResolver {
    fn resolve(&self, path: &str) -> Result<ResolvedField, QueryError> {
        let segments = split_field_path(path)?;
        let (head, rest) = match segments.split_first() {
            Some((head, rest)) => (head.as_str(), rest),
            None => return Err(QueryError::InvalidPath(path.to_string())),
        };

        if rest.is_empty() {
            if CALL_TEXT_COLUMNS.contains(&head) {
                return Ok(ResolvedField::new(self.col(head), Ty::Text, FieldKind::Column));
            }
            if CALL_TIMESTAMP_COLUMNS.contains(&head) {
                return Ok(ResolvedField::new(
                    self.col(head),
                    Ty::Timestamp,
                    FieldKind::Column,
                ));
            }
        }

        if head == "summary"
            && let Some(field) = self.derived(rest)
        {
            return Ok(field);
        }

        if CALL_JSON_COLUMNS.contains(&head) {
            let column = self.col(&format!("{}_dump", head));
            let kind = if rest.is_empty() {
                FieldKind::Column
            } else {
                FieldKind::JsonPath
            };
            return Ok(ResolvedField::new(
                json_extract(&column, rest)?,
                Ty::Dynamic,
                kind,
            ));
        }

        if head == "feedback" {
            return self.feedback(path, rest);
        }

        Err(QueryError::UnknownField(path.to_string()))
    }

    fn resolve_sort(&self, path: &str) -> Result<ResolvedField, QueryError> {
        let field = self.resolve(path)?;
        if self.layout == CallsLayout::Complete && field.kind == FieldKind::JsonPath {
            return Err(QueryError::Unsupported(format!(
                "sorting by '{}' is not supported on the calls_complete layout",
                path
            )));
        }
        Ok(field)
    }
}

// ============================================================================
// Feedback
// ============================================================================

const FEEDBACK_TEXT_COLUMNS: &[&str] = &[
    "id",
    "project_id",
    "weave_ref",
    "feedback_type",
    "creator",
    "wb_user_id",
    "runnable_ref",
    "call_ref",
    "trigger_ref",
];

/// Resolves feedback row fields against a relation aliased as `alias`
#[derive(Debug, Clone)]
pub struct FeedbackFieldResolver {
    alias: String,
}

impl FeedbackFieldResolver {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
        }
    }
}

impl FieldResolver for FeedbackFieldResolver {
    fn resolve(&self, path: &str) -> Result<ResolvedField, QueryError> {
        let segments = split_field_path(path)?;
        let (head, rest) = match segments.split_first() {
            Some((head, rest)) => (head.as_str(), rest),
            None => return Err(QueryError::InvalidPath(path.to_string())),
        };

        if rest.is_empty() && FEEDBACK_TEXT_COLUMNS.contains(&head) {
            return Ok(ResolvedField::new(
                format!("{}.{}", self.alias, head),
                Ty::Text,
                FieldKind::Column,
            ));
        }
        if rest.is_empty() && head == "created_at" {
            return Ok(ResolvedField::new(
                format!("{}.created_at", self.alias),
                Ty::Timestamp,
                FieldKind::Column,
            ));
        }
        if head == "payload" {
            let column = format!("{}.payload_dump", self.alias);
            return Ok(ResolvedField::new(
                json_extract(&column, rest)?,
                Ty::Dynamic,
                FieldKind::JsonPath,
            ));
        }
        Err(QueryError::UnknownField(path.to_string()))
    }
}
