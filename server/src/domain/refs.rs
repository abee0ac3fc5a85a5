//! Weave ref URIs
//!
//! ```text
//! weave:///{entity}/{project}/object/{name}:{digest}[/{key|attr|index|id}/{value}]*
//! weave:///{entity}/{project}/op/{name}:{digest}
//! weave:///{entity}/{project}/call/{id}
//! weave:///{entity}/{project}/table/{digest}
//! ```
//!
//! Names and extra-path values are percent-encoded. A reserved character
//! (`:`, `/`, `%`) that is not encoded, or a malformed escape, rejects the
//! whole ref.
//!
//! A resolution is stable when its value can never change: the ref pins an
//! object by concrete digest (or names a table) and the extra path only
//! crosses into tables. Following a nested object or call ref makes it
//! volatile, since those targets move with new versions, updates and deletes.

use std::fmt;

use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::objects::parse_selector;
use super::service::TraceService;
use crate::data::duckdb::repositories::objects::VersionSelector;
use crate::data::error::DataError;
use crate::data::types::{CallReadReq, ObjReadReq, ObjectKind, TableQueryReq, TableRowFilter};

pub const WEAVE_SCHEME: &str = "weave:///";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefError {
    #[error("Not a weave ref: {0}")]
    Scheme(String),

    #[error("Malformed ref {uri}: {reason}")]
    Malformed { uri: String, reason: String },
}

impl From<RefError> for DataError {
    fn from(e: RefError) -> Self {
        DataError::Validation(e.to_string())
    }
}

/// Kind of one extra-path step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraKind {
    Key,
    Attr,
    Index,
    Id,
}

impl ExtraKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Attr => "attr",
            Self::Index => "index",
            Self::Id => "id",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "key" => Some(Self::Key),
            "attr" => Some(Self::Attr),
            "index" => Some(Self::Index),
            "id" => Some(Self::Id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraStep {
    pub kind: ExtraKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Object {
        kind: ObjectKind,
        name: String,
        /// Concrete digest, `latest`, or `v<N>`
        digest: String,
        extra: Vec<ExtraStep>,
    },
    Call {
        id: String,
    },
    Table {
        digest: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaveRef {
    pub entity: String,
    pub project: String,
    pub target: RefTarget,
}

/// `weave:///{project_id}/call/{id}`, the ref feedback uses to point at a call
pub fn call_uri(project_id: &str, call_id: &str) -> String {
    format!("{}{}/call/{}", WEAVE_SCHEME, project_id, call_id)
}

impl WeaveRef {
    /// Ref to an object version inside `project_id` (`entity/project`)
    pub fn object(project_id: &str, name: &str, digest: &str) -> Result<Self, RefError> {
        let (entity, project) = project_id.split_once('/').ok_or_else(|| RefError::Malformed {
            uri: project_id.to_string(),
            reason: "project id must be entity/project".into(),
        })?;
        Ok(Self {
            entity: entity.to_string(),
            project: project.to_string(),
            target: RefTarget::Object {
                kind: ObjectKind::Object,
                name: name.to_string(),
                digest: digest.to_string(),
                extra: Vec::new(),
            },
        })
    }

    /// Append one extra-path step (objects only; ignored otherwise)
    pub fn with_extra(mut self, kind: ExtraKind, value: impl Into<String>) -> Self {
        if let RefTarget::Object { extra, .. } = &mut self.target {
            extra.push(ExtraStep {
                kind,
                value: value.into(),
            });
        }
        self
    }

    pub fn project_id(&self) -> String {
        format!("{}/{}", self.entity, self.project)
    }

    pub fn parse(uri: &str) -> Result<Self, RefError> {
        let rest = uri
            .strip_prefix(WEAVE_SCHEME)
            .ok_or_else(|| RefError::Scheme(uri.to_string()))?;
        let malformed = |reason: &str| RefError::Malformed {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 4 {
            return Err(malformed("expected entity/project/kind/name"));
        }
        let entity = plain_segment(uri, segments[0])?;
        let project = plain_segment(uri, segments[1])?;

        let target = match segments[2] {
            kind @ ("object" | "op") => {
                let (name, digest) = segments[3]
                    .split_once(':')
                    .ok_or_else(|| malformed("object segment must be name:digest"))?;
                let name = decode_segment(uri, name)?;
                let digest = plain_segment(uri, digest)?;

                let tail = &segments[4..];
                if tail.len() % 2 != 0 {
                    return Err(malformed("extra path must be kind/value pairs"));
                }
                let mut extra = Vec::with_capacity(tail.len() / 2);
                for pair in tail.chunks(2) {
                    let kind = ExtraKind::parse(pair[0])
                        .ok_or_else(|| malformed(&format!("unknown extra kind '{}'", pair[0])))?;
                    extra.push(ExtraStep {
                        kind,
                        value: decode_segment(uri, pair[1])?,
                    });
                }
                RefTarget::Object {
                    kind: ObjectKind::parse(kind),
                    name,
                    digest,
                    extra,
                }
            }
            "call" if segments.len() == 4 => RefTarget::Call {
                id: plain_segment(uri, segments[3])?,
            },
            "table" if segments.len() == 4 => RefTarget::Table {
                digest: plain_segment(uri, segments[3])?,
            },
            other => return Err(malformed(&format!("unsupported ref kind '{}'", other))),
        };

        Ok(Self {
            entity,
            project,
            target,
        })
    }
}

/// Decode a percent-encoded segment, rejecting raw `:` and malformed escapes
fn decode_segment(uri: &str, segment: &str) -> Result<String, RefError> {
    let malformed = |reason: String| RefError::Malformed {
        uri: uri.to_string(),
        reason,
    };
    if segment.is_empty() {
        return Err(malformed("empty segment".into()));
    }
    if segment.contains(':') {
        return Err(malformed(format!("unencoded ':' in '{}'", segment)));
    }
    let bytes = segment.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(malformed(format!("invalid escape in '{}'", segment)));
            }
        }
    }
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| malformed(e.to_string()))
}

/// A segment that must not need any encoding (entity, project, digest, id)
fn plain_segment(uri: &str, segment: &str) -> Result<String, RefError> {
    if segment.contains('%') {
        return Err(RefError::Malformed {
            uri: uri.to_string(),
            reason: format!("unexpected escape in '{}'", segment),
        });
    }
    decode_segment(uri, segment)
}

impl fmt::Display for WeaveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}/", WEAVE_SCHEME, self.entity, self.project)?;
        match &self.target {
            RefTarget::Object {
                kind,
                name,
                digest,
                extra,
            } => {
                write!(f, "{}/{}:{}", kind.as_str(), urlencoding::encode(name), digest)?;
                for step in extra {
                    write!(
                        f,
                        "/{}/{}",
                        step.kind.as_str(),
                        urlencoding::encode(&step.value)
                    )?;
                }
                Ok(())
            }
            RefTarget::Call { id } => write!(f, "call/{}", id),
            RefTarget::Table { digest } => write!(f, "table/{}", digest),
        }
    }
}

/// `None` for `NotFound`, so missing targets resolve to `null`
fn found<T>(result: Result<T, DataError>) -> Result<Option<T>, DataError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DataError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Resolved value of one ref
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub val: JsonValue,
    /// The value can never change for this ref
    pub stable: bool,
}

impl Resolved {
    fn stable(val: JsonValue) -> Self {
        Self { val, stable: true }
    }

    fn volatile(val: JsonValue) -> Self {
        Self { val, stable: false }
    }
}

impl TraceService {
    /// Value a ref points at, or `null` when any step of it is missing
    pub(crate) fn resolve_ref<'a>(
        &'a self,
        uri: &'a str,
    ) -> BoxFuture<'a, Result<Resolved, DataError>> {
        Box::pin(async move {
            let weave_ref = WeaveRef::parse(uri)?;
            let project_id = weave_ref.project_id();
            match weave_ref.target {
                RefTarget::Call { id } => {
                    let call = self
                        .read_call(CallReadReq {
                            project_id,
                            id,
                            include_feedback: false,
                        })
                        .await?;
                    match call {
                        Some(call) => Ok(Resolved::volatile(serde_json::to_value(call)?)),
                        None => Ok(Resolved::volatile(JsonValue::Null)),
                    }
                }
                RefTarget::Table { digest } => {
                    let rows =
                        found(self.query_table(TableQueryReq::new(project_id, digest)).await)?;
                    Ok(match rows {
                        Some(rows) => Resolved::stable(JsonValue::Array(
                            rows.into_iter().map(|r| r.val).collect(),
                        )),
                        None => Resolved::volatile(JsonValue::Null),
                    })
                }
                RefTarget::Object {
                    name,
                    digest,
                    extra,
                    ..
                } => {
                    let mut stable = matches!(parse_selector(&digest), VersionSelector::Digest(_));
                    let obj = found(
                        self.read_object(ObjReadReq {
                            project_id,
                            object_id: name,
                            digest,
                            metadata_only: false,
                        })
                        .await,
                    )?;
                    let mut current = match obj {
                        Some(obj) => obj.val,
                        None => return Ok(Resolved::volatile(JsonValue::Null)),
                    };
                    for step in &extra {
                        let next = self.walk_step(current, step).await?;
                        stable &= next.stable;
                        current = next.val;
                        if current.is_null() {
                            break;
                        }
                    }
                    Ok(Resolved { val: current, stable })
                }
            }
        })
    }

    /// Apply one extra-path step; refs met along the way are followed
    async fn walk_step(&self, current: JsonValue, step: &ExtraStep) -> Result<Resolved, DataError> {
        let (current, stable) = match current {
            JsonValue::String(s) if s.starts_with(WEAVE_SCHEME) => {
                let into_table = match WeaveRef::parse(&s) {
                    Ok(WeaveRef {
                        entity,
                        project,
                        target: RefTarget::Table { digest },
                    }) => {
                        if matches!(step.kind, ExtraKind::Index | ExtraKind::Id) {
                            let row = self
                                .table_row(format!("{}/{}", entity, project), digest, step)
                                .await?;
                            return Ok(Resolved::stable(row));
                        }
                        true
                    }
                    _ => false,
                };
                let nested = self.resolve_ref(&s).await?;
                (nested.val, nested.stable && into_table)
            }
            other => (other, true),
        };

        let val = match (step.kind, current) {
            (ExtraKind::Key | ExtraKind::Attr, JsonValue::Object(mut map)) => {
                map.remove(&step.value).unwrap_or(JsonValue::Null)
            }
            (ExtraKind::Index, JsonValue::Array(mut items)) => match step.value.parse::<usize>() {
                Ok(i) if i < items.len() => items.swap_remove(i),
                _ => JsonValue::Null,
            },
            _ => JsonValue::Null,
        };
        Ok(Resolved { val, stable })
    }

    /// Row of a stored table by position (`index`) or row digest (`id`)
    async fn table_row(
        &self,
        project_id: String,
        digest: String,
        step: &ExtraStep,
    ) -> Result<JsonValue, DataError> {
        let mut req = TableQueryReq::new(project_id, digest);
        match step.kind {
            ExtraKind::Index => match step.value.parse::<u64>() {
                Ok(index) => {
                    req.offset = Some(index);
                    req.limit = Some(1);
                }
                Err(_) => return Ok(JsonValue::Null),
            },
            _ => {
                req.filter = Some(TableRowFilter {
                    row_digests: Some(vec![step.value.clone()]),
                });
                req.limit = Some(1);
            }
        }
        let rows = found(self.query_table(req).await)?;
        Ok(rows
            .and_then(|rows| rows.into_iter().next())
            .map_or(JsonValue::Null, |row| row.val))
    }
}
