//! Call lifecycle
//!
//! Every event becomes a fragment in `call_parts`; reads reconcile the
//! fragments per call id. Every write also re-materializes the touched ids
//! into `calls_complete` inside the same transaction, whatever version the
//! project currently routes to, so both layouts always agree.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::refs::call_uri;
use super::router::CallsRead;
use super::service::TraceService;
use crate::core::constants::{CALLS_QUERY_MAX_LIMIT, CALLS_STREAM_PAGE_SIZE};
use crate::data::duckdb::filters::CallsLayout;
use crate::data::duckdb::in_transaction;
use crate::data::duckdb::repositories::{
    calls as calls_repository, feedback as feedback_repository, stats as stats_repository,
};
use crate::data::error::DataError;
use crate::data::traits::RowStream;
use crate::data::types::{
    CallSchema, CallStartRes, CallUpdateReq, CallsDeleteReq, CallsFilter, CallsQueryReq,
    CallsQueryStatsReq, EndedCall, FeedbackSchema, ProjectStatsRes, StartedCall, ThreadSchema,
    ThreadsQueryReq,
};

/// Time-ordered id for calls and traces
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

fn require(value: &str, what: &str) -> Result<(), DataError> {
    if value.trim().is_empty() {
        return Err(DataError::validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

// ============================================================================
// Writes
// ============================================================================

/// One validated call event, ready to append
#[derive(Debug, Clone)]
pub enum CallWrite {
    Start {
        start: StartedCall,
        id: String,
        trace_id: String,
    },
    End(EndedCall),
    Update {
        project_id: String,
        id: String,
        display_name: Option<String>,
        wb_user_id: Option<String>,
    },
    Delete {
        project_id: String,
        ids: Vec<String>,
        wb_user_id: Option<String>,
        deleted_at: DateTime<Utc>,
    },
}

impl CallWrite {
    /// Resolve ids (generating missing ones) for a start event
    pub fn start(start: StartedCall) -> Result<(Self, CallStartRes), DataError> {
        require(&start.project_id, "project_id")?;
        require(&start.op_name, "op_name")?;
        let id = start.id.clone().unwrap_or_else(generate_id);
        let trace_id = start.trace_id.clone().unwrap_or_else(generate_id);
        require(&id, "id")?;
        require(&trace_id, "trace_id")?;

        let res = CallStartRes {
            id: id.clone(),
            trace_id: trace_id.clone(),
        };
        Ok((Self::Start { start, id, trace_id }, res))
    }

    pub fn end(end: EndedCall) -> Result<Self, DataError> {
        require(&end.project_id, "project_id")?;
        require(&end.id, "id")?;
        Ok(Self::End(end))
    }

    pub fn update(req: CallUpdateReq) -> Result<Self, DataError> {
        require(&req.project_id, "project_id")?;
        require(&req.call_id, "call_id")?;
        Ok(Self::Update {
            project_id: req.project_id,
            id: req.call_id,
            display_name: req.display_name,
            wb_user_id: req.wb_user_id,
        })
    }

    pub fn delete(req: CallsDeleteReq) -> Result<Self, DataError> {
        require(&req.project_id, "project_id")?;
        let mut ids = req.call_ids;
        ids.sort();
        ids.dedup();
        Ok(Self::Delete {
            project_id: req.project_id,
            ids,
            wb_user_id: req.wb_user_id,
            deleted_at: Utc::now(),
        })
    }

    fn project_id(&self) -> &str {
        match self {
            Self::Start { start, .. } => &start.project_id,
            Self::End(end) => &end.project_id,
            Self::Update { project_id, .. } | Self::Delete { project_id, .. } => project_id,
        }
    }

    fn call_ids(&self) -> Vec<String> {
        match self {
            Self::Start { id, .. } | Self::Update { id, .. } => vec![id.clone()],
            Self::End(end) => vec![end.id.clone()],
            Self::Delete { ids, .. } => ids.clone(),
        }
    }

    /// Append the fragment; returns the number of visible calls deleted
    fn apply(&self, conn: &Connection) -> Result<u64, DataError> {
        match self {
            Self::Start {
                start,
                id,
                trace_id,
            } => calls_repository::insert_start(conn, start, id, trace_id).map(|_| 0),
            Self::End(end) => calls_repository::insert_end(conn, end).map(|_| 0),
            Self::Update {
                project_id,
                id,
                display_name,
                wb_user_id,
            } => calls_repository::insert_update(
                conn,
                project_id,
                id,
                display_name.as_deref(),
                wb_user_id.as_deref(),
            )
            .map(|_| 0),
            Self::Delete {
                project_id,
                ids,
                wb_user_id,
                deleted_at,
            } => calls_repository::insert_deletes(
                conn,
                project_id,
                ids,
                wb_user_id.as_deref(),
                *deleted_at,
            ),
        }
    }
}

/// Apply `writes` in order, then rebuild the complete rows they touched
fn apply_writes(conn: &Connection, writes: &[CallWrite]) -> Result<u64, DataError> {
    in_transaction(conn, |conn| -> Result<u64, DataError> {
        let mut deleted = 0;
        let mut touched: HashMap<&str, Vec<String>> = HashMap::new();
        for write in writes {
            deleted += write.apply(conn)?;
            touched
                .entry(write.project_id())
                .or_default()
                .extend(write.call_ids());
        }
        for (project_id, mut ids) in touched {
            ids.sort();
            ids.dedup();
            calls_repository::materialize(conn, project_id, &ids)?;
        }
        Ok(deleted)
    })
}

// ============================================================================
// Derived fields
// ============================================================================

/// Fill `summary.weave` with status, latency and trace name
pub fn with_derived_summary(mut call: CallSchema) -> CallSchema {
    let status = if call.exception.is_some() {
        "error"
    } else if call.ended_at.is_none() {
        "running"
    } else {
        "success"
    };
    let latency_ms = call
        .ended_at
        .map(|ended| (ended - call.started_at).num_milliseconds());
    let trace_name = call
        .display_name
        .clone()
        .unwrap_or_else(|| call.op_name.clone());

    set_weave_field(&mut call.summary, "status", status.into());
    if let Some(latency_ms) = latency_ms {
        set_weave_field(&mut call.summary, "latency_ms", latency_ms.into());
    }
    set_weave_field(&mut call.summary, "trace_name", trace_name.into());
    call
}

/// Set `summary.weave.<key>`, replacing anything in the way that is not an object
fn set_weave_field(summary: &mut JsonValue, key: &str, value: JsonValue) {
    if !summary.is_object() {
        *summary = JsonValue::Object(Map::new());
    }
    if let Some(map) = summary.as_object_mut() {
        let weave = map
            .entry("weave")
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !weave.is_object() {
            *weave = JsonValue::Object(Map::new());
        }
        if let Some(weave) = weave.as_object_mut() {
            weave.insert(key.to_string(), value);
        }
    }
}

/// Attach feedback rows under `summary.weave.feedback`, newest first
pub fn attach_feedback(calls: &mut [CallSchema], feedback: Vec<FeedbackSchema>) {
    let mut by_ref: HashMap<String, Vec<JsonValue>> = HashMap::new();
    for row in feedback {
        let weave_ref = row.weave_ref.clone();
        match serde_json::to_value(row) {
            Ok(value) => by_ref.entry(weave_ref).or_default().push(value),
            Err(e) => tracing::warn!(error = %e, "Skipping unserializable feedback row"),
        }
    }
    for call in calls.iter_mut() {
        let rows = by_ref
            .remove(&call_uri(&call.project_id, &call.id))
            .unwrap_or_default();
        set_weave_field(&mut call.summary, "feedback", JsonValue::Array(rows));
    }
}

fn clamp_limit(limit: Option<u64>) -> Option<u64> {
    match limit {
        Some(limit) if limit > CALLS_QUERY_MAX_LIMIT => {
            tracing::debug!(limit, max = CALLS_QUERY_MAX_LIMIT, "Clamping calls query limit");
            Some(CALLS_QUERY_MAX_LIMIT)
        }
        Some(limit) => Some(limit),
        None => Some(CALLS_QUERY_MAX_LIMIT),
    }
}

// ============================================================================
// Operations
// ============================================================================

impl TraceService {
    /// Append call events as one transaction; returns visible calls deleted
    pub(crate) async fn write_calls(&self, writes: Vec<CallWrite>) -> Result<u64, DataError> {
        if writes.is_empty() {
            return Ok(0);
        }

        let count = writes.len();
        let deleted = self
            .duckdb
            .with_conn(move |conn| apply_writes(conn, &writes))
            .await?;
        tracing::debug!(events = count, deleted, "Applied call events");
        Ok(deleted)
    }

    pub(crate) async fn read_call(
        &self,
        req: crate::data::types::CallReadReq,
    ) -> Result<Option<CallSchema>, DataError> {
        let layout = self.router.route(&req.project_id, CallsRead::Read).await?;
        let query = CallsQueryReq {
            filter: Some(CallsFilter {
                call_ids: Some(vec![req.id]),
                ..Default::default()
            }),
            limit: Some(1),
            include_feedback: req.include_feedback,
            ..CallsQueryReq::new(req.project_id)
        };
        Ok(self.calls_page(layout, query).await?.into_iter().next())
    }

    pub(crate) async fn query_calls(
        &self,
        mut req: CallsQueryReq,
    ) -> Result<Vec<CallSchema>, DataError> {
        let layout = self.route_query(&req).await?;
        req.limit = clamp_limit(req.limit);
        self.calls_page(layout, req).await
    }

    /// Page through the selection; the route is fixed before the first page
    pub(crate) async fn stream_calls(
        &self,
        req: CallsQueryReq,
    ) -> Result<RowStream<CallSchema>, DataError> {
        let layout = self.route_query(&req).await?;
        let this = self.clone();

        let stream = async_stream::stream! {
            let mut offset = req.offset.unwrap_or(0);
            let mut remaining = req.limit;
            loop {
                let page_size = remaining.map_or(CALLS_STREAM_PAGE_SIZE, |r| r.min(CALLS_STREAM_PAGE_SIZE));
                if page_size == 0 {
                    break;
                }
                let page_req = CallsQueryReq {
                    limit: Some(page_size),
                    offset: Some(offset),
                    ..req.clone()
                };
                let page = match this.calls_page(layout, page_req).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                let fetched = page.len() as u64;
                for call in page {
                    yield Ok(call);
                }
                if fetched < page_size {
                    break;
                }
                offset += fetched;
                remaining = remaining.map(|r| r - fetched);
            }
        };
        Ok(Box::pin(stream))
    }

    pub(crate) async fn count_calls(&self, req: CallsQueryStatsReq) -> Result<u64, DataError> {
        let read = CallsRead::Stats {
            has_expression: req.query.is_some(),
        };
        let layout = self.router.route(&req.project_id, read).await?;
        self.duckdb
            .with_conn(move |conn| {
                let selection = calls_repository::CallsSelection {
                    project_id: &req.project_id,
                    filter: req.filter.as_ref(),
                    query: req.query.as_ref(),
                };
                calls_repository::count_calls(conn, layout, &selection, req.limit)
            })
            .await
    }

    pub(crate) async fn query_threads(
        &self,
        req: ThreadsQueryReq,
    ) -> Result<Vec<ThreadSchema>, DataError> {
        if let Some(filter) = &req.filter
            && let (Some(after), Some(before)) = (filter.after_date, filter.before_date)
            && after >= before
        {
            return Err(DataError::validation(format!(
                "after_date ({}) must be earlier than before_date ({})",
                after, before
            )));
        }
        self.router
            .route(&req.project_id, CallsRead::Threads)
            .await?;
        self.duckdb
            .with_conn(move |conn| {
                calls_repository::query_threads(
                    conn,
                    &req.project_id,
                    req.filter.as_ref(),
                    req.limit,
                    req.offset,
                )
            })
            .await
    }

    pub(crate) async fn stats(&self, project_id: String) -> Result<ProjectStatsRes, DataError> {
        let layout = self
            .router
            .route(&project_id, CallsRead::ProjectStats)
            .await?;
        self.duckdb
            .with_conn(move |conn| stats_repository::get_project_stats(conn, layout, &project_id))
            .await
    }

    async fn route_query(&self, req: &CallsQueryReq) -> Result<CallsLayout, DataError> {
        let read = CallsRead::Query {
            include_feedback: req.include_feedback,
        };
        self.router.route(&req.project_id, read).await
    }

    /// One page of reconciled calls with derived fields (and feedback)
    async fn calls_page(
        &self,
        layout: CallsLayout,
        req: CallsQueryReq,
    ) -> Result<Vec<CallSchema>, DataError> {
        self.duckdb
            .with_conn(move |conn| {
                let selection = calls_repository::CallsSelection {
                    project_id: &req.project_id,
                    filter: req.filter.as_ref(),
                    query: req.query.as_ref(),
                };
                let calls = calls_repository::query_calls(
                    conn,
                    layout,
                    &selection,
                    req.sort_by.as_deref(),
                    req.limit,
                    req.offset,
                )?;
                let mut calls: Vec<CallSchema> =
                    calls.into_iter().map(with_derived_summary).collect();

                if req.include_feedback && !calls.is_empty() {
                    let refs: Vec<String> = calls
                        .iter()
                        .map(|c| call_uri(&c.project_id, &c.id))
                        .collect();
                    let feedback =
                        feedback_repository::feedback_for_refs(conn, &req.project_id, &refs)?;
                    attach_feedback(&mut calls, feedback);
                }
                Ok(calls)
            })
            .await
    }
}
