//! Bridge client
//!
//! Many requests may be in flight at once and the worker answers them in
//! completion order. Whoever holds the response queue reads the next frame;
//! frames addressed to another request are stashed by id and picked up by
//! their owner on its next poll. Only frames for requests still in flight are
//! stashed; a request leaves the in-flight set when its caller is done with
//! it, so late frames after a timeout are dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};

use super::error::BridgeError;
use super::message::{
    BridgeRequest, BridgeResponse, ClientFrame, RequestId, ResponseBody, decode, encode, methods,
};
use crate::core::config::{BridgeConfig, TablesConfig};
use crate::data::error::DataError;
use crate::data::traits::{RowStream, TraceServer};
use crate::data::types::{
    CallBatchReq, CallBatchRes, CallEndReq, CallEndRes, CallReadReq, CallReadRes, CallSchema,
    CallStartReq, CallStartRes, CallUpdateReq, CallUpdateRes, CallsDeleteReq, CallsDeleteRes,
    CallsQueryReq, CallsQueryRes, CallsQueryStatsReq, CallsQueryStatsRes, FeedbackCreateReq,
    FeedbackCreateRes, FeedbackPurgeReq, FeedbackPurgeRes, FeedbackQueryReq, FeedbackQueryRes,
    FeedbackReplaceReq, FeedbackReplaceRes, FileContentReadReq, FileContentReadRes, FileCreateReq,
    FileCreateRes, ObjCreateReq, ObjCreateRes, ObjDeleteReq, ObjDeleteRes, ObjQueryReq,
    ObjQueryRes, ObjReadReq, ObjReadRes, ProjectStatsReq, ProjectStatsRes, RefsReadBatchReq,
    RefsReadBatchRes, TableCreateFromDigestsReq, TableCreateFromDigestsRes, TableCreateReq,
    TableCreateRes, TableQueryReq, TableQueryRes, TableQueryStatsReq, TableQueryStatsRes,
    TableRowSchema, TableSchemaForInsert, TableUpdateReq, TableUpdateRes, ThreadsQueryReq,
    ThreadsQueryRes,
};
use crate::domain::tables::{split_into_chunks, upload_chunks};

struct ClientInner {
    requests: mpsc::Sender<Vec<u8>>,
    responses: Mutex<mpsc::Receiver<Vec<u8>>>,
    stash: DashMap<RequestId, VecDeque<ResponseBody>>,
    /// Requests whose caller still waits for frames
    in_flight: DashSet<RequestId>,
    next_id: AtomicU64,
    timeout: Duration,
    stream_poll: Duration,
}

impl ClientInner {
    /// Register the request as in flight, then send it
    async fn send(
        self: &Arc<Self>,
        method: &'static str,
        payload: Vec<u8>,
    ) -> Result<Pending, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode(&ClientFrame::Request(BridgeRequest {
            id,
            method: method.to_string(),
            payload,
        }))?;
        self.in_flight.insert(id);
        let pending = Pending {
            inner: Arc::clone(self),
            id,
        };
        self.requests
            .send(frame)
            .await
            .map_err(|_| BridgeError::Closed)?;
        tracing::trace!(id, method, "Bridge request sent");
        Ok(pending)
    }

    fn take_stashed(&self, id: RequestId) -> Option<ResponseBody> {
        let mut queue = self.stash.get_mut(&id)?;
        let body = queue.pop_front();
        let empty = queue.is_empty();
        drop(queue);
        if empty {
            self.stash.remove_if(&id, |_, q| q.is_empty());
        }
        body
    }

    fn stash(&self, response: BridgeResponse) {
        let id = response.id;
        if !self.in_flight.contains(&id) {
            tracing::trace!(id, "Dropping frame for finished request");
            return;
        }
        self.stash.entry(id).or_default().push_back(response.body);
        // The owner may have finished between the check and the push
        if !self.in_flight.contains(&id) {
            self.stash.remove(&id);
        }
    }

    /// Forget a request; frames still to come for it are dropped
    fn finish(&self, id: RequestId) {
        self.in_flight.remove(&id);
        self.stash.remove(&id);
    }

    async fn recv_for(&self, id: RequestId) -> Result<ResponseBody, BridgeError> {
        loop {
            if let Some(body) = self.take_stashed(id) {
                return Ok(body);
            }
            let mut rx = self.responses.lock().await;
            // Another waiter may have stashed our frame while we queued for the lock
            if let Some(body) = self.take_stashed(id) {
                return Ok(body);
            }
            let bytes = rx.recv().await.ok_or(BridgeError::Closed)?;
            drop(rx);
            let response: BridgeResponse = decode(&bytes)?;
            if response.id == id {
                return Ok(response.body);
            }
            self.stash(response);
        }
    }

    async fn next_body(
        &self,
        id: RequestId,
        method: &'static str,
        wait: Duration,
    ) -> Result<ResponseBody, BridgeError> {
        tokio::time::timeout(wait, self.recv_for(id))
            .await
            .map_err(|_| BridgeError::Timeout {
                method,
                timeout_secs: wait.as_secs(),
            })?
    }
}

/// Keeps a request in flight until its caller is done with it
struct Pending {
    inner: Arc<ClientInner>,
    id: RequestId,
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.inner.finish(self.id);
    }
}

/// [`TraceServer`] that forwards every operation over the bridge queues
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
    tables: TablesConfig,
}

impl BridgeClient {
    pub fn new(
        requests: mpsc::Sender<Vec<u8>>,
        responses: mpsc::Receiver<Vec<u8>>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                requests,
                responses: Mutex::new(responses),
                stash: DashMap::new(),
                in_flight: DashSet::new(),
                next_id: AtomicU64::new(1),
                timeout: Duration::from_secs(config.timeout_secs),
                stream_poll: Duration::from_secs(config.stream_poll_secs),
            }),
            tables: TablesConfig::default(),
        }
    }

    /// Chunking applied to `table_create` before rows cross the bridge
    pub fn with_tables(mut self, tables: &TablesConfig) -> Self {
        self.tables = tables.clone();
        self
    }

    /// Ask the worker loop to exit
    pub async fn stop(&self) -> Result<(), DataError> {
        let frame = encode(&ClientFrame::Stop)?;
        self.inner
            .requests
            .send(frame)
            .await
            .map_err(|_| BridgeError::Closed)?;
        tracing::debug!("Bridge stop sent");
        Ok(())
    }

    /// Frames received for requests nobody has claimed yet
    pub fn stashed(&self) -> usize {
        self.inner.stash.iter().map(|q| q.len()).sum()
    }

    /// Requests still waiting for frames
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    async fn call<Req, Res>(&self, method: &'static str, req: &Req) -> Result<Res, DataError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let pending = self.inner.send(method, encode(req)?).await?;
        let body = self
            .inner
            .next_body(pending.id, method, self.inner.timeout)
            .await?;
        drop(pending);
        match body {
            ResponseBody::Value(bytes) => Ok(decode(&bytes)?),
            ResponseBody::Error(e) => Err(e.into()),
            other => Err(BridgeError::UnexpectedResponse {
                method,
                got: other.kind(),
            }
            .into()),
        }
    }

    /// Opens a stream; an error before the first row is returned directly
    async fn stream<Req, Row>(
        &self,
        method: &'static str,
        req: &Req,
    ) -> Result<RowStream<Row>, DataError>
    where
        Req: Serialize,
        Row: DeserializeOwned + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let pending = inner.send(method, encode(req)?).await?;
        let id = pending.id;
        let first = inner.next_body(id, method, inner.stream_poll).await?;
        if let ResponseBody::Error(e) = first {
            return Err(e.into());
        }

        Ok(Box::pin(async_stream::stream! {
            let _pending = pending;
            let mut next = Some(first);
            loop {
                let body = match next.take() {
                    Some(body) => body,
                    None => match inner.next_body(id, method, inner.stream_poll).await {
                        Ok(body) => body,
                        Err(e) => {
                            yield Err(e.into());
                            break;
                        }
                    },
                };
                match body {
                    ResponseBody::Item(bytes) => match decode::<Row>(&bytes) {
                        Ok(row) => yield Ok(row),
                        Err(e) => {
                            yield Err(e.into());
                            break;
                        }
                    },
                    ResponseBody::StreamEnd => break,
                    ResponseBody::Error(e) => {
                        yield Err(e.into());
                        break;
                    }
                    other @ ResponseBody::Value(_) => {
                        yield Err(BridgeError::UnexpectedResponse {
                            method,
                            got: other.kind(),
                        }
                        .into());
                        break;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl TraceServer for BridgeClient {
    async fn call_start(&self, req: CallStartReq) -> Result<CallStartRes, DataError> {
        self.call(methods::CALL_START, &req).await
    }

    async fn call_end(&self, req: CallEndReq) -> Result<CallEndRes, DataError> {
        self.call(methods::CALL_END, &req).await
    }

    async fn call_batch(&self, req: CallBatchReq) -> Result<CallBatchRes, DataError> {
        self.call(methods::CALL_BATCH, &req).await
    }

    async fn call_read(&self, req: CallReadReq) -> Result<CallReadRes, DataError> {
        self.call(methods::CALL_READ, &req).await
    }

    async fn calls_query(&self, req: CallsQueryReq) -> Result<CallsQueryRes, DataError> {
        self.call(methods::CALLS_QUERY, &req).await
    }

    async fn calls_query_stream(
        &self,
        req: CallsQueryReq,
    ) -> Result<RowStream<CallSchema>, DataError> {
        self.stream(methods::CALLS_QUERY_STREAM, &req).await
    }

    async fn calls_query_stats(
        &self,
        req: CallsQueryStatsReq,
    ) -> Result<CallsQueryStatsRes, DataError> {
        self.call(methods::CALLS_QUERY_STATS, &req).await
    }

    async fn calls_delete(&self, req: CallsDeleteReq) -> Result<CallsDeleteRes, DataError> {
        self.call(methods::CALLS_DELETE, &req).await
    }

    async fn call_update(&self, req: CallUpdateReq) -> Result<CallUpdateRes, DataError> {
        self.call(methods::CALL_UPDATE, &req).await
    }

    async fn threads_query(&self, req: ThreadsQueryReq) -> Result<ThreadsQueryRes, DataError> {
        self.call(methods::THREADS_QUERY, &req).await
    }

    async fn project_stats(&self, req: ProjectStatsReq) -> Result<ProjectStatsRes, DataError> {
        self.call(methods::PROJECT_STATS, &req).await
    }

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, DataError> {
        self.call(methods::OBJ_CREATE, &req).await
    }

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, DataError> {
        self.call(methods::OBJ_READ, &req).await
    }

    async fn objs_query(&self, req: ObjQueryReq) -> Result<ObjQueryRes, DataError> {
        self.call(methods::OBJS_QUERY, &req).await
    }

    async fn obj_delete(&self, req: ObjDeleteReq) -> Result<ObjDeleteRes, DataError> {
        self.call(methods::OBJ_DELETE, &req).await
    }

    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, DataError> {
        let TableSchemaForInsert { project_id, rows } = req.table;
        let mut chunks = split_into_chunks(rows, self.tables.chunk_target_bytes);
        if chunks.len() > 1 {
            return upload_chunks(self, &project_id, chunks, self.tables.max_concurrency).await;
        }
        let req = TableCreateReq {
            table: TableSchemaForInsert {
                project_id,
                rows: chunks.pop().unwrap_or_default(),
            },
        };
        self.call(methods::TABLE_CREATE, &req).await
    }

    async fn table_create_from_digests(
        &self,
        req: TableCreateFromDigestsReq,
    ) -> Result<TableCreateFromDigestsRes, DataError> {
        self.call(methods::TABLE_CREATE_FROM_DIGESTS, &req).await
    }

    async fn table_update(&self, req: TableUpdateReq) -> Result<TableUpdateRes, DataError> {
        self.call(methods::TABLE_UPDATE, &req).await
    }

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, DataError> {
        self.call(methods::TABLE_QUERY, &req).await
    }

    async fn table_query_stream(
        &self,
        req: TableQueryReq,
    ) -> Result<RowStream<TableRowSchema>, DataError> {
        self.stream(methods::TABLE_QUERY_STREAM, &req).await
    }

    async fn table_query_stats(
        &self,
        req: TableQueryStatsReq,
    ) -> Result<TableQueryStatsRes, DataError> {
        self.call(methods::TABLE_QUERY_STATS, &req).await
    }

    async fn refs_read_batch(&self, req: RefsReadBatchReq) -> Result<RefsReadBatchRes, DataError> {
        self.call(methods::REFS_READ_BATCH, &req).await
    }

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, DataError> {
        self.call(methods::FILE_CREATE, &req).await
    }

    async fn file_content_read(
        &self,
        req: FileContentReadReq,
    ) -> Result<FileContentReadRes, DataError> {
        self.call(methods::FILE_CONTENT_READ, &req).await
    }

    async fn feedback_create(
        &self,
        req: FeedbackCreateReq,
    ) -> Result<FeedbackCreateRes, DataError> {
        self.call(methods::FEEDBACK_CREATE, &req).await
    }

    async fn feedback_query(&self, req: FeedbackQueryReq) -> Result<FeedbackQueryRes, DataError> {
        self.call(methods::FEEDBACK_QUERY, &req).await
    }

    async fn feedback_purge(&self, req: FeedbackPurgeReq) -> Result<FeedbackPurgeRes, DataError> {
        self.call(methods::FEEDBACK_PURGE, &req).await
    }

    async fn feedback_replace(
        &self,
        req: FeedbackReplaceReq,
    ) -> Result<FeedbackReplaceRes, DataError> {
        self.call(methods::FEEDBACK_REPLACE, &req).await
    }
}
