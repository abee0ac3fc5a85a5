use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use super::protocol::{
    FrameId, SidecarError, SidecarFrame, SidecarOutcome, SidecarReply, decode_line, encode_line,
};
use crate::data::error::DataError;
use crate::data::traits::{RowStream, TraceServer};
use crate::data::types::{
    CallBatchItem, CallBatchItemRes, CallBatchReq, CallBatchRes, CallEndReq, CallEndRes,
    CallReadReq, CallReadRes, CallSchema, CallStartReq, CallStartRes, CallUpdateReq,
    CallUpdateRes, CallsDeleteReq, CallsDeleteRes, CallsQueryReq, CallsQueryRes,
    CallsQueryStatsReq, CallsQueryStatsRes, FeedbackCreateReq, FeedbackCreateRes,
    FeedbackPurgeReq, FeedbackPurgeRes, FeedbackQueryReq, FeedbackQueryRes, FeedbackReplaceReq,
    FeedbackReplaceRes, FileContentReadReq, FileContentReadRes, FileCreateReq, FileCreateRes,
    ObjCreateReq, ObjCreateRes, ObjDeleteReq, ObjDeleteRes, ObjQueryReq, ObjQueryRes, ObjReadReq,
    ObjReadRes, ProjectStatsReq, ProjectStatsRes, RefsReadBatchReq, RefsReadBatchRes,
    TableCreateFromDigestsReq, TableCreateFromDigestsRes, TableCreateReq, TableCreateRes,
    TableQueryReq, TableQueryRes, TableQueryStatsReq, TableQueryStatsRes, TableRowSchema,
    TableUpdateReq, TableUpdateRes, ThreadsQueryReq, ThreadsQueryRes,
};
use crate::domain::calls::generate_id;

type Waiters = DashMap<FrameId, oneshot::Sender<SidecarOutcome>>;

/// One open socket with its reply reader
struct Connection {
    writer: Mutex<OwnedWriteHalf>,
    waiters: Arc<Waiters>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl Connection {
    fn open(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let waiters = Arc::new(Waiters::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_replies(
            read_half,
            Arc::clone(&waiters),
            Arc::clone(&closed),
        ));
        Self {
            writer: Mutex::new(write_half),
            waiters,
            closed,
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request(
        &self,
        call: CallBatchItem,
        timeout: Duration,
    ) -> Result<SidecarOutcome, SidecarError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = encode_line(&SidecarFrame { id, call })?;

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        // The reader marks itself closed before dropping its waiters
        if self.is_closed() {
            self.waiters.remove(&id);
            return Err(SidecarError::Disconnected);
        }

        if let Err(e) = self.writer.lock().await.write_all(&line).await {
            self.waiters.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(SidecarError::Disconnected),
            Err(_) => {
                self.waiters.remove(&id);
                Err(SidecarError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies(read_half: OwnedReadHalf, waiters: Arc<Waiters>, closed: Arc<AtomicBool>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match decode_line::<SidecarReply>(&line) {
                Ok(reply) => {
                    if let Some((_, waiter)) = waiters.remove(&reply.id) {
                        let _ = waiter.send(reply.outcome);
                    } else {
                        tracing::trace!(id = reply.id, "Sidecar reply without a waiter");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Malformed sidecar reply"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Sidecar reply stream failed");
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    waiters.clear();
}

/// [`TraceServer`] that hands call starts and ends to a sidecar listener
///
/// Every other operation goes straight to `direct`. When the socket cannot
/// be reached or drops mid-request, the connection is torn down, the write
/// is applied directly once, and the sidecar is not tried again for the life
/// of this client.
pub struct SidecarClient {
    direct: Arc<dyn TraceServer>,
    socket_path: PathBuf,
    reply_timeout: Duration,
    conn: Mutex<Option<Arc<Connection>>>,
    unavailable: AtomicBool,
}

impl SidecarClient {
    pub fn new(direct: Arc<dyn TraceServer>, socket_path: PathBuf, reply_timeout: Duration) -> Self {
        Self {
            direct,
            socket_path,
            reply_timeout,
            conn: Mutex::new(None),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether the client has given up on the sidecar
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Relaxed)
    }

    async fn connection(&self) -> Result<Arc<Connection>, SidecarError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref()
            && !conn.is_closed()
        {
            return Ok(Arc::clone(conn));
        }
        let stream = UnixStream::connect(&self.socket_path).await?;
        let conn = Arc::new(Connection::open(stream));
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }

    async fn teardown(&self, failed: &Arc<Connection>) {
        let mut guard = self.conn.lock().await;
        if guard.as_ref().is_some_and(|c| Arc::ptr_eq(c, failed)) {
            *guard = None;
        }
    }

    fn mark_unavailable(&self, error: &SidecarError) {
        if !self.unavailable.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                path = %self.socket_path.display(),
                error = %error,
                "Sidecar unavailable, writing calls directly"
            );
        }
    }

    /// `None` means the transport failed and the caller should write directly
    async fn forward(&self, call: CallBatchItem) -> Option<Result<CallBatchItemRes, DataError>> {
        if self.is_unavailable() {
            return None;
        }
        let conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                self.mark_unavailable(&e);
                return None;
            }
        };
        match conn.request(call, self.reply_timeout).await {
            Ok(SidecarOutcome::Ok(res)) => Some(Ok(res)),
            Ok(SidecarOutcome::Error(remote)) => Some(Err(remote.into())),
            Err(e) => {
                self.teardown(&conn).await;
                self.mark_unavailable(&e);
                None
            }
        }
    }
}

fn mismatched(expected: &str) -> DataError {
    DataError::Remote(format!("sidecar answered a {} with the wrong result kind", expected))
}

#[async_trait]
impl TraceServer for SidecarClient {
    // ==================== Calls ====================

    async fn call_start(&self, mut req: CallStartReq) -> Result<CallStartRes, DataError> {
        // Fixed ids keep a direct retry from minting a second call
        if req.start.id.is_none() {
            req.start.id = Some(generate_id());
        }
        if req.start.trace_id.is_none() {
            req.start.trace_id = Some(generate_id());
        }
        match self.forward(CallBatchItem::Start(req.clone())).await {
            Some(Ok(CallBatchItemRes::Start(res))) => Ok(res),
            Some(Ok(CallBatchItemRes::End(_))) => Err(mismatched("call start")),
            Some(Err(e)) => Err(e),
            None => self.direct.call_start(req).await,
        }
    }

    async fn call_end(&self, req: CallEndReq) -> Result<CallEndRes, DataError> {
        match self.forward(CallBatchItem::End(req.clone())).await {
            Some(Ok(CallBatchItemRes::End(res))) => Ok(res),
            Some(Ok(CallBatchItemRes::Start(_))) => Err(mismatched("call end")),
            Some(Err(e)) => Err(e),
            None => self.direct.call_end(req).await,
        }
    }

    async fn call_batch(&self, req: CallBatchReq) -> Result<CallBatchRes, DataError> {
        self.direct.call_batch(req).await
    }

    async fn call_read(&self, req: CallReadReq) -> Result<CallReadRes, DataError> {
        self.direct.call_read(req).await
    }

    async fn calls_query(&self, req: CallsQueryReq) -> Result<CallsQueryRes, DataError> {
        self.direct.calls_query(req).await
    }

    async fn calls_query_stream(
        &self,
        req: CallsQueryReq,
    ) -> Result<RowStream<CallSchema>, DataError> {
        self.direct.calls_query_stream(req).await
    }

    async fn calls_query_stats(
        &self,
        req: CallsQueryStatsReq,
    ) -> Result<CallsQueryStatsRes, DataError> {
        self.direct.calls_query_stats(req).await
    }

    async fn calls_delete(&self, req: CallsDeleteReq) -> Result<CallsDeleteRes, DataError> {
        self.direct.calls_delete(req).await
    }

    async fn call_update(&self, req: CallUpdateReq) -> Result<CallUpdateRes, DataError> {
        self.direct.call_update(req).await
    }

    async fn threads_query(&self, req: ThreadsQueryReq) -> Result<ThreadsQueryRes, DataError> {
        self.direct.threads_query(req).await
    }

    async fn project_stats(&self, req: ProjectStatsReq) -> Result<ProjectStatsRes, DataError> {
        self.direct.project_stats(req).await
    }

    // ==================== Objects ====================

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, DataError> {
        self.direct.obj_create(req).await
    }

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, DataError> {
        self.direct.obj_read(req).await
    }

    async fn objs_query(&self, req: ObjQueryReq) -> Result<ObjQueryRes, DataError> {
        self.direct.objs_query(req).await
    }

    async fn obj_delete(&self, req: ObjDeleteReq) -> Result<ObjDeleteRes, DataError> {
        self.direct.obj_delete(req).await
    }

    // ==================== Tables ====================

    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, DataError> {
        self.direct.table_create(req).await
    }

    async fn table_create_from_digests(
        &self,
        req: TableCreateFromDigestsReq,
    ) -> Result<TableCreateFromDigestsRes, DataError> {
        self.direct.table_create_from_digests(req).await
    }

    async fn table_update(&self, req: TableUpdateReq) -> Result<TableUpdateRes, DataError> {
        self.direct.table_update(req).await
    }

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, DataError> {
        self.direct.table_query(req).await
    }

    async fn table_query_stream(
        &self,
        req: TableQueryReq,
    ) -> Result<RowStream<TableRowSchema>, DataError> {
        self.direct.table_query_stream(req).await
    }

    async fn table_query_stats(
        &self,
        req: TableQueryStatsReq,
    ) -> Result<TableQueryStatsRes, DataError> {
        self.direct.table_query_stats(req).await
    }

    // ==================== Refs ====================

    async fn refs_read_batch(&self, req: RefsReadBatchReq) -> Result<RefsReadBatchRes, DataError> {
        self.direct.refs_read_batch(req).await
    }

    // ==================== Files ====================

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, DataError> {
        self.direct.file_create(req).await
    }

    async fn file_content_read(
        &self,
        req: FileContentReadReq,
    ) -> Result<FileContentReadRes, DataError> {
        self.direct.file_content_read(req).await
    }

    // ==================== Feedback ====================

    async fn feedback_create(
        &self,
        req: FeedbackCreateReq,
    ) -> Result<FeedbackCreateRes, DataError> {
        self.direct.feedback_create(req).await
    }

    async fn feedback_query(&self, req: FeedbackQueryReq) -> Result<FeedbackQueryRes, DataError> {
        self.direct.feedback_query(req).await
    }

    async fn feedback_purge(&self, req: FeedbackPurgeReq) -> Result<FeedbackPurgeRes, DataError> {
        self.direct.feedback_purge(req).await
    }

    async fn feedback_replace(
        &self,
        req: FeedbackReplaceReq,
    ) -> Result<FeedbackReplaceRes, DataError> {
        self.direct.feedback_replace(req).await
    }
}
