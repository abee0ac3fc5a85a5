//! Trace server protocol
//!
//! One async method per entity-action pair. Every implementation speaks the
//! same request/response types, so decorators (caching, sidecar) and remote
//! delegates (bridge) can be stacked over the DuckDB-backed service without
//! callers noticing.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::data::error::DataError;
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
    TableRowSchema, TableUpdateReq, TableUpdateRes, ThreadsQueryReq, ThreadsQueryRes,
};

/// Forward-only, non-restartable sequence of rows
///
/// Ends at end-of-stream or after yielding the first error.
pub type RowStream<T> = BoxStream<'static, Result<T, DataError>>;

#[async_trait]
pub trait TraceServer: Send + Sync {
    // ==================== Calls ====================

    async fn call_start(&self, req: CallStartReq) -> Result<CallStartRes, DataError>;

    async fn call_end(&self, req: CallEndReq) -> Result<CallEndRes, DataError>;

    /// Apply starts and ends in order as one unit
    async fn call_batch(&self, req: CallBatchReq) -> Result<CallBatchRes, DataError>;

    async fn call_read(&self, req: CallReadReq) -> Result<CallReadRes, DataError>;

    async fn calls_query(&self, req: CallsQueryReq) -> Result<CallsQueryRes, DataError>;

    /// Same selection as `calls_query`, delivered page by page
    async fn calls_query_stream(
        &self,
        req: CallsQueryReq,
    ) -> Result<RowStream<CallSchema>, DataError>;

    async fn calls_query_stats(
        &self,
        req: CallsQueryStatsReq,
    ) -> Result<CallsQueryStatsRes, DataError>;

    async fn calls_delete(&self, req: CallsDeleteReq) -> Result<CallsDeleteRes, DataError>;

    async fn call_update(&self, req: CallUpdateReq) -> Result<CallUpdateRes, DataError>;

    async fn threads_query(&self, req: ThreadsQueryReq) -> Result<ThreadsQueryRes, DataError>;

    async fn project_stats(&self, req: ProjectStatsReq) -> Result<ProjectStatsRes, DataError>;

    // ==================== Objects ====================

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, DataError>;

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, DataError>;

    async fn objs_query(&self, req: ObjQueryReq) -> Result<ObjQueryRes, DataError>;

    async fn obj_delete(&self, req: ObjDeleteReq) -> Result<ObjDeleteRes, DataError>;

    // ==================== Tables ====================

    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, DataError>;

    async fn table_create_from_digests(
        &self,
        req: TableCreateFromDigestsReq,
    ) -> Result<TableCreateFromDigestsRes, DataError>;

    async fn table_update(&self, req: TableUpdateReq) -> Result<TableUpdateRes, DataError>;

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, DataError>;

    async fn table_query_stream(
        &self,
        req: TableQueryReq,
    ) -> Result<RowStream<TableRowSchema>, DataError>;

    async fn table_query_stats(
        &self,
        req: TableQueryStatsReq,
    ) -> Result<TableQueryStatsRes, DataError>;

    // ==================== Refs ====================

    async fn refs_read_batch(&self, req: RefsReadBatchReq) -> Result<RefsReadBatchRes, DataError>;

    // ==================== Files ====================

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, DataError>;

    async fn file_content_read(
        &self,
        req: FileContentReadReq,
    ) -> Result<FileContentReadRes, DataError>;

    // ==================== Feedback ====================

    async fn feedback_create(&self, req: FeedbackCreateReq)
    -> Result<FeedbackCreateRes, DataError>;

    async fn feedback_query(&self, req: FeedbackQueryReq) -> Result<FeedbackQueryRes, DataError>;

    async fn feedback_purge(&self, req: FeedbackPurgeReq) -> Result<FeedbackPurgeRes, DataError>;

    async fn feedback_replace(
        &self,
        req: FeedbackReplaceReq,
    ) -> Result<FeedbackReplaceRes, DataError>;
}
