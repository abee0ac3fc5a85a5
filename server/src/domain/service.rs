//! DuckDB-backed trace server
//!
//! `TraceService` is the explicit context every operation runs against: the
//! DuckDB handle, the file service and the storage router. Operation bodies
//! live next to their domain (`calls`, `objects`, `tables`, `feedback`);
//! this module wires them to the [`TraceServer`] protocol.

use std::sync::Arc;

use async_trait::async_trait;

use crate::data::DuckdbService;
use crate::data::error::DataError;
use crate::data::files::FileService;
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
use crate::domain::calls::CallWrite;
use crate::domain::router::StorageRouter;

/// Trace server over the embedded store
#[derive(Clone)]
pub struct TraceService {
    pub(crate) duckdb: Arc<DuckdbService>,
    pub(crate) files: Arc<FileService>,
    pub(crate) router: Arc<StorageRouter>,
}

impl TraceService {
    pub fn new(
        duckdb: Arc<DuckdbService>,
        files: Arc<FileService>,
        router: Arc<StorageRouter>,
    ) -> Self {
        Self {
            duckdb,
            files,
            router,
        }
    }
}

#[async_trait]
impl TraceServer for TraceService {
    // ==================== Calls ====================

    async fn call_start(&self, req: CallStartReq) -> Result<CallStartRes, DataError> {
        let (write, res) = CallWrite::start(req.start)?;
        self.write_calls(vec![write]).await?;
        Ok(res)
    }

    async fn call_end(&self, req: CallEndReq) -> Result<CallEndRes, DataError> {
        self.write_calls(vec![CallWrite::end(req.end)?]).await?;
        Ok(CallEndRes {})
    }

    async fn call_batch(&self, req: CallBatchReq) -> Result<CallBatchRes, DataError> {
        let mut writes = Vec::with_capacity(req.batch.len());
        let mut res = Vec::with_capacity(req.batch.len());
        for item in req.batch {
            match item {
                CallBatchItem::Start(start) => {
                    let (write, started) = CallWrite::start(start.start)?;
                    writes.push(write);
                    res.push(CallBatchItemRes::Start(started));
                }
                CallBatchItem::End(end) => {
                    writes.push(CallWrite::end(end.end)?);
                    res.push(CallBatchItemRes::End(CallEndRes {}));
                }
            }
        }
        self.write_calls(writes).await?;
        Ok(CallBatchRes { res })
    }

    async fn call_read(&self, req: CallReadReq) -> Result<CallReadRes, DataError> {
        let call = self.read_call(req).await?;
        Ok(CallReadRes { call })
    }

    async fn calls_query(&self, req: CallsQueryReq) -> Result<CallsQueryRes, DataError> {
        let calls = self.query_calls(req).await?;
        Ok(CallsQueryRes { calls })
    }

    async fn calls_query_stream(
        &self,
        req: CallsQueryReq,
    ) -> Result<RowStream<CallSchema>, DataError> {
        self.stream_calls(req).await
    }

    async fn calls_query_stats(
        &self,
        req: CallsQueryStatsReq,
    ) -> Result<CallsQueryStatsRes, DataError> {
        let count = self.count_calls(req).await?;
        Ok(CallsQueryStatsRes { count })
    }

    async fn calls_delete(&self, req: CallsDeleteReq) -> Result<CallsDeleteRes, DataError> {
        let num_deleted = self.write_calls(vec![CallWrite::delete(req)?]).await?;
        Ok(CallsDeleteRes { num_deleted })
    }

    async fn call_update(&self, req: CallUpdateReq) -> Result<CallUpdateRes, DataError> {
        self.write_calls(vec![CallWrite::update(req)?]).await?;
        Ok(CallUpdateRes {})
    }

    async fn threads_query(&self, req: ThreadsQueryReq) -> Result<ThreadsQueryRes, DataError> {
        let threads = self.query_threads(req).await?;
        Ok(ThreadsQueryRes { threads })
    }

    async fn project_stats(&self, req: ProjectStatsReq) -> Result<ProjectStatsRes, DataError> {
        self.stats(req.project_id).await
    }

    // ==================== Objects ====================

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, DataError> {
        let digest = self.create_object(req.obj).await?;
        Ok(ObjCreateRes { digest })
    }

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, DataError> {
        let obj = self.read_object(req).await?;
        Ok(ObjReadRes { obj })
    }

    async fn objs_query(&self, req: ObjQueryReq) -> Result<ObjQueryRes, DataError> {
        let objs = self.query_objects(req).await?;
        Ok(ObjQueryRes { objs })
    }

    async fn obj_delete(&self, req: ObjDeleteReq) -> Result<ObjDeleteRes, DataError> {
        let num_deleted = self.delete_objects(req).await?;
        Ok(ObjDeleteRes { num_deleted })
    }

    // ==================== Tables ====================

    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, DataError> {
        self.create_table(req.table.project_id, req.table.rows).await
    }

    async fn table_create_from_digests(
        &self,
        req: TableCreateFromDigestsReq,
    ) -> Result<TableCreateFromDigestsRes, DataError> {
        let digest = self
            .create_table_from_digests(req.project_id, req.row_digests)
            .await?;
        Ok(TableCreateFromDigestsRes { digest })
    }

    async fn table_update(&self, req: TableUpdateReq) -> Result<TableUpdateRes, DataError> {
        self.update_table(req).await
    }

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, DataError> {
        let rows = self.query_table(req).await?;
        Ok(TableQueryRes { rows })
    }

    async fn table_query_stream(
        &self,
        req: TableQueryReq,
    ) -> Result<RowStream<TableRowSchema>, DataError> {
        self.stream_table(req).await
    }

    async fn table_query_stats(
        &self,
        req: TableQueryStatsReq,
    ) -> Result<TableQueryStatsRes, DataError> {
        let count = self.count_table_rows(req.project_id, req.digest).await?;
        Ok(TableQueryStatsRes { count })
    }

    // ==================== Refs ====================

    async fn refs_read_batch(&self, req: RefsReadBatchReq) -> Result<RefsReadBatchRes, DataError> {
        let mut vals = Vec::with_capacity(req.refs.len());
        let mut stable = Vec::with_capacity(req.refs.len());
        for uri in &req.refs {
            let resolved = self.resolve_ref(uri).await?;
            vals.push(resolved.val);
            stable.push(resolved.stable);
        }
        Ok(RefsReadBatchRes { vals, stable })
    }

    // ==================== Files ====================

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, DataError> {
        let digest = self
            .files
            .create(&req.project_id, &req.name, &req.content)
            .await?;
        Ok(FileCreateRes { digest })
    }

    async fn file_content_read(
        &self,
        req: FileContentReadReq,
    ) -> Result<FileContentReadRes, DataError> {
        let content = self.files.read(&req.project_id, &req.digest).await?;
        Ok(FileContentReadRes { content })
    }

    // ==================== Feedback ====================

    async fn feedback_create(
        &self,
        req: FeedbackCreateReq,
    ) -> Result<FeedbackCreateRes, DataError> {
        self.create_feedback(req).await
    }

    async fn feedback_query(&self, req: FeedbackQueryReq) -> Result<FeedbackQueryRes, DataError> {
        let result = self.query_feedback(req).await?;
        Ok(FeedbackQueryRes { result })
    }

    async fn feedback_purge(&self, req: FeedbackPurgeReq) -> Result<FeedbackPurgeRes, DataError> {
        let num_deleted = self.purge_feedback(req).await?;
        Ok(FeedbackPurgeRes { num_deleted })
    }

    async fn feedback_replace(
        &self,
        req: FeedbackReplaceReq,
    ) -> Result<FeedbackReplaceRes, DataError> {
        self.replace_feedback(req).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::config::{FilesConfig, RouterConfig};
    use crate::core::constants::DEFAULT_FILES_MAX_SIZE_BYTES;
    use crate::core::storage::AppStorage;
    use tempfile::TempDir;

    pub(crate) struct TestEnv {
        pub service: TraceService,
        _temp_dir: TempDir,
    }

    async fn build(router: StorageRouter) -> TestEnv {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(temp_dir.path().join("duckdb"))
            .await
            .unwrap();
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        let duckdb = Arc::new(DuckdbService::init(&storage).await.unwrap());
        let files = FileService::new(
            &FilesConfig {
                path: None,
                max_size_bytes: DEFAULT_FILES_MAX_SIZE_BYTES,
            },
            &storage,
            Arc::clone(&duckdb),
        );
        TestEnv {
            service: TraceService::new(duckdb, Arc::new(files), Arc::new(router)),
            _temp_dir: temp_dir,
        }
    }

    /// Every project on the merged layout
    pub(crate) async fn test_env() -> TestEnv {
        build(StorageRouter::from_config(&RouterConfig::default())).await
    }

    /// `project_id` on the complete layout
    pub(crate) async fn test_env_with_v1(project_id: &str) -> TestEnv {
        let mut router = RouterConfig::default();
        router.projects.insert(project_id.to_string(), 1);
        build(StorageRouter::from_config(&router)).await
    }

    /// Routing decided by a caller-supplied router
    pub(crate) async fn test_env_with_router(router: StorageRouter) -> TestEnv {
        build(router).await
    }
}
