//! Caching decorator over any [`TraceServer`]
//!
//! Only reads whose answer cannot change are cached: object versions by
//! concrete digest, refs into those versions that the wrapped server reports
//! stable, table pages and file content. A cached version carries
//! `is_latest`, so publishing or deleting any version of an object evicts
//! every cached read of that object.
//! `file_create` is deduplicated by project, name and content hash.
//!
//! A cache failure never fails the request. The offending key is evicted and
//! the call falls through to the wrapped server.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::core::config::CacheConfig;
use crate::data::cache::{CacheKey, CacheService};
use crate::data::duckdb::repositories::objects::VersionSelector;
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
    TableRowSchema, TableUpdateReq, TableUpdateRes, ThreadsQueryReq, ThreadsQueryRes,
};
use crate::domain::objects::parse_selector;
use crate::domain::refs::{RefTarget, WeaveRef};
use crate::utils::crypto::sha256_hex;

/// Cache key for a ref whose target can never change
fn stable_ref_key(uri: &str) -> Option<String> {
    let weave_ref = WeaveRef::parse(uri).ok()?;
    match &weave_ref.target {
        RefTarget::Object { name, digest, .. }
            if matches!(parse_selector(digest), VersionSelector::Digest(_)) =>
        {
            Some(CacheKey::ref_read(&weave_ref.project_id(), name, uri))
        }
        _ => None,
    }
}

pub struct CachingTraceServer {
    inner: Arc<dyn TraceServer>,
    reads: CacheService,
    refs: CacheService,
    file_dedup: CacheService,
}

impl CachingTraceServer {
    pub fn new(inner: Arc<dyn TraceServer>, config: &CacheConfig) -> Self {
        Self::with_caches(
            inner,
            CacheService::in_memory("reads", config.max_entries),
            CacheService::in_memory("refs", config.refs_max_entries),
            CacheService::in_memory("file_dedup", config.file_dedup_max_entries),
        )
    }

    pub fn with_caches(
        inner: Arc<dyn TraceServer>,
        reads: CacheService,
        refs: CacheService,
        file_dedup: CacheService,
    ) -> Self {
        Self {
            inner,
            reads,
            refs,
            file_dedup,
        }
    }

    /// Cached value under `key`, or `None` after evicting an unreadable entry
    async fn lookup<T: DeserializeOwned>(cache: &CacheService, key: &str) -> Option<T> {
        match cache.get::<T>(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    cache = cache.name(),
                    key,
                    error = %e,
                    "Cache read failed, bypassing"
                );
                cache.invalidate_key(key).await;
                None
            }
        }
    }

    async fn store<T: Serialize>(cache: &CacheService, key: &str, value: &T) {
        if let Err(e) = cache.set(key, value).await {
            tracing::warn!(cache = cache.name(), key, error = %e, "Cache write failed");
            cache.invalidate_key(key).await;
        }
    }

    /// Read-through: serve `key` from `cache` or run `fetch` and remember it
    async fn read_through<T, F, Fut>(
        cache: &CacheService,
        key: &str,
        fetch: F,
    ) -> Result<T, DataError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DataError>>,
    {
        if let Some(hit) = Self::lookup(cache, key).await {
            tracing::trace!(cache = cache.name(), key, "Cache hit");
            return Ok(hit);
        }
        let value = fetch().await?;
        Self::store(cache, key, &value).await;
        Ok(value)
    }
}

#[async_trait]
impl TraceServer for CachingTraceServer {
    // ==================== Calls ====================

    async fn call_start(&self, req: CallStartReq) -> Result<CallStartRes, DataError> {
        self.inner.call_start(req).await
    }

    async fn call_end(&self, req: CallEndReq) -> Result<CallEndRes, DataError> {
        self.inner.call_end(req).await
    }

    async fn call_batch(&self, req: CallBatchReq) -> Result<CallBatchRes, DataError> {
        self.inner.call_batch(req).await
    }

    async fn call_read(&self, req: CallReadReq) -> Result<CallReadRes, DataError> {
        self.inner.call_read(req).await
    }

    async fn calls_query(&self, req: CallsQueryReq) -> Result<CallsQueryRes, DataError> {
        self.inner.calls_query(req).await
    }

    async fn calls_query_stream(
        &self,
        req: CallsQueryReq,
    ) -> Result<RowStream<CallSchema>, DataError> {
        self.inner.calls_query_stream(req).await
    }

    async fn calls_query_stats(
        &self,
        req: CallsQueryStatsReq,
    ) -> Result<CallsQueryStatsRes, DataError> {
        self.inner.calls_query_stats(req).await
    }

    async fn calls_delete(&self, req: CallsDeleteReq) -> Result<CallsDeleteRes, DataError> {
        self.inner.calls_delete(req).await
    }

    async fn call_update(&self, req: CallUpdateReq) -> Result<CallUpdateRes, DataError> {
        self.inner.call_update(req).await
    }

    async fn threads_query(&self, req: ThreadsQueryReq) -> Result<ThreadsQueryRes, DataError> {
        self.inner.threads_query(req).await
    }

    async fn project_stats(&self, req: ProjectStatsReq) -> Result<ProjectStatsRes, DataError> {
        self.inner.project_stats(req).await
    }

    // ==================== Objects ====================

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, DataError> {
        let reads_prefix = CacheKey::obj_read_prefix(&req.obj.project_id, &req.obj.object_id);
        let res = self.inner.obj_create(req).await?;
        let evicted = self.reads.invalidate_prefix(&reads_prefix).await;
        tracing::debug!(digest = %res.digest, evicted, "Evicted reads of republished object");
        Ok(res)
    }

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, DataError> {
        // `latest` and `v<N>` move as versions are published or deleted
        if !matches!(parse_selector(&req.digest), VersionSelector::Digest(_)) {
            return self.inner.obj_read(req).await;
        }
        let key = CacheKey::obj_read(
            &req.project_id,
            &req.object_id,
            &req.digest,
            req.metadata_only,
        );
        Self::read_through(&self.reads, &key, || self.inner.obj_read(req)).await
    }

    async fn objs_query(&self, req: ObjQueryReq) -> Result<ObjQueryRes, DataError> {
        self.inner.objs_query(req).await
    }

    async fn obj_delete(&self, req: ObjDeleteReq) -> Result<ObjDeleteRes, DataError> {
        let reads_prefix = CacheKey::obj_read_prefix(&req.project_id, &req.object_id);
        let refs_prefix = CacheKey::ref_prefix(&req.project_id, &req.object_id);
        let res = self.inner.obj_delete(req).await?;
        let evicted = self.reads.invalidate_prefix(&reads_prefix).await
            + self.refs.invalidate_prefix(&refs_prefix).await;
        tracing::debug!(num_deleted = res.num_deleted, evicted, "Evicted deleted object reads");
        Ok(res)
    }

    // ==================== Tables ====================

    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, DataError> {
        self.inner.table_create(req).await
    }

    async fn table_create_from_digests(
        &self,
        req: TableCreateFromDigestsReq,
    ) -> Result<TableCreateFromDigestsRes, DataError> {
        self.inner.table_create_from_digests(req).await
    }

    async fn table_update(&self, req: TableUpdateReq) -> Result<TableUpdateRes, DataError> {
        self.inner.table_update(req).await
    }

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, DataError> {
        let key = match CacheKey::request("table_query", &req) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot build table_query cache key");
                return self.inner.table_query(req).await;
            }
        };
        Self::read_through(&self.reads, &key, || self.inner.table_query(req)).await
    }

    async fn table_query_stream(
        &self,
        req: TableQueryReq,
    ) -> Result<RowStream<TableRowSchema>, DataError> {
        self.inner.table_query_stream(req).await
    }

    async fn table_query_stats(
        &self,
        req: TableQueryStatsReq,
    ) -> Result<TableQueryStatsRes, DataError> {
        self.inner.table_query_stats(req).await
    }

    // ==================== Refs ====================

    async fn refs_read_batch(&self, req: RefsReadBatchReq) -> Result<RefsReadBatchRes, DataError> {
        let keys: Vec<Option<String>> = req.refs.iter().map(|uri| stable_ref_key(uri)).collect();
        let mut vals: Vec<Option<JsonValue>> = Vec::with_capacity(req.refs.len());
        for key in &keys {
            vals.push(match key {
                Some(key) => Self::lookup(&self.refs, key).await,
                None => None,
            });
        }
        let mut stable: Vec<bool> = vals.iter().map(Option::is_some).collect();

        let missing: Vec<usize> = (0..vals.len()).filter(|&i| vals[i].is_none()).collect();
        tracing::trace!(
            refs = vals.len(),
            missing = missing.len(),
            "Ref batch cache lookup"
        );
        if !missing.is_empty() {
            let fetched = self
                .inner
                .refs_read_batch(RefsReadBatchReq {
                    refs: missing.iter().map(|&i| req.refs[i].clone()).collect(),
                })
                .await?;
            if fetched.vals.len() != missing.len() {
                return Err(DataError::Serialization(format!(
                    "ref batch returned {} values for {} refs",
                    fetched.vals.len(),
                    missing.len()
                )));
            }
            for (j, (i, val)) in missing.into_iter().zip(fetched.vals).enumerate() {
                stable[i] = fetched.stable.get(j).copied().unwrap_or(false);
                // A missing target may be published later under the same digest
                if let (Some(key), true, false) = (&keys[i], stable[i], val.is_null()) {
                    Self::store(&self.refs, key, &val).await;
                }
                vals[i] = Some(val);
            }
        }

        Ok(RefsReadBatchRes {
            vals: vals.into_iter().map(Option::unwrap_or_default).collect(),
            stable,
        })
    }

    // ==================== Files ====================

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, DataError> {
        let key = CacheKey::file_create(&req.project_id, &req.name, &sha256_hex(&req.content));
        if let Some(res) = Self::lookup::<FileCreateRes>(&self.file_dedup, &key).await {
            tracing::trace!(digest = %res.digest, "Skipped duplicate file upload");
            return Ok(res);
        }
        let res = self.inner.file_create(req).await?;
        Self::store(&self.file_dedup, &key, &res).await;
        Ok(res)
    }

    async fn file_content_read(
        &self,
        req: FileContentReadReq,
    ) -> Result<FileContentReadRes, DataError> {
        let key = CacheKey::file_content(&req.project_id, &req.digest);
        Self::read_through(&self.reads, &key, || self.inner.file_content_read(req)).await
    }

    // ==================== Feedback ====================

    async fn feedback_create(
        &self,
        req: FeedbackCreateReq,
    ) -> Result<FeedbackCreateRes, DataError> {
        self.inner.feedback_create(req).await
    }

    async fn feedback_query(&self, req: FeedbackQueryReq) -> Result<FeedbackQueryRes, DataError> {
        self.inner.feedback_query(req).await
    }

    async fn feedback_purge(&self, req: FeedbackPurgeReq) -> Result<FeedbackPurgeRes, DataError> {
        self.inner.feedback_purge(req).await
    }

    async fn feedback_replace(
        &self,
        req: FeedbackReplaceReq,
    ) -> Result<FeedbackReplaceRes, DataError> {
        self.inner.feedback_replace(req).await
    }
}
