//! Storage version router
//!
//! Each project reads calls from one of two physical layouts. Version 0 is
//! reconciled at read time from `call_parts`; version 1 reads the
//! precomputed `calls_complete` table. The version comes from a pluggable
//! [`ProjectVersionProvider`] and is memoized per project with a TTL. Only
//! reads are routed; writes fill both layouts, so a lookup failure (read as
//! v0) or a project moving between versions never hides a call.
//!
//! Query shapes the complete layout cannot answer fail with `NotImplemented`
//! instead of falling back to the merged layout:
//!
//! | Operation | v0 | v1 |
//! |---|---|---|
//! | `call_read` | merged | complete |
//! | `calls_query` (no feedback fields, no dotted-path sort) | merged | complete |
//! | `calls_query` with `include_feedback` | merged | not implemented |
//! | `calls_query_stats` without expression | merged | complete |
//! | `calls_query_stats` with expression | merged | not implemented |
//! | `threads_query` | merged | not implemented |
//! | `project_stats` | merged | complete |
//!
//! Feedback fields and dotted-path sorts are rejected by the field resolver
//! of the complete layout at compile time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::core::config::RouterConfig;
use crate::core::constants::ROUTER_CACHE_MAX_PROJECTS;
use crate::data::duckdb::filters::CallsLayout;
use crate::data::error::DataError;

/// Physical call storage version of a project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageVersion {
    #[default]
    V0,
    V1,
}

impl StorageVersion {
    pub fn from_number(n: i64) -> Result<Self, DataError> {
        match n {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            other => Err(DataError::Config(format!(
                "unknown storage version {}",
                other
            ))),
        }
    }

    pub fn layout(&self) -> CallsLayout {
        match self {
            Self::V0 => CallsLayout::Merged,
            Self::V1 => CallsLayout::Complete,
        }
    }
}

/// Call reads the router is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallsRead {
    Read,
    Query { include_feedback: bool },
    Stats { has_expression: bool },
    Threads,
    ProjectStats,
}

impl CallsRead {
    fn name(&self) -> &'static str {
        match self {
            Self::Read => "call_read",
            Self::Query { .. } => "calls_query",
            Self::Stats { .. } => "calls_query_stats",
            Self::Threads => "threads_query",
            Self::ProjectStats => "project_stats",
        }
    }
}

/// Layout for `read` on a project at `version`, or `NotImplemented`
pub fn layout_for(version: StorageVersion, read: CallsRead) -> Result<CallsLayout, DataError> {
    let unsupported = match (version, read) {
        (StorageVersion::V0, _) => false,
        (StorageVersion::V1, CallsRead::Query { include_feedback }) => include_feedback,
        (StorageVersion::V1, CallsRead::Stats { has_expression }) => has_expression,
        (StorageVersion::V1, CallsRead::Threads) => true,
        (StorageVersion::V1, CallsRead::Read | CallsRead::ProjectStats) => false,
    };
    if unsupported {
        let detail = match read {
            CallsRead::Query { .. } => " with include_feedback",
            CallsRead::Stats { .. } => " with a query expression",
            _ => "",
        };
        return Err(DataError::not_implemented(format!(
            "{}{} is not supported on the calls_complete layout",
            read.name(),
            detail
        )));
    }
    Ok(version.layout())
}

/// Source of per-project storage versions
#[async_trait]
pub trait ProjectVersionProvider: Send + Sync {
    async fn project_version(&self, project_id: &str) -> Result<StorageVersion, DataError>;
}

/// Versions from the `router` config section
pub struct ConfigVersionProvider {
    default_version: i64,
    projects: HashMap<String, i64>,
}

impl ConfigVersionProvider {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            default_version: config.default_version,
            projects: config.projects.clone(),
        }
    }
}

#[async_trait]
impl ProjectVersionProvider for ConfigVersionProvider {
    async fn project_version(&self, project_id: &str) -> Result<StorageVersion, DataError> {
        let n = self
            .projects
            .get(project_id)
            .copied()
            .unwrap_or(self.default_version);
        StorageVersion::from_number(n)
    }
}

/// Memoizing front for a [`ProjectVersionProvider`]
pub struct StorageRouter {
    provider: Arc<dyn ProjectVersionProvider>,
    cache: Cache<String, StorageVersion>,
}

impl StorageRouter {
    pub fn new(provider: Arc<dyn ProjectVersionProvider>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(ROUTER_CACHE_MAX_PROJECTS)
            .time_to_live(ttl)
            .build();
        Self { provider, cache }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(
            Arc::new(ConfigVersionProvider::new(config)),
            Duration::from_secs(config.lookup_ttl_secs),
        )
    }

    /// Storage version of a project; lookup failures fall back to v0
    pub async fn version(&self, project_id: &str) -> StorageVersion {
        if let Some(version) = self.cache.get(project_id).await {
            return version;
        }
        match self.provider.project_version(project_id).await {
            Ok(version) => {
                self.cache.insert(project_id.to_string(), version).await;
                version
            }
            Err(e) => {
                tracing::warn!(project_id, error = %e, "Project version lookup failed, using v0");
                StorageVersion::V0
            }
        }
    }

    /// Resolve the layout one call read runs against
    pub async fn route(&self, project_id: &str, read: CallsRead) -> Result<CallsLayout, DataError> {
        let version = self.version(project_id).await;
        let layout = layout_for(version, read)?;
        tracing::trace!(project_id, op = read.name(), ?layout, "Routed calls read");
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(default_version: i64, projects: &[(&str, i64)]) -> RouterConfig {
        RouterConfig {
            default_version,
            projects: projects
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            lookup_ttl_secs: 60,
        }
    }

    #[test]
    fn test_support_matrix() {
        use CallsRead::*;
        let v0 = StorageVersion::V0;
        let v1 = StorageVersion::V1;
        for read in [
            Read,
            Query { include_feedback: true },
            Stats { has_expression: true },
            Threads,
            ProjectStats,
        ] {
            assert_eq!(layout_for(v0, read).unwrap(), CallsLayout::Merged);
        }
        assert_eq!(layout_for(v1, Read).unwrap(), CallsLayout::Complete);
        assert_eq!(
            layout_for(v1, Query { include_feedback: false }).unwrap(),
            CallsLayout::Complete
        );
        assert_eq!(
            layout_for(v1, Stats { has_expression: false }).unwrap(),
            CallsLayout::Complete
        );
        assert_eq!(layout_for(v1, ProjectStats).unwrap(), CallsLayout::Complete);
        for read in [
            Query { include_feedback: true },
            Stats { has_expression: true },
            Threads,
        ] {
            assert!(matches!(
                layout_for(v1, read),
                Err(DataError::NotImplemented(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_config_provider_per_project() {
        let router = StorageRouter::from_config(&config(0, &[("e/new", 1)]));
        assert_eq!(router.version("e/old").await, StorageVersion::V0);
        assert_eq!(router.version("e/new").await, StorageVersion::V1);
        assert!(matches!(
            router.route("e/new", CallsRead::Threads).await,
            Err(DataError::NotImplemented(_))
        ));
        assert_eq!(
            router.route("e/old", CallsRead::Threads).await.unwrap(),
            CallsLayout::Merged
        );
    }

    #[tokio::test]
    async fn test_invalid_version_falls_back_to_v0() {
        let router = StorageRouter::from_config(&config(7, &[]));
        assert_eq!(router.version("e/p").await, StorageVersion::V0);
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProjectVersionProvider for CountingProvider {
        async fn project_version(&self, _project_id: &str) -> Result<StorageVersion, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StorageVersion::V1)
        }
    }

    #[tokio::test]
    async fn test_lookups_are_memoized() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let router = StorageRouter::new(provider.clone(), Duration::from_secs(60));
        for _ in 0..5 {
            assert_eq!(router.version("e/p").await, StorageVersion::V1);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
