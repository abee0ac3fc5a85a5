//! File storage trait definition

use async_trait::async_trait;

use super::error::FileStorageError;

/// Content-addressed blob storage, partitioned by project
///
/// `digest` is always the SHA-256 hex of the bytes; storing the same digest
/// twice is a no-op.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store(
        &self,
        project_id: &str,
        digest: &str,
        data: &[u8],
    ) -> Result<(), FileStorageError>;

    /// Returns `NotFound` when the digest was never stored
    async fn get(&self, project_id: &str, digest: &str) -> Result<Vec<u8>, FileStorageError>;

    async fn exists(&self, project_id: &str, digest: &str) -> Result<bool, FileStorageError>;
}
