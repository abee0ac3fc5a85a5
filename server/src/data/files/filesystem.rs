//! Filesystem-based file storage implementation
//!
//! Stores files on the local filesystem with a sharded directory structure:
//! `{base_path}/{encoded project_id}/{digest[0:2]}/{digest[2:4]}/{digest}`
//!
//! Project ids contain `/`, so the project directory name is percent-encoded.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::error::FileStorageError;
use super::storage::FileStorage;
use crate::utils::crypto::is_sha256_hex;

#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn file_path(&self, project_id: &str, digest: &str) -> PathBuf {
        self.base_path
            .join(urlencoding::encode(project_id).as_ref())
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(digest)
    }

    fn validate_digest(digest: &str) -> Result<(), FileStorageError> {
        if !is_sha256_hex(digest) {
            return Err(FileStorageError::InvalidDigest(digest.to_string()));
        }
        Ok(())
    }

    /// Staging file next to `dest` so the final rename stays on one filesystem
    fn staging_path(dest: &Path) -> PathBuf {
        dest.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl FileStorage for FilesystemStorage {
    async fn store(
        &self,
        project_id: &str,
        digest: &str,
        data: &[u8],
    ) -> Result<(), FileStorageError> {
        Self::validate_digest(digest)?;
        let path = self.file_path(project_id, digest);

        if fs::try_exists(&path).await? {
            tracing::trace!(project_id, digest, "File already stored");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Concurrent writers of the same digest each rename their own staging
        // file; the last rename wins with identical bytes.
        let staging = Self::staging_path(&path);
        fs::write(&staging, data).await?;
        if let Err(e) = fs::rename(&staging, &path).await {
            fs::remove_file(&staging).await.ok();
            return Err(FileStorageError::Io(e));
        }

        tracing::debug!(
            project_id,
            digest,
            size = data.len(),
            path = %path.display(),
            "File stored"
        );
        Ok(())
    }

    async fn get(&self, project_id: &str, digest: &str) -> Result<Vec<u8>, FileStorageError> {
        Self::validate_digest(digest)?;
        let path = self.file_path(project_id, digest);

        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FileStorageError::NotFound {
                    project_id: project_id.to_string(),
                    digest: digest.to_string(),
                }
            } else {
                FileStorageError::Io(e)
            }
        })
    }

    async fn exists(&self, project_id: &str, digest: &str) -> Result<bool, FileStorageError> {
        Self::validate_digest(digest)?;
        Ok(fs::try_exists(self.file_path(project_id, digest)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::sha256_hex;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());
        let data = b"test content";
        let digest = sha256_hex(data);

        storage.store("entity/project", &digest, data).await.unwrap();
        storage.store("entity/project", &digest, data).await.unwrap();

        assert_eq!(storage.get("entity/project", &digest).await.unwrap(), data);
        assert!(storage.exists("entity/project", &digest).await.unwrap());
        assert!(!storage.exists("entity/other", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn test_project_directory_is_encoded() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());
        let digest = sha256_hex(b"x");

        storage.store("e/p", &digest, b"x").await.unwrap();
        assert!(temp_dir.path().join("e%2Fp").is_dir());
        assert!(!temp_dir.path().join("e").exists());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());

        let err = storage.get("e/p", &sha256_hex(b"nope")).await.unwrap_err();
        assert!(matches!(err, FileStorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_digest_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().to_path_buf());

        let err = storage.store("e/p", "../../etc", b"x").await.unwrap_err();
        assert!(matches!(err, FileStorageError::InvalidDigest(_)));
    }
}
