//! File storage layer
//!
//! Bytes live outside DuckDB, content-addressed by SHA-256 hex; DuckDB keeps
//! per-project metadata (name, size) for stats and existence checks.
//!
//! ## Storage Layout
//!
//! ```text
//! {base_path}/
//! └── {percent-encoded project_id}/
//!     └── {digest[0:2]}/
//!         └── {digest[2:4]}/
//!             └── {digest}
//! ```

pub mod error;
pub mod filesystem;
pub mod storage;

use std::sync::Arc;

use crate::core::config::FilesConfig;
use crate::core::storage::{AppStorage, DataSubdir};
use crate::data::duckdb::DuckdbService;
use crate::data::duckdb::repositories::files as files_repository;
use crate::utils::crypto::sha256_hex;

pub use error::{FileServiceError, FileStorageError};
pub use filesystem::FilesystemStorage;
pub use storage::FileStorage;

/// Coordinates blob storage and metadata
pub struct FileService {
    storage: Arc<dyn FileStorage>,
    duckdb: Arc<DuckdbService>,
    max_size_bytes: usize,
}

impl FileService {
    pub fn new(config: &FilesConfig, app_storage: &AppStorage, duckdb: Arc<DuckdbService>) -> Self {
        let files_path = config
            .path
            .as_ref()
            .map(|p| crate::utils::file::expand_path(p))
            .unwrap_or_else(|| app_storage.subdir(DataSubdir::Files));

        tracing::debug!(
            path = %files_path.display(),
            max_size_bytes = config.max_size_bytes,
            "File service initialized"
        );

        Self::with_storage(
            Arc::new(FilesystemStorage::new(files_path)),
            duckdb,
            config.max_size_bytes,
        )
    }

    pub fn with_storage(
        storage: Arc<dyn FileStorage>,
        duckdb: Arc<DuckdbService>,
        max_size_bytes: usize,
    ) -> Self {
        Self {
            storage,
            duckdb,
            max_size_bytes,
        }
    }

    /// Store `content` and return its digest
    ///
    /// Bytes are written before metadata, so a recorded digest always has
    /// content behind it.
    pub async fn create(
        &self,
        project_id: &str,
        name: &str,
        content: &[u8],
    ) -> Result<String, FileServiceError> {
        if content.len() > self.max_size_bytes {
            return Err(FileServiceError::TooLarge {
                size: content.len(),
                max: self.max_size_bytes,
            });
        }

        let digest = sha256_hex(content);
        self.storage.store(project_id, &digest, content).await?;

        let size = content.len() as u64;
        let (project, name_owned, digest_owned) =
            (project_id.to_string(), name.to_string(), digest.clone());
        let inserted = self
            .duckdb
            .with_conn(move |conn| {
                files_repository::insert_file(conn, &project, &digest_owned, &name_owned, size)
            })
            .await?;

        tracing::debug!(project_id, digest = %digest, size, new = inserted, "File created");
        Ok(digest)
    }

    pub async fn read(&self, project_id: &str, digest: &str) -> Result<Vec<u8>, FileServiceError> {
        Ok(self.storage.get(project_id, digest).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup(max_size_bytes: usize) -> (TempDir, FileService, Arc<DuckdbService>) {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(temp_dir.path().join("duckdb"))
            .await
            .unwrap();
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        let duckdb = Arc::new(DuckdbService::init(&storage).await.unwrap());
        let config = FilesConfig {
            path: None,
            max_size_bytes,
        };
        let service = FileService::new(&config, &storage, Arc::clone(&duckdb));
        (temp_dir, service, duckdb)
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (_temp_dir, service, duckdb) = setup(1024).await;

        let digest = service.create("e/p", "a.txt", b"hello").await.unwrap();
        assert_eq!(digest, sha256_hex(b"hello"));
        let again = service.create("e/p", "b.txt", b"hello").await.unwrap();
        assert_eq!(again, digest);

        assert_eq!(service.read("e/p", &digest).await.unwrap(), b"hello");

        let usage = duckdb
            .with_conn(|conn| files_repository::files_usage(conn, "e/p"))
            .await
            .unwrap();
        assert_eq!(usage, (1, 5));
    }

    #[tokio::test]
    async fn test_too_large_rejected() {
        let (_temp_dir, service, _duckdb) = setup(4).await;
        let err = service.create("e/p", "big", b"hello").await.unwrap_err();
        assert!(matches!(err, FileServiceError::TooLarge { size: 5, max: 4 }));
    }

    #[tokio::test]
    async fn test_read_unknown_digest() {
        let (_temp_dir, service, _duckdb) = setup(1024).await;
        let err = service.read("e/p", &sha256_hex(b"missing")).await.unwrap_err();
        assert!(matches!(
            err,
            FileServiceError::Storage(FileStorageError::NotFound { .. })
        ));
    }
}
