//! DuckDB trace store
//!
//! Owns the single embedded connection. Repositories are plain functions over
//! `&Connection`; async callers reach them through [`DuckdbService::with_conn`],
//! which moves the work onto the blocking pool under a fixed timeout.

pub mod error;
pub mod filters;
mod migrations;
pub mod repositories;
pub mod schema;
pub mod sql_types;

pub use error::DuckdbError;

use std::sync::Arc;
use std::time::Duration;

use duckdb::Connection;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{
    DUCKDB_CHECKPOINT_INTERVAL_SECS, DUCKDB_DB_FILENAME, DUCKDB_QUERY_TIMEOUT_SECS,
};
use crate::core::storage::{AppStorage, DataSubdir};
use crate::data::error::DataError;

/// Embedded DuckDB store
///
/// A single connection behind a mutex serializes every read and write.
pub struct DuckdbService {
    conn: Mutex<Option<Connection>>,
}

impl Drop for DuckdbService {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            // Best-effort close - log but don't panic on error
            if let Err((_, e)) = conn.close() {
                tracing::warn!("DuckDB connection close failed during drop: {}", e);
            }
        }
    }
}

impl DuckdbService {
    /// Open (or create) the database file and bring the schema up to date
    pub async fn init(storage: &AppStorage) -> Result<Self, DuckdbError> {
        let db_path = storage.subdir_path(DataSubdir::Duckdb, DUCKDB_DB_FILENAME);

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(
                "SET autoinstall_known_extensions = false;
                 SET autoload_known_extensions = false;
                 SET extension_directory = '';
                 SET force_compression = 'auto';
                 PRAGMA enable_checkpoint_on_shutdown;
                 LOAD json;",
            )?;
            Ok::<_, duckdb::Error>(conn)
        })
        .await
        .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))??;

        migrations::run_migrations(&conn)?;

        tracing::debug!(
            path = %storage.subdir_path(DataSubdir::Duckdb, DUCKDB_DB_FILENAME).display(),
            "DuckdbService initialized"
        );
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Get exclusive access to the connection.
    ///
    /// # Panics
    /// Panics if the connection has been closed via `close()`.
    pub fn conn(&self) -> parking_lot::MappedMutexGuard<'_, Connection> {
        MutexGuard::map(self.conn.lock(), |opt| {
            opt.as_mut()
                .expect("DuckDB connection already closed - do not call conn() after close()")
        })
    }

    /// Check if the connection is still open (test utility only)
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run a blocking DuckDB query with timeout
    pub async fn run_query<T, F>(f: F) -> Result<T, DuckdbError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let timeout = Duration::from_secs(DUCKDB_QUERY_TIMEOUT_SECS);
        tokio::time::timeout(timeout, tokio::task::spawn_blocking(f))
            .await
            .map_err(|_| {
                tracing::warn!(
                    "DuckDB query timed out after {}s",
                    DUCKDB_QUERY_TIMEOUT_SECS
                );
                DuckdbError::Timeout {
                    timeout_secs: DUCKDB_QUERY_TIMEOUT_SECS,
                }
            })?
            .map_err(|e| {
                tracing::error!(error = %e, "DuckDB query task failed");
                DuckdbError::Io(std::io::Error::other(format!(
                    "Query execution failed: {}",
                    e
                )))
            })
    }

    /// Run a repository function against the connection on the blocking pool
    ///
    /// Fails with `BackendUnavailable` once the connection has been closed.
    pub async fn with_conn<T, F>(self: &Arc<Self>, f: F) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DataError> + Send + 'static,
    {
        let db = Arc::clone(self);
        Self::run_query(move || {
            let guard = db.conn.lock();
            match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(DataError::backend_unavailable(
                    "duckdb",
                    "connection already closed",
                )),
            }
        })
        .await?
    }

    /// Run a checkpoint to flush WAL to the main database file.
    ///
    /// Returns `Ok(())` if the connection is already closed (no-op).
    pub async fn checkpoint(self: &Arc<Self>) -> Result<(), DuckdbError> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let conn_guard = db.conn.lock();
            if let Some(ref conn) = *conn_guard {
                conn.execute("CHECKPOINT", [])?;
                tracing::debug!("DuckDB checkpoint completed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))?
    }

    /// Close the DuckDB connection gracefully with explicit error handling
    pub async fn close(self: Arc<Self>) -> Result<(), DuckdbError> {
        tokio::task::spawn_blocking(move || {
            let mut conn_guard = self.conn.lock();
            if let Some(conn) = conn_guard.take() {
                // Best-effort checkpoint before close - log but don't fail on error
                if let Err(e) = conn.execute("CHECKPOINT", []) {
                    tracing::warn!("CHECKPOINT failed during close: {}", e);
                }
                conn.close().map_err(|(_, e)| DuckdbError::Database(e))?;
                tracing::debug!("DuckDB connection closed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))?
    }

    pub fn start_checkpoint_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let db = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(DUCKDB_CHECKPOINT_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("DuckDB checkpoint task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = db.checkpoint().await {
                            tracing::warn!("DuckDB checkpoint failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

/// Execute a function within a transaction, automatically rolling back on error.
pub(crate) fn in_transaction<T, E, F>(conn: &Connection, f: F) -> Result<T, E>
where
    E: From<duckdb::Error>,
    F: FnOnce(&Connection) -> Result<T, E>,
{
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(val) => {
            conn.execute_batch("COMMIT")?;
            Ok(val)
        }
        Err(e) => {
            // Best-effort rollback - log but return original error
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("ROLLBACK failed after transaction error: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_storage() -> (TempDir, AppStorage) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let duckdb_dir = temp_dir.path().join("duckdb");
        tokio::fs::create_dir_all(&duckdb_dir)
            .await
            .expect("Failed to create duckdb dir");
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn test_service_init() {
        let (_temp_dir, storage) = create_test_storage().await;
        let result = DuckdbService::init(&storage).await;
        assert!(
            result.is_ok(),
            "DuckdbService should initialize successfully"
        );
    }

    #[tokio::test]
    async fn test_service_conn() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = DuckdbService::init(&storage)
            .await
            .expect("Init should succeed");

        let conn = service.conn();
        drop(conn); // Successfully acquired connection
    }

    #[tokio::test]
    async fn test_service_checkpoint() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(
            DuckdbService::init(&storage)
                .await
                .expect("Init should succeed"),
        );

        let result = service.checkpoint().await;
        assert!(result.is_ok(), "Checkpoint should succeed");
    }

    #[tokio::test]
    async fn test_service_schema_applied() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = DuckdbService::init(&storage)
            .await
            .expect("Init should succeed");

        let conn = service.conn();
        let version: i32 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .expect("Should read schema version");

        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_service_is_open() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(
            DuckdbService::init(&storage)
                .await
                .expect("Init should succeed"),
        );

        assert!(service.is_open(), "Connection should be open after init");
    }

    #[tokio::test]
    async fn test_service_close() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(
            DuckdbService::init(&storage)
                .await
                .expect("Init should succeed"),
        );

        assert!(service.is_open());
        let result = service.close().await;
        assert!(result.is_ok(), "Close should succeed");
    }

    #[tokio::test]
    async fn test_with_conn_runs_on_blocking_pool() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(DuckdbService::init(&storage).await.unwrap());

        let count = service
            .with_conn(|conn| {
                let n: i64 =
                    conn.query_row("SELECT COUNT(*) FROM call_parts", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_with_conn_after_close_is_unavailable() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(DuckdbService::init(&storage).await.unwrap());
        let handle = Arc::clone(&service);
        service.close().await.unwrap();

        let result = handle.with_conn(|_| Ok(())).await;
        assert!(matches!(result, Err(DataError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = DuckdbService::init(&storage).await.unwrap();
        let conn = service.conn();

        let result = in_transaction(&conn, |conn| -> Result<(), DataError> {
            conn.execute(
                "INSERT INTO files (project_id, digest, name, size_bytes) VALUES ('p', 'd', 'n', 1)",
                [],
            )?;
            Err(DataError::validation("abort"))
        });
        assert!(result.is_err());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_after_close_is_noop() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(
            DuckdbService::init(&storage)
                .await
                .expect("Init should succeed"),
        );

        // Clone before close since close consumes Arc
        let service_for_checkpoint = Arc::clone(&service);

        service.close().await.expect("Close should succeed");

        // Checkpoint after close should be a no-op, not panic
        let result = service_for_checkpoint.checkpoint().await;
        assert!(
            result.is_ok(),
            "Checkpoint after close should succeed as no-op"
        );
    }
}
