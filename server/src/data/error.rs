//! Unified error type for the data layer
//!
//! Every public trace-server operation returns `Result<_, DataError>`. The
//! variants map onto the caller-visible failure classes: validation, missing
//! entities, unsupported query shapes, transient I/O and backend failures.

use thiserror::Error;

/// Unified error type for data layer operations
#[derive(Error, Debug)]
pub enum DataError {
    /// Malformed request (bad query expression, reserved feedback type, bad ref...)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query shape not supported by the project's storage layout
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Conflicting write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// DuckDB database error
    #[error("DuckDB error: {0}")]
    Duckdb(#[from] duckdb::Error),

    /// Migration failed
    #[error("Migration {version} ({name}) failed on {backend}: {error}")]
    MigrationFailed {
        backend: &'static str,
        version: i32,
        name: String,
        error: String,
    },

    /// Request timed out
    #[error("Query timeout after {timeout_secs}s on {backend}")]
    Timeout {
        backend: &'static str,
        timeout_secs: u64,
    },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend not available
    #[error("Backend {backend} is not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by a remote trace server (bridge worker)
    #[error("Remote error: {0}")]
    Remote(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a not-implemented error
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(backend: &'static str, timeout_secs: u64) -> Self {
        Self::Timeout {
            backend,
            timeout_secs,
        }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Check if this error is transient (a retry or fallback may succeed)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Io(_) | Self::BackendUnavailable { .. }
        )
    }

    /// Errors caused by the request itself rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::NotImplemented(_) | Self::Conflict(_)
        )
    }
}

/// Convert from the DuckDB service error type
impl From<crate::data::duckdb::DuckdbError> for DataError {
    fn from(e: crate::data::duckdb::DuckdbError) -> Self {
        use crate::data::duckdb::DuckdbError;
        match e {
            DuckdbError::Database(e) => Self::Duckdb(e),
            DuckdbError::MigrationFailed {
                version,
                name,
                error,
            } => Self::MigrationFailed {
                backend: "duckdb",
                version,
                name,
                error,
            },
            DuckdbError::Io(e) => Self::Io(e),
            DuckdbError::Timeout { timeout_secs } => Self::Timeout {
                backend: "duckdb",
                timeout_secs,
            },
        }
    }
}

/// Query compilation failures surface as validation or not-implemented errors
impl From<crate::data::duckdb::filters::QueryError> for DataError {
    fn from(e: crate::data::duckdb::filters::QueryError) -> Self {
        use crate::data::duckdb::filters::QueryError;
        match e {
            QueryError::Unsupported(msg) => Self::NotImplemented(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<crate::data::files::FileServiceError> for DataError {
    fn from(e: crate::data::files::FileServiceError) -> Self {
        use crate::data::files::{FileServiceError, FileStorageError};
        match e {
            FileServiceError::Storage(FileStorageError::NotFound { project_id, digest }) => {
                Self::NotFound(format!("file {}/{}", project_id, digest))
            }
            FileServiceError::Storage(FileStorageError::InvalidDigest(digest)) => {
                Self::Validation(format!("invalid file digest: {}", digest))
            }
            FileServiceError::Storage(FileStorageError::Io(e)) => Self::Io(e),
            FileServiceError::Database(e) => e,
            e @ FileServiceError::TooLarge { .. } => Self::Validation(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
