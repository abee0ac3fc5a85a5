//! Platform-aware data storage directory management
//!
//! ## Platform Paths
//!
//! | Type | Windows | macOS | Linux |
//! |------|---------|-------|-------|
//! | Data | `%APPDATA%\Stitch\` | `~/Library/Application Support/Stitch/` | `$XDG_DATA_HOME/stitch/` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::config::AppConfig;
use super::constants::{APP_DOT_FOLDER, APP_NAME, ENV_DATA_DIR, SIDECAR_SOCKET_FILENAME};
use crate::utils::file::expand_path;

/// Data subdirectories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubdir {
    Duckdb,
    Files,
    Debug,
}

impl DataSubdir {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataSubdir::Duckdb => "duckdb",
            DataSubdir::Files => "files",
            DataSubdir::Debug => "debug",
        }
    }

    /// Subdirectories that are always created.
    /// Files is excluded when `files.path` points elsewhere; Debug only
    /// exists in debug mode.
    pub const fn all() -> &'static [DataSubdir] {
        &[DataSubdir::Duckdb]
    }
}

/// Application storage manager
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
}

impl AppStorage {
    /// Initialize storage with platform-appropriate data directory
    pub async fn init(config: &AppConfig) -> Result<Self> {
        let data_dir = Self::resolve_data_dir();

        // Create directories first (canonicalize requires path to exist)
        Self::ensure_directories(&data_dir, config.files.path.is_none(), config.debug).await?;

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        tracing::debug!(data_dir = %data_dir.display(), "Storage initialized");
        if config.debug {
            let debug_path = data_dir.join(DataSubdir::Debug.as_str());
            tracing::warn!(path = %debug_path.display(), "Debug mode enabled, capturing sidecar events");
        }

        Ok(Self { data_dir })
    }

    /// Resolve data directory from env var or platform default
    pub fn resolve_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return expand_path(&dir);
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            return proj_dirs.data_dir().to_path_buf();
        }

        // Fallback to local .stitch
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(APP_DOT_FOLDER)
    }

    async fn ensure_directories(data_dir: &Path, local_files: bool, debug: bool) -> Result<()> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let mut extra = Vec::new();
        if local_files {
            extra.push(DataSubdir::Files);
        }
        if debug {
            extra.push(DataSubdir::Debug);
        }
        for subdir in DataSubdir::all().iter().chain(&extra) {
            let path = data_dir.join(subdir.as_str());
            tokio::fs::create_dir_all(&path).await.with_context(|| {
                format!(
                    "Failed to create {} directory: {}",
                    subdir.as_str(),
                    path.display()
                )
            })?;
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get path to a subdirectory (canonicalized)
    pub fn subdir(&self, subdir: DataSubdir) -> PathBuf {
        let path = self.data_dir.join(subdir.as_str());
        path.canonicalize().unwrap_or(path)
    }

    /// Get path to a file within a subdirectory
    pub fn subdir_path(&self, subdir: DataSubdir, filename: &str) -> PathBuf {
        self.data_dir.join(subdir.as_str()).join(filename)
    }

    /// Sidecar socket path: configured override or `<data_dir>/stitch.sock`
    pub fn sidecar_socket_path(&self, configured: Option<&Path>) -> PathBuf {
        configured
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.data_dir.join(SIDECAR_SOCKET_FILENAME))
    }

    /// Create AppStorage for testing with a specific data directory
    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_subdir_as_str() {
        assert_eq!(DataSubdir::Duckdb.as_str(), "duckdb");
        assert_eq!(DataSubdir::Files.as_str(), "files");
        assert_eq!(DataSubdir::Debug.as_str(), "debug");
    }

    #[test]
    fn test_data_subdir_all() {
        let all = DataSubdir::all();
        assert_eq!(all, &[DataSubdir::Duckdb]);
    }

    #[tokio::test]
    async fn test_ensure_directories() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("data");
        AppStorage::ensure_directories(&root, true, false).await.unwrap();
        assert!(root.join("duckdb").is_dir());
        assert!(root.join("files").is_dir());
        assert!(!root.join("debug").exists());

        let other = temp.path().join("other");
        AppStorage::ensure_directories(&other, false, true).await.unwrap();
        assert!(other.join("duckdb").is_dir());
        assert!(!other.join("files").exists());
        assert!(other.join("debug").is_dir());
    }

    #[test]
    fn test_sidecar_socket_path() {
        let storage = AppStorage::init_for_test(PathBuf::from("/data"));
        assert_eq!(
            storage.sidecar_socket_path(None),
            PathBuf::from("/data").join(SIDECAR_SOCKET_FILENAME)
        );
        assert_eq!(
            storage.sidecar_socket_path(Some(Path::new("/run/x.sock"))),
            PathBuf::from("/run/x.sock")
        );
    }

    #[test]
    fn test_resolve_data_dir_not_empty() {
        let path = AppStorage::resolve_data_dir();
        assert!(!path.as_os_str().is_empty());
    }
}
