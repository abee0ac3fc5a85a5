use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_BRIDGE_STREAM_POLL_SECS, DEFAULT_BRIDGE_TIMEOUT_SECS,
    DEFAULT_CACHE_FILE_DEDUP_MAX_ENTRIES, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_CACHE_REFS_MAX_ENTRIES, DEFAULT_FILES_MAX_SIZE_BYTES, DEFAULT_ROUTER_LOOKUP_TTL_SECS,
    DEFAULT_SIDECAR_BATCH_MAX, DEFAULT_SIDECAR_FLUSH_INTERVAL_MS,
    DEFAULT_TABLE_CHUNK_TARGET_BYTES, DEFAULT_TABLE_MAX_CONCURRENCY, SIDECAR_REPLY_TIMEOUT_SECS,
};

// =============================================================================
// File Config (all fields optional, merged across files)
// =============================================================================

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub enabled: Option<bool>,
    pub max_entries: Option<i64>,
    pub refs_max_entries: Option<i64>,
    pub file_dedup_max_entries: Option<i64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RouterFileConfig {
    pub default_version: Option<i64>,
    pub projects: Option<HashMap<String, i64>>,
    pub lookup_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TablesFileConfig {
    pub chunk_target_bytes: Option<usize>,
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BridgeFileConfig {
    pub timeout_secs: Option<u64>,
    pub stream_poll_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SidecarFileConfig {
    pub enabled: Option<bool>,
    pub socket_path: Option<String>,
    pub batch_max: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub reply_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FilesFileConfig {
    pub path: Option<String>,
    pub max_size_bytes: Option<usize>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub cache: Option<CacheFileConfig>,
    pub router: Option<RouterFileConfig>,
    pub tables: Option<TablesFileConfig>,
    pub bridge: Option<BridgeFileConfig>,
    pub sidecar: Option<SidecarFileConfig>,
    pub files: Option<FilesFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Unknown top-level keys, sorted
    fn unknown_fields(&self) -> Vec<String> {
        match &self.extra {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                keys
            }
            _ => Vec::new(),
        }
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        let keys = self.unknown_fields();
        if !keys.is_empty() {
            tracing::warn!(
                fields = %keys.join(", "),
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(cache) = other.cache {
            let current = self.cache.get_or_insert_with(CacheFileConfig::default);
            if cache.enabled.is_some() {
                tracing::trace!(enabled = ?cache.enabled, "Merging cache.enabled");
                current.enabled = cache.enabled;
            }
            if cache.max_entries.is_some() {
                tracing::trace!(max_entries = ?cache.max_entries, "Merging cache.max_entries");
                current.max_entries = cache.max_entries;
            }
            if cache.refs_max_entries.is_some() {
                current.refs_max_entries = cache.refs_max_entries;
            }
            if cache.file_dedup_max_entries.is_some() {
                current.file_dedup_max_entries = cache.file_dedup_max_entries;
            }
        }

        if let Some(router) = other.router {
            let current = self.router.get_or_insert_with(RouterFileConfig::default);
            if router.default_version.is_some() {
                tracing::trace!(
                    default_version = ?router.default_version,
                    "Merging router.default_version"
                );
                current.default_version = router.default_version;
            }
            // Project maps merge per key so an overlay can pin a single project
            if let Some(projects) = router.projects {
                tracing::trace!(count = projects.len(), "Merging router.projects");
                current
                    .projects
                    .get_or_insert_with(HashMap::new)
                    .extend(projects);
            }
            if router.lookup_ttl_secs.is_some() {
                current.lookup_ttl_secs = router.lookup_ttl_secs;
            }
        }

        if let Some(tables) = other.tables {
            let current = self.tables.get_or_insert_with(TablesFileConfig::default);
            if tables.chunk_target_bytes.is_some() {
                tracing::trace!(
                    chunk_target_bytes = ?tables.chunk_target_bytes,
                    "Merging tables.chunk_target_bytes"
                );
                current.chunk_target_bytes = tables.chunk_target_bytes;
            }
            if tables.max_concurrency.is_some() {
                current.max_concurrency = tables.max_concurrency;
            }
        }

        if let Some(bridge) = other.bridge {
            let current = self.bridge.get_or_insert_with(BridgeFileConfig::default);
            if bridge.timeout_secs.is_some() {
                current.timeout_secs = bridge.timeout_secs;
            }
            if bridge.stream_poll_secs.is_some() {
                current.stream_poll_secs = bridge.stream_poll_secs;
            }
        }

        if let Some(sidecar) = other.sidecar {
            let current = self.sidecar.get_or_insert_with(SidecarFileConfig::default);
            if sidecar.enabled.is_some() {
                tracing::trace!(enabled = ?sidecar.enabled, "Merging sidecar.enabled");
                current.enabled = sidecar.enabled;
            }
            if sidecar.socket_path.is_some() {
                current.socket_path = sidecar.socket_path;
            }
            if sidecar.batch_max.is_some() {
                current.batch_max = sidecar.batch_max;
            }
            if sidecar.flush_interval_ms.is_some() {
                current.flush_interval_ms = sidecar.flush_interval_ms;
            }
            if sidecar.reply_timeout_secs.is_some() {
                current.reply_timeout_secs = sidecar.reply_timeout_secs;
            }
        }

        if let Some(files) = other.files {
            let current = self.files.get_or_insert_with(FilesFileConfig::default);
            if files.path.is_some() {
                tracing::trace!(path = ?files.path, "Merging files.path");
                current.path = files.path;
            }
            if files.max_size_bytes.is_some() {
                current.max_size_bytes = files.max_size_bytes;
            }
        }

        if other.debug.is_some() {
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Resolved Config
// =============================================================================

/// Caching layer sizes; `<= 0` means unlimited
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: i64,
    pub refs_max_entries: i64,
    pub file_dedup_max_entries: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            refs_max_entries: DEFAULT_CACHE_REFS_MAX_ENTRIES,
            file_dedup_max_entries: DEFAULT_CACHE_FILE_DEDUP_MAX_ENTRIES,
        }
    }
}

/// Storage version routing
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_version: i64,
    pub projects: HashMap<String, i64>,
    pub lookup_ttl_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_version: 0,
            projects: HashMap::new(),
            lookup_ttl_secs: DEFAULT_ROUTER_LOOKUP_TTL_SECS,
        }
    }
}

/// Chunked table upload
#[derive(Debug, Clone)]
pub struct TablesConfig {
    pub chunk_target_bytes: usize,
    pub max_concurrency: usize,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            chunk_target_bytes: DEFAULT_TABLE_CHUNK_TARGET_BYTES,
            max_concurrency: DEFAULT_TABLE_MAX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub timeout_secs: u64,
    pub stream_poll_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_BRIDGE_TIMEOUT_SECS,
            stream_poll_secs: DEFAULT_BRIDGE_STREAM_POLL_SECS,
        }
    }
}

/// Sidecar listener; `socket_path` of `None` places the socket in the data dir
///
/// `reply_timeout_secs` applies to producer-side clients only.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub enabled: bool,
    pub socket_path: Option<PathBuf>,
    pub batch_max: usize,
    pub flush_interval_ms: u64,
    pub reply_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket_path: None,
            batch_max: DEFAULT_SIDECAR_BATCH_MAX,
            flush_interval_ms: DEFAULT_SIDECAR_FLUSH_INTERVAL_MS,
            reply_timeout_secs: SIDECAR_REPLY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilesConfig {
    pub path: Option<String>,
    pub max_size_bytes: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_size_bytes: DEFAULT_FILES_MAX_SIZE_BYTES,
        }
    }
}

/// Final merged application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub router: RouterConfig,
    pub tables: TablesConfig,
    pub bridge: BridgeConfig,
    pub sidecar: SidecarConfig,
    pub files: FilesConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.stitch/stitch.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::resolve(cli, file_config);
        config.validate()?;

        tracing::debug!(
            debug = config.debug,
            cache_enabled = config.cache.enabled,
            cache_max_entries = config.cache.max_entries,
            router_default_version = config.router.default_version,
            router_projects = config.router.projects.len(),
            chunk_target_bytes = config.tables.chunk_target_bytes,
            table_max_concurrency = config.tables.max_concurrency,
            sidecar_enabled = config.sidecar.enabled,
            files_max_size_bytes = config.files.max_size_bytes,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Layer defaults -> merged file config -> CLI/env overrides
    fn resolve(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_cache = file_config.cache.unwrap_or_default();
        let file_router = file_config.router.unwrap_or_default();
        let file_tables = file_config.tables.unwrap_or_default();
        let file_bridge = file_config.bridge.unwrap_or_default();
        let file_sidecar = file_config.sidecar.unwrap_or_default();
        let file_files = file_config.files.unwrap_or_default();

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            enabled: cli
                .cache_enabled
                .or(file_cache.enabled)
                .unwrap_or(cache_defaults.enabled),
            max_entries: cli
                .cache_max_entries
                .or(file_cache.max_entries)
                .unwrap_or(cache_defaults.max_entries),
            refs_max_entries: file_cache
                .refs_max_entries
                .unwrap_or(cache_defaults.refs_max_entries),
            file_dedup_max_entries: file_cache
                .file_dedup_max_entries
                .unwrap_or(cache_defaults.file_dedup_max_entries),
        };

        let router = RouterConfig {
            default_version: cli
                .storage_version
                .or(file_router.default_version)
                .unwrap_or(0),
            projects: file_router.projects.unwrap_or_default(),
            lookup_ttl_secs: file_router
                .lookup_ttl_secs
                .unwrap_or(DEFAULT_ROUTER_LOOKUP_TTL_SECS),
        };

        let tables = TablesConfig {
            chunk_target_bytes: file_tables
                .chunk_target_bytes
                .unwrap_or(DEFAULT_TABLE_CHUNK_TARGET_BYTES),
            max_concurrency: file_tables
                .max_concurrency
                .unwrap_or(DEFAULT_TABLE_MAX_CONCURRENCY),
        };

        let bridge = BridgeConfig {
            timeout_secs: file_bridge
                .timeout_secs
                .unwrap_or(DEFAULT_BRIDGE_TIMEOUT_SECS),
            stream_poll_secs: file_bridge
                .stream_poll_secs
                .unwrap_or(DEFAULT_BRIDGE_STREAM_POLL_SECS),
        };

        let sidecar = SidecarConfig {
            enabled: cli.sidecar.or(file_sidecar.enabled).unwrap_or(false),
            socket_path: cli
                .sidecar_socket
                .clone()
                .or_else(|| file_sidecar.socket_path.as_deref().map(expand_path)),
            batch_max: file_sidecar
                .batch_max
                .unwrap_or(DEFAULT_SIDECAR_BATCH_MAX),
            flush_interval_ms: file_sidecar
                .flush_interval_ms
                .unwrap_or(DEFAULT_SIDECAR_FLUSH_INTERVAL_MS),
            reply_timeout_secs: file_sidecar
                .reply_timeout_secs
                .unwrap_or(SIDECAR_REPLY_TIMEOUT_SECS),
        };

        let files = FilesConfig {
            path: cli.files_path.clone().or(file_files.path),
            max_size_bytes: file_files
                .max_size_bytes
                .unwrap_or(DEFAULT_FILES_MAX_SIZE_BYTES),
        };

        // debug: CLI/env flag takes precedence, then file config, default false
        let debug = cli.debug || file_config.debug.unwrap_or(false);

        Self {
            cache,
            router,
            tables,
            bridge,
            sidecar,
            files,
            debug,
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if !matches!(self.router.default_version, 0 | 1) {
            anyhow::bail!(
                "Configuration error: router.default_version must be 0 or 1, got {}",
                self.router.default_version
            );
        }
        let mut bad_projects: Vec<&str> = self
            .router
            .projects
            .iter()
            .filter(|(_, v)| !matches!(**v, 0 | 1))
            .map(|(k, _)| k.as_str())
            .collect();
        if !bad_projects.is_empty() {
            bad_projects.sort();
            anyhow::bail!(
                "Configuration error: router.projects versions must be 0 or 1 (projects: {})",
                bad_projects.join(", ")
            );
        }

        if self.tables.chunk_target_bytes == 0 {
            anyhow::bail!("Configuration error: tables.chunk_target_bytes must be greater than 0");
        }
        if self.tables.max_concurrency == 0 {
            anyhow::bail!("Configuration error: tables.max_concurrency must be greater than 0");
        }

        if self.bridge.timeout_secs == 0 || self.bridge.stream_poll_secs == 0 {
            anyhow::bail!("Configuration error: bridge timeouts must be greater than 0");
        }

        if self.sidecar.reply_timeout_secs == 0 {
            anyhow::bail!("Configuration error: sidecar.reply_timeout_secs must be greater than 0");
        }

        if self.sidecar.enabled {
            if self.sidecar.batch_max == 0 {
                anyhow::bail!("Configuration error: sidecar.batch_max must be greater than 0");
            }
            if self.sidecar.flush_interval_ms == 0 {
                anyhow::bail!(
                    "Configuration error: sidecar.flush_interval_ms must be greater than 0"
                );
            }
        }

        if self.files.max_size_bytes == 0 {
            anyhow::bail!("Configuration error: files.max_size_bytes must be greater than 0");
        }

        Ok(())
    }
}

/// Get the profile config path (~/.stitch/stitch.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> FileConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_file_config_parse_full() {
        let config = parse(
            r#"{
                "cache": {"enabled": false, "max_entries": -1, "refs_max_entries": 10},
                "router": {"default_version": 1, "projects": {"e/p": 0}, "lookup_ttl_secs": 5},
                "tables": {"chunk_target_bytes": 4096, "max_concurrency": 2},
                "bridge": {"timeout_secs": 3, "stream_poll_secs": 1},
                "sidecar": {"enabled": true, "socket_path": "/tmp/s.sock", "batch_max": 8, "reply_timeout_secs": 2},
                "files": {"path": "/tmp/files", "max_size_bytes": 1024},
                "debug": true
            }"#,
        );
        let cache = config.cache.as_ref().unwrap();
        assert_eq!(cache.enabled, Some(false));
        assert_eq!(cache.max_entries, Some(-1));
        assert_eq!(cache.refs_max_entries, Some(10));
        assert_eq!(cache.file_dedup_max_entries, None);
        let router = config.router.as_ref().unwrap();
        assert_eq!(router.default_version, Some(1));
        assert_eq!(router.projects.as_ref().unwrap().get("e/p"), Some(&0));
        assert_eq!(config.tables.as_ref().unwrap().max_concurrency, Some(2));
        assert_eq!(config.sidecar.as_ref().unwrap().batch_max, Some(8));
        assert_eq!(config.sidecar.as_ref().unwrap().reply_timeout_secs, Some(2));
        assert_eq!(config.debug, Some(true));
        assert!(config.unknown_fields().is_empty());
    }

    #[test]
    fn test_file_config_parse_empty() {
        let config = parse("{}");
        assert!(config.cache.is_none());
        assert!(config.router.is_none());
        assert!(config.debug.is_none());
    }

    #[test]
    fn test_file_config_unknown_fields() {
        let config = parse(r#"{"debug": false, "zeta": 1, "cahce": {}}"#);
        assert_eq!(config.unknown_fields(), vec!["cahce", "zeta"]);
    }

    #[test]
    fn test_file_config_merge() {
        let mut base = parse(
            r#"{
                "cache": {"max_entries": 100},
                "router": {"default_version": 0, "projects": {"a/one": 1, "a/two": 0}},
                "files": {"path": "/base"},
                "debug": false
            }"#,
        );
        let overlay = parse(
            r#"{
                "cache": {"enabled": false},
                "router": {"projects": {"a/two": 1}},
                "tables": {"max_concurrency": 8},
                "debug": true
            }"#,
        );
        base.merge(overlay);

        let cache = base.cache.as_ref().unwrap();
        assert_eq!(cache.max_entries, Some(100));
        assert_eq!(cache.enabled, Some(false));
        let projects = base.router.as_ref().unwrap().projects.as_ref().unwrap();
        assert_eq!(projects.get("a/one"), Some(&1));
        assert_eq!(projects.get("a/two"), Some(&1));
        assert_eq!(base.router.as_ref().unwrap().default_version, Some(0));
        assert_eq!(base.tables.as_ref().unwrap().max_concurrency, Some(8));
        assert_eq!(base.files.as_ref().unwrap().path.as_deref(), Some("/base"));
        assert_eq!(base.debug, Some(true));
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&CliConfig::default(), FileConfig::default());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, DEFAULT_CACHE_MAX_ENTRIES);
        assert_eq!(config.router.default_version, 0);
        assert!(config.router.projects.is_empty());
        assert_eq!(config.tables.max_concurrency, DEFAULT_TABLE_MAX_CONCURRENCY);
        assert_eq!(config.bridge.timeout_secs, DEFAULT_BRIDGE_TIMEOUT_SECS);
        assert!(!config.sidecar.enabled);
        assert!(config.sidecar.socket_path.is_none());
        assert_eq!(config.sidecar.reply_timeout_secs, SIDECAR_REPLY_TIMEOUT_SECS);
        assert_eq!(config.files.max_size_bytes, DEFAULT_FILES_MAX_SIZE_BYTES);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_cli_overrides_file() {
        let file = parse(
            r#"{
                "cache": {"enabled": true, "max_entries": 50},
                "router": {"default_version": 0},
                "sidecar": {"enabled": false, "socket_path": "/from/file.sock"},
                "files": {"path": "/from/file"}
            }"#,
        );
        let cli = CliConfig {
            debug: true,
            cache_enabled: Some(false),
            cache_max_entries: Some(-5),
            storage_version: Some(1),
            sidecar: Some(true),
            sidecar_socket: Some(PathBuf::from("/from/cli.sock")),
            files_path: Some("/from/cli".to_string()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, file);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_entries, -5);
        assert_eq!(config.router.default_version, 1);
        assert!(config.sidecar.enabled);
        assert_eq!(
            config.sidecar.socket_path,
            Some(PathBuf::from("/from/cli.sock"))
        );
        assert_eq!(config.files.path.as_deref(), Some("/from/cli"));
        assert!(config.debug);
    }

    #[test]
    fn test_resolve_file_values_used_without_cli() {
        let file = parse(r#"{"cache": {"max_entries": 0}, "debug": true}"#);
        let config = AppConfig::resolve(&CliConfig::default(), file);
        assert_eq!(config.cache.max_entries, 0);
        assert!(config.debug);
    }

    #[test]
    fn test_validate_rejects_unknown_storage_version() {
        let mut config = AppConfig::default();
        config.router.default_version = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.router.projects.insert("e/p".to_string(), 7);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("e/p"));
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = AppConfig::default();
        config.tables.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.files.max_size_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sidecar.enabled = true;
        config.sidecar.batch_max = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sidecar.reply_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_explicit_config_fails() {
        let cli = CliConfig {
            config: Some(PathBuf::from("/nonexistent/stitch-test-config.json")),
            ..Default::default()
        };
        let err = AppConfig::load(&cli).unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn test_load_explicit_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(
            &path,
            r#"{"tables": {"chunk_target_bytes": 2048}, "typo_field": 1}"#,
        )
        .unwrap();
        let cli = CliConfig {
            config: Some(path),
            ..Default::default()
        };
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.tables.chunk_target_bytes, 2048);
    }
}
