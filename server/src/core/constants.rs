// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Stitch";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "stitch";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".stitch";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "stitch.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "STITCH_CONFIG";

// =============================================================================
// Environment Variables - General
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "STITCH_DEBUG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "STITCH_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "STITCH_DATA_DIR";

// =============================================================================
// Environment Variables - Cache
// =============================================================================

/// Enable or disable the read-through caching layer
pub const ENV_CACHE_ENABLED: &str = "STITCH_CACHE_ENABLED";

/// Maximum entries in the read-through cache (<= 0 means unlimited)
pub const ENV_CACHE_MAX_ENTRIES: &str = "STITCH_CACHE_MAX_ENTRIES";

// =============================================================================
// Environment Variables - Router / Sidecar / Files
// =============================================================================

/// Default call storage version for projects without an explicit mapping
pub const ENV_STORAGE_VERSION: &str = "STITCH_STORAGE_VERSION";

/// Enable or disable the sidecar socket listener
pub const ENV_SIDECAR_ENABLED: &str = "STITCH_SIDECAR_ENABLED";

/// Sidecar Unix socket path
pub const ENV_SIDECAR_SOCKET: &str = "STITCH_SIDECAR_SOCKET";

/// File storage directory override
pub const ENV_FILES_PATH: &str = "STITCH_FILES_PATH";

// =============================================================================
// DuckDB
// =============================================================================

/// DuckDB database filename
pub const DUCKDB_DB_FILENAME: &str = "stitch.duckdb";

/// Query timeout for blocking DuckDB work
pub const DUCKDB_QUERY_TIMEOUT_SECS: u64 = 30;

/// Interval between background checkpoints
pub const DUCKDB_CHECKPOINT_INTERVAL_SECS: u64 = 60;

/// Maximum bind parameters per IN (...) batch
pub const DUCKDB_IN_BATCH_SIZE: usize = 1000;

// =============================================================================
// Cache
// =============================================================================

/// Cache key version prefix (bump to invalidate all cached data)
pub const CACHE_KEY_VERSION: &str = "v1";

/// Default read-through cache size
pub const DEFAULT_CACHE_MAX_ENTRIES: i64 = 10_000;

/// Default ref-batch cache size
pub const DEFAULT_CACHE_REFS_MAX_ENTRIES: i64 = 50_000;

/// Default outbound file-dedup cache size
pub const DEFAULT_CACHE_FILE_DEDUP_MAX_ENTRIES: i64 = 1_000;

// =============================================================================
// Storage Router
// =============================================================================

/// How long a resolved project storage version is remembered
pub const DEFAULT_ROUTER_LOOKUP_TTL_SECS: u64 = 300;

/// Upper bound on memoized project versions
pub const ROUTER_CACHE_MAX_PROJECTS: u64 = 10_000;

// =============================================================================
// Tables
// =============================================================================

/// Target serialized size of a single chunk in a chunked table upload
pub const DEFAULT_TABLE_CHUNK_TARGET_BYTES: usize = 10 * 1024 * 1024;

/// Maximum chunk uploads in flight
pub const DEFAULT_TABLE_MAX_CONCURRENCY: usize = 4;

/// Page size used by table_query_stream
pub const TABLE_STREAM_PAGE_SIZE: u64 = 500;

// =============================================================================
// Calls
// =============================================================================

/// Page size used by calls_query_stream
pub const CALLS_STREAM_PAGE_SIZE: u64 = 500;

/// Upper bound on a single calls_query page
pub const CALLS_QUERY_MAX_LIMIT: u64 = 10_000;

// =============================================================================
// Feedback
// =============================================================================

/// Reserved feedback type namespace
pub const FEEDBACK_RESERVED_PREFIX: &str = "wandb.";

/// Reaction feedback type
pub const FEEDBACK_TYPE_REACTION: &str = "wandb.reaction.1";

/// Note feedback type
pub const FEEDBACK_TYPE_NOTE: &str = "wandb.note.1";

/// Scorer output feedback type prefix
pub const FEEDBACK_TYPE_RUNNABLE_PREFIX: &str = "wandb.runnable.";

/// Maximum serialized payload size
pub const FEEDBACK_MAX_PAYLOAD_BYTES: usize = 1 << 15;

// =============================================================================
// Files
// =============================================================================

/// Default maximum file size
pub const DEFAULT_FILES_MAX_SIZE_BYTES: usize = 32 * 1024 * 1024;

// =============================================================================
// Bridge
// =============================================================================

/// Unary bridge request timeout
pub const DEFAULT_BRIDGE_TIMEOUT_SECS: u64 = 30;

/// Per-item poll timeout for streamed bridge responses
pub const DEFAULT_BRIDGE_STREAM_POLL_SECS: u64 = 10;

/// Capacity of each bridge queue
pub const BRIDGE_QUEUE_CAPACITY: usize = 1024;

// =============================================================================
// Sidecar
// =============================================================================

/// Sidecar socket file name (inside the data directory)
pub const SIDECAR_SOCKET_FILENAME: &str = "stitch.sock";

/// Maximum call events per sidecar batch
pub const DEFAULT_SIDECAR_BATCH_MAX: usize = 256;

/// Sidecar batch flush interval
pub const DEFAULT_SIDECAR_FLUSH_INTERVAL_MS: u64 = 250;

/// Sidecar batch queue capacity
pub const SIDECAR_QUEUE_CAPACITY: usize = 4096;

/// How long a sidecar client waits for a reply before falling back
pub const SIDECAR_REPLY_TIMEOUT_SECS: u64 = 10;

/// Debug-mode capture of sidecar events (inside the debug directory)
pub const SIDECAR_DEBUG_FILENAME: &str = "sidecar.jsonl";

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
