use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CACHE_ENABLED, ENV_CACHE_MAX_ENTRIES, ENV_CONFIG, ENV_DEBUG, ENV_FILES_PATH,
    ENV_SIDECAR_ENABLED, ENV_SIDECAR_SOCKET, ENV_STORAGE_VERSION,
};

#[derive(Parser)]
#[command(name = "stitch")]
#[command(version, about = "Trace storage and query engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging defaults
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Enable or disable the read-through cache
    #[arg(long, global = true, env = ENV_CACHE_ENABLED)]
    pub cache_enabled: Option<bool>,

    /// Maximum read cache entries (0 or negative = unlimited)
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES, allow_negative_numbers = true)]
    pub cache_max_entries: Option<i64>,

    /// Call storage version for projects without an explicit mapping (0 or 1)
    #[arg(long, global = true, env = ENV_STORAGE_VERSION)]
    pub storage_version: Option<i64>,

    /// Enable or disable the sidecar socket listener
    #[arg(long, global = true, env = ENV_SIDECAR_ENABLED)]
    pub sidecar: Option<bool>,

    /// Sidecar Unix socket path
    #[arg(long, global = true, env = ENV_SIDECAR_SOCKET)]
    pub sidecar_socket: Option<PathBuf>,

    /// File storage directory
    #[arg(long, global = true, env = ENV_FILES_PATH)]
    pub files_path: Option<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum SystemCommands {
    /// Delete local data directory (database, files, socket). Requires confirmation.
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub cache_enabled: Option<bool>,
    pub cache_max_entries: Option<i64>,
    pub storage_version: Option<i64>,
    pub sidecar: Option<bool>,
    pub sidecar_socket: Option<PathBuf>,
    pub files_path: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        debug: cli.debug,
        config: cli.config,
        cache_enabled: cli.cache_enabled,
        cache_max_entries: cli.cache_max_entries,
        storage_version: cli.storage_version,
        sidecar: cli.sidecar,
        sidecar_socket: cli.sidecar_socket,
        files_path: cli.files_path,
    };
    (config, cli.command)
}
