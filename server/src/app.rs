//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

#[cfg(unix)]
use crate::api::sidecar::SidecarClient;
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::bridge::{self, BridgeClient, BridgeWorker};
use crate::data::caching::CachingTraceServer;
use crate::data::duckdb::DuckdbService;
use crate::data::files::FileService;
use crate::data::traits::TraceServer;
use crate::domain::{StorageRouter, TraceService};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub duckdb: Arc<DuckdbService>,
    /// Fully assembled trace server (cache decorator included when enabled)
    pub server: Arc<dyn TraceServer>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::System {
                command: system_cmd,
            }) => {
                return Self::handle_system_command(system_cmd);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        app.serve().await
    }

    /// Build every service from configuration without starting background work
    pub async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;

        let duckdb = Arc::new(
            DuckdbService::init(&storage)
                .await
                .context("Failed to initialize DuckDB")?,
        );
        let files = Arc::new(FileService::new(
            &config.files,
            &storage,
            Arc::clone(&duckdb),
        ));
        let router = Arc::new(StorageRouter::from_config(&config.router));
        let service: Arc<dyn TraceServer> =
            Arc::new(TraceService::new(Arc::clone(&duckdb), files, router));

        let server: Arc<dyn TraceServer> = if config.cache.enabled {
            tracing::debug!(max_entries = config.cache.max_entries, "Read cache enabled");
            Arc::new(CachingTraceServer::new(service, &config.cache))
        } else {
            tracing::debug!("Read cache disabled by config");
            service
        };

        let shutdown = ShutdownService::new(Arc::clone(&duckdb));

        Ok(Self {
            shutdown,
            config,
            storage,
            duckdb,
            server,
        })
    }

    /// In-process bridge to the assembled server, for embedding hosts
    ///
    /// The worker must be spawned by the caller; the client chunks large
    /// tables per the `tables` config section.
    pub fn bridge(&self) -> (BridgeClient, BridgeWorker) {
        bridge::channel(
            Arc::clone(&self.server),
            &self.config.bridge,
            &self.config.tables,
        )
    }

    /// Producer-side sidecar client for the configured socket
    ///
    /// Writes fall back to `direct` whenever the listener cannot be reached,
    /// so this is usable whether or not the sidecar is enabled here.
    #[cfg(unix)]
    pub fn sidecar_client(&self, direct: Arc<dyn TraceServer>) -> SidecarClient {
        SidecarClient::new(
            direct,
            self.storage
                .sidecar_socket_path(self.config.sidecar.socket_path.as_deref()),
            std::time::Duration::from_secs(self.config.sidecar.reply_timeout_secs),
        )
    }

    fn handle_system_command(cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes),
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete the local trace store:");
        println!("  {}", data_dir.display());
        println!();
        println!("Stop any running instance first, DuckDB does not survive deletion mid-write.");

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    /// Start background tasks, wait for a shutdown signal, then drain
    pub async fn serve(self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        self.shutdown.install_signal_handlers();

        let sidecar_socket = self.start_background_tasks().await?;

        banner::print_banner(
            &self.config,
            self.storage.data_dir(),
            sidecar_socket.as_deref(),
        );

        self.shutdown.wait().await;
        self.shutdown.shutdown().await;
        Ok(())
    }

    /// Returns the sidecar socket path when the listener is running
    pub async fn start_background_tasks(&self) -> Result<Option<std::path::PathBuf>> {
        self.shutdown
            .register(self.duckdb.start_checkpoint_task(self.shutdown.subscribe()))
            .await;

        let sidecar_socket = self.start_sidecar().await?;

        tracing::debug!("Background tasks started");
        Ok(sidecar_socket)
    }

    #[cfg(unix)]
    async fn start_sidecar(&self) -> Result<Option<std::path::PathBuf>> {
        use crate::api::sidecar::SidecarListener;
        use crate::core::constants::SIDECAR_DEBUG_FILENAME;
        use crate::core::storage::DataSubdir;

        if !self.config.sidecar.enabled {
            tracing::debug!("Sidecar listener disabled by config");
            return Ok(None);
        }

        let path = self
            .storage
            .sidecar_socket_path(self.config.sidecar.socket_path.as_deref());
        let mut listener =
            SidecarListener::new(Arc::clone(&self.server), path.clone(), &self.config.sidecar);
        if self.config.debug {
            listener = listener.with_debug_log(
                self.storage
                    .subdir_path(DataSubdir::Debug, SIDECAR_DEBUG_FILENAME),
            );
        }
        let handle = listener
            .start(self.shutdown.subscribe())
            .with_context(|| format!("Failed to bind sidecar socket: {}", path.display()))?;
        self.shutdown.register(handle).await;
        Ok(Some(path))
    }

    #[cfg(not(unix))]
    async fn start_sidecar(&self) -> Result<Option<std::path::PathBuf>> {
        if self.config.sidecar.enabled {
            tracing::warn!("Sidecar listener needs Unix sockets, not starting it");
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{FilesConfig, SidecarConfig};
    use crate::data::types::{
        ObjCreateReq, ObjReadReq, ObjSchemaForInsert, TableCreateReq, TableSchemaForInsert,
    };
    use serde_json::json;
    use tempfile::TempDir;

    async fn app(dir: &TempDir, sidecar: bool) -> CoreApp {
        let storage = AppStorage::init_for_test(dir.path().to_path_buf());
        tokio::fs::create_dir_all(dir.path().join("duckdb"))
            .await
            .unwrap();
        let config = AppConfig {
            files: FilesConfig {
                path: Some(dir.path().join("files").display().to_string()),
                ..FilesConfig::default()
            },
            sidecar: SidecarConfig {
                enabled: sidecar,
                socket_path: Some(dir.path().join("t.sock")),
                ..SidecarConfig::default()
            },
            ..AppConfig::default()
        };
        let duckdb = Arc::new(DuckdbService::init(&storage).await.unwrap());
        let files = Arc::new(FileService::new(&config.files, &storage, Arc::clone(&duckdb)));
        let router = Arc::new(StorageRouter::from_config(&config.router));
        let service: Arc<dyn TraceServer> =
            Arc::new(TraceService::new(Arc::clone(&duckdb), files, router));
        CoreApp {
            shutdown: ShutdownService::new(Arc::clone(&duckdb)),
            server: Arc::new(CachingTraceServer::new(service, &config.cache)),
            config,
            storage,
            duckdb,
        }
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, true).await;

        let socket = app.start_background_tasks().await.unwrap().unwrap();
        assert!(socket.exists());

        let created = app
            .server
            .obj_create(ObjCreateReq {
                obj: ObjSchemaForInsert {
                    project_id: "e/p".into(),
                    object_id: "cfg".into(),
                    val: json!({"k": 1}),
                    wb_user_id: None,
                },
            })
            .await
            .unwrap();
        let read = app
            .server
            .obj_read(ObjReadReq {
                project_id: "e/p".into(),
                object_id: "cfg".into(),
                digest: created.digest,
                metadata_only: false,
            })
            .await
            .unwrap();
        assert_eq!(read.obj.val, json!({"k": 1}));

        app.shutdown.shutdown().await;
        assert!(!socket.exists());
        assert!(!app.duckdb.is_open());
    }

    #[tokio::test]
    async fn test_bridge_uses_table_chunking_config() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir, false).await;
        app.config.tables.chunk_target_bytes = 64;
        let (client, worker) = app.bridge();
        let handle = tokio::spawn(worker.run());

        let rows: Vec<_> = (0..50).map(|i| json!({"i": i})).collect();
        let created = client
            .table_create(TableCreateReq {
                table: TableSchemaForInsert {
                    project_id: "e/p".into(),
                    rows: rows.clone(),
                },
            })
            .await
            .unwrap();
        let direct = app
            .server
            .table_create(TableCreateReq {
                table: TableSchemaForInsert {
                    project_id: "e/p".into(),
                    rows,
                },
            })
            .await
            .unwrap();
        assert_eq!(created.digest, direct.digest);
        assert_eq!(created.row_digests.len(), 50);

        client.stop().await.unwrap();
        handle.await.unwrap();
        app.shutdown.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sidecar_client_round_trips_through_listener() {
        use crate::data::types::{CallReadReq, CallStartReq, StartedCall};

        let dir = TempDir::new().unwrap();
        let app = app(&dir, true).await;
        app.start_background_tasks().await.unwrap();

        let client = app.sidecar_client(Arc::clone(&app.server));
        let started = client
            .call_start(CallStartReq {
                start: StartedCall {
                    project_id: "e/p".into(),
                    id: Some("c1".into()),
                    op_name: "op".into(),
                    display_name: None,
                    trace_id: Some("t1".into()),
                    parent_id: None,
                    thread_id: None,
                    turn_id: None,
                    started_at: "2024-01-01T00:00:00Z".parse().unwrap(),
                    attributes: json!({}),
                    inputs: json!({}),
                    wb_user_id: None,
                    wb_run_id: None,
                },
            })
            .await
            .unwrap();
        assert_eq!(started.id, "c1");

        let read = app
            .server
            .call_read(CallReadReq {
                project_id: "e/p".into(),
                id: "c1".into(),
                include_feedback: false,
            })
            .await
            .unwrap();
        assert!(read.call.is_some());

        app.shutdown.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_debug_mode_captures_sidecar_events() {
        use crate::data::types::{CallStartReq, StartedCall};

        let dir = TempDir::new().unwrap();
        let mut app = app(&dir, true).await;
        app.config.debug = true;
        app.start_background_tasks().await.unwrap();

        let client = app.sidecar_client(Arc::clone(&app.server));
        client
            .call_start(CallStartReq {
                start: StartedCall {
                    project_id: "e/p".into(),
                    id: Some("c2".into()),
                    op_name: "op".into(),
                    display_name: None,
                    trace_id: None,
                    parent_id: None,
                    thread_id: None,
                    turn_id: None,
                    started_at: "2024-01-01T00:00:00Z".parse().unwrap(),
                    attributes: json!({}),
                    inputs: json!({}),
                    wb_user_id: None,
                    wb_run_id: None,
                },
            })
            .await
            .unwrap();
        app.shutdown.shutdown().await;

        let captured = std::fs::read_to_string(dir.path().join("debug").join("sidecar.jsonl"))
            .unwrap();
        let line: serde_json::Value =
            serde_json::from_str(captured.lines().next().unwrap()).unwrap();
        assert_eq!(line["project_id"], "e/p");
        assert_eq!(line["data"]["call"]["mode"], "start");
        assert_eq!(line["data"]["call"]["req"]["start"]["id"], "c2");
    }

    #[tokio::test]
    async fn test_sidecar_disabled_by_default() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, false).await;
        assert!(app.start_background_tasks().await.unwrap().is_none());
        app.shutdown.shutdown().await;
    }
}
