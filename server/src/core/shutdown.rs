//! Centralized shutdown management

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::data::DuckdbService;

/// Centralized shutdown service for coordinating graceful shutdown
#[derive(Clone)]
pub struct ShutdownService {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    duckdb: Arc<DuckdbService>,
    timeout: Duration,
}

impl ShutdownService {
    pub fn new(duckdb: Arc<DuckdbService>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            handles: Arc::new(Mutex::new(Vec::new())),
            duckdb,
            timeout: Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a background task handle to be awaited during shutdown
    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Trigger shutdown
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Check if shutdown was triggered
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Trigger shutdown and wait for all registered tasks to complete
    ///
    /// Order: signal tasks, let them drain pending sidecar batches, then
    /// checkpoint and close DuckDB.
    pub async fn shutdown(&self) {
        tracing::debug!("Initiating graceful shutdown...");
        self.trigger();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        tracing::debug!(
            count = handles.len(),
            "Waiting for background tasks to finish..."
        );

        match tokio::time::timeout(self.timeout, futures::future::join_all(handles)).await {
            Ok(_) => tracing::debug!("All background tasks completed"),
            Err(_) => tracing::warn!(
                timeout_secs = self.timeout.as_secs(),
                "Timeout waiting for background tasks"
            ),
        }

        if let Err(e) = self.duckdb.checkpoint().await {
            tracing::warn!("DuckDB checkpoint failed: {}", e);
        }
        if let Err(e) = Arc::clone(&self.duckdb).close().await {
            tracing::warn!("DuckDB close failed: {}", e);
        }

        tracing::debug!("Shutdown complete");
    }

    /// Owned future that resolves once shutdown is triggered
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            let _ = rx.wait_for(|&v| v).await;
        }
    }

    /// Install OS signal handlers and auto-trigger on Ctrl+C/SIGTERM
    pub fn install_signal_handlers(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut signal) => {
                        signal.recv().await;
                    }
                    Err(e) => {
                        tracing::error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::debug!("Received Ctrl+C, shutting down"),
                _ = terminate => tracing::debug!("Received SIGTERM, shutting down"),
            }

            service.trigger();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::AppStorage;
    use tempfile::TempDir;

    async fn make_shutdown() -> (TempDir, ShutdownService) {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("duckdb")).unwrap();
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        let duckdb = Arc::new(DuckdbService::init(&storage).await.unwrap());
        (temp_dir, ShutdownService::new(duckdb))
    }

    #[tokio::test]
    async fn test_shutdown_not_triggered_initially() {
        let (_dir, shutdown) = make_shutdown().await;
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_shutdown_wait_returns_after_trigger() {
        let (_dir, shutdown) = make_shutdown().await;
        let handle = tokio::spawn(shutdown.wait());
        tokio::task::yield_now().await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_tasks_then_closes_db() {
        let (_dir, shutdown) = make_shutdown().await;
        let mut rx = shutdown.subscribe();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&done);
        shutdown
            .register(tokio::spawn(async move {
                let _ = rx.wait_for(|&v| v).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            }))
            .await;

        shutdown.shutdown().await;
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!shutdown.duckdb.is_open());
    }

    #[tokio::test]
    async fn test_shutdown_times_out_stuck_task() {
        let (_dir, shutdown) = make_shutdown().await;
        let shutdown = shutdown.with_timeout(Duration::from_millis(50));
        shutdown
            .register(tokio::spawn(std::future::pending::<()>()))
            .await;
        tokio::time::timeout(Duration::from_secs(5), shutdown.shutdown())
            .await
            .unwrap();
        assert!(!shutdown.duckdb.is_open());
    }
}
