//! Hot-path write delegation over a local Unix socket
//!
//! Producers that emit many small call events hand them to a
//! [`SidecarListener`], which folds them into `call_batch` writes. The
//! producer side is a [`SidecarClient`], itself a `TraceServer`, that falls
//! back to direct writes when the listener cannot be reached.

mod client;
mod listener;
mod protocol;

pub use client::SidecarClient;
pub use listener::SidecarListener;
pub use protocol::{SidecarError, SidecarFrame, SidecarOutcome, SidecarReply};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio::sync::watch;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::core::config::SidecarConfig;
    use crate::data::error::DataError;
    use crate::data::traits::TraceServer;
    use crate::data::types::{
        CallEndReq, CallReadReq, CallStartReq, CallsQueryReq, EndedCall, StartedCall,
    };
    use crate::domain::service::test_support::{TestEnv, test_env};

    const P: &str = "e/p";

    struct Running {
        env: TestEnv,
        client: Arc<SidecarClient>,
        path: PathBuf,
        shutdown: watch::Sender<bool>,
        listener: JoinHandle<()>,
        _dir: TempDir,
    }

    async fn running(batch_max: usize, flush_interval_ms: u64) -> Running {
        let env = test_env().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.sock");
        let server: Arc<dyn TraceServer> = Arc::new(env.service.clone());
        let config = SidecarConfig {
            enabled: true,
            socket_path: Some(path.clone()),
            batch_max,
            flush_interval_ms,
            ..SidecarConfig::default()
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let listener = SidecarListener::new(Arc::clone(&server), path.clone(), &config)
            .start(shutdown_rx)
            .unwrap();
        let client = Arc::new(SidecarClient::new(
            server,
            path.clone(),
            Duration::from_secs(5),
        ));
        Running {
            env,
            client,
            path,
            shutdown,
            listener,
            _dir: dir,
        }
    }

    fn start_req(op_name: &str) -> CallStartReq {
        CallStartReq {
            start: StartedCall {
                project_id: P.into(),
                id: None,
                op_name: op_name.into(),
                display_name: None,
                trace_id: None,
                parent_id: None,
                thread_id: None,
                turn_id: None,
                started_at: "2024-01-01T00:00:00Z".parse().unwrap(),
                attributes: json!({}),
                inputs: json!({"x": 1}),
                wb_user_id: None,
                wb_run_id: None,
            },
        }
    }

    fn end_req(id: &str) -> CallEndReq {
        CallEndReq {
            end: EndedCall {
                project_id: P.into(),
                id: id.into(),
                ended_at: "2024-01-01T00:00:02Z".parse().unwrap(),
                output: Some(json!("done")),
                exception: None,
                summary: json!({}),
            },
        }
    }

    async fn read(server: &dyn TraceServer, id: &str) -> crate::data::types::CallSchema {
        server
            .call_read(CallReadReq {
                project_id: P.into(),
                id: id.into(),
                include_feedback: false,
            })
            .await
            .unwrap()
            .call
            .unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_writes_through_listener() {
        let r = running(8, 20).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let client = Arc::clone(&r.client);
            tasks.push(tokio::spawn(async move {
                let started = client
                    .call_start(start_req(&format!("op-{}", i)))
                    .await
                    .unwrap();
                client.call_end(end_req(&started.id)).await.unwrap();
                started.id
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        for id in &ids {
            let call = read(r.client.as_ref(), id).await;
            assert!(call.ended_at.is_some());
            assert_eq!(call.output, Some(json!("done")));
        }
        assert!(!r.client.is_unavailable());

        r.shutdown.send(true).unwrap();
        r.listener.await.unwrap();
        assert!(!r.path.exists());
    }

    #[tokio::test]
    async fn test_full_batch_flushes_without_waiting_for_timer() {
        let r = running(4, 60_000).await;

        let mut tasks = Vec::new();
        for i in 0..4 {
            let client = Arc::clone(&r.client);
            tasks.push(tokio::spawn(async move {
                client.call_start(start_req(&format!("op-{}", i))).await
            }));
        }
        let done = tokio::time::timeout(Duration::from_secs(5), async {
            for task in tasks {
                task.await.unwrap().unwrap();
            }
        })
        .await;
        assert!(done.is_ok());
        assert!(!r.client.is_unavailable());
    }

    #[tokio::test]
    async fn test_timer_flushes_partial_batch() {
        let r = running(1000, 50).await;
        let started = tokio::time::timeout(
            Duration::from_secs(5),
            r.client.call_start(start_req("lonely")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(read(&r.env.service, &started.id).await.op_name, "lonely");
    }

    #[tokio::test]
    async fn test_bad_event_fails_alone() {
        let r = running(2, 60_000).await;

        let good = tokio::spawn({
            let client = Arc::clone(&r.client);
            async move { client.call_start(start_req("fine")).await }
        });
        let bad = tokio::spawn({
            let client = Arc::clone(&r.client);
            async move { client.call_start(start_req("")).await }
        });

        let good = good.await.unwrap().unwrap();
        assert!(matches!(bad.await.unwrap(), Err(DataError::Validation(_))));
        assert_eq!(read(&r.env.service, &good.id).await.op_name, "fine");
        // A rejected event is not a transport failure
        assert!(!r.client.is_unavailable());
    }

    #[tokio::test]
    async fn test_missing_socket_falls_back_and_sticks() {
        let env = test_env().await;
        let dir = TempDir::new().unwrap();
        let client = SidecarClient::new(
            Arc::new(env.service.clone()),
            dir.path().join("absent.sock"),
            Duration::from_secs(5),
        );

        let started = client.call_start(start_req("direct")).await.unwrap();
        assert!(client.is_unavailable());
        client.call_end(end_req(&started.id)).await.unwrap();

        let call = read(&env.service, &started.id).await;
        assert_eq!(call.op_name, "direct");
        assert!(call.ended_at.is_some());

        // Even once a listener appears, the client keeps writing directly
        let _late = UnixListener::bind(client.socket_path()).unwrap();
        client.call_start(start_req("still-direct")).await.unwrap();
        assert!(client.is_unavailable());
    }

    #[tokio::test]
    async fn test_dropped_connection_falls_back_exactly_once() {
        let env = test_env().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flaky.sock");
        let flaky = UnixListener::bind(&path).unwrap();
        let acceptor = tokio::spawn(async move {
            let (stream, _) = flaky.accept().await.unwrap();
            drop(stream);
        });

        let client = SidecarClient::new(
            Arc::new(env.service.clone()),
            path,
            Duration::from_secs(2),
        );
        let started = client.call_start(start_req("survivor")).await.unwrap();
        acceptor.await.unwrap();
        assert!(client.is_unavailable());

        let calls = env
            .service
            .calls_query(CallsQueryReq::new(P))
            .await
            .unwrap()
            .calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, started.id);
    }
}
