use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::protocol::{
    FrameId, SidecarError, SidecarFrame, SidecarOutcome, SidecarReply, decode_line, encode_line,
    salvage_id,
};
use crate::core::config::SidecarConfig;
use crate::core::constants::SIDECAR_QUEUE_CAPACITY;
use crate::data::error::DataError;
use crate::data::traits::TraceServer;
use crate::data::types::{CallBatchItem, CallBatchItemRes, CallBatchReq};
use crate::utils::debug::append_debug_line;

/// One call event waiting for the next batch
struct Queued {
    id: FrameId,
    item: CallBatchItem,
    replies: mpsc::UnboundedSender<SidecarReply>,
}

impl Queued {
    fn reply(self, result: Result<CallBatchItemRes, DataError>) {
        let reply = SidecarReply {
            id: self.id,
            outcome: SidecarOutcome::from_result(result),
        };
        if self.replies.send(reply).is_err() {
            tracing::trace!(id = self.id, "Sidecar client left before its reply");
        }
    }
}

/// Accepts hot-path call events on a Unix socket and applies them in batches
pub struct SidecarListener {
    server: Arc<dyn TraceServer>,
    socket_path: PathBuf,
    batch_max: usize,
    flush_interval: Duration,
    debug_log: Option<Arc<PathBuf>>,
}

impl SidecarListener {
    pub fn new(server: Arc<dyn TraceServer>, socket_path: PathBuf, config: &SidecarConfig) -> Self {
        Self {
            server,
            socket_path,
            batch_max: config.batch_max.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            debug_log: None,
        }
    }

    /// Append every decoded event to `path` as a JSON line (debug mode)
    pub fn with_debug_log(mut self, path: PathBuf) -> Self {
        self.debug_log = Some(Arc::new(path));
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and serve until shutdown
    ///
    /// A stale socket file from an earlier run is replaced. Events already
    /// read when shutdown arrives are still applied and answered.
    pub fn start(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, SidecarError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => tracing::debug!(path = %self.socket_path.display(), "Removed stale sidecar socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&self.socket_path)?;

        let (queue_tx, queue_rx) = mpsc::channel(SIDECAR_QUEUE_CAPACITY);
        let batcher = tokio::spawn(run_batcher(
            Arc::clone(&self.server),
            queue_rx,
            self.batch_max,
            self.flush_interval,
        ));

        tracing::debug!(
            path = %self.socket_path.display(),
            batch_max = self.batch_max,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Sidecar listener started"
        );

        Ok(tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::debug!("Sidecar listener received shutdown");
                            break;
                        }
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            connections.spawn(serve_connection(
                                stream,
                                queue_tx.clone(),
                                shutdown_rx.clone(),
                                self.debug_log.clone(),
                            ));
                        }
                        Err(e) => tracing::warn!(error = %e, "Sidecar accept failed"),
                    },
                    Some(joined) = connections.join_next(), if !connections.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "Sidecar connection task failed");
                        }
                    }
                }
            }

            drop(listener);
            drop(queue_tx);
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Sidecar connection task failed");
                }
            }
            if let Err(e) = batcher.await {
                tracing::error!(error = %e, "Sidecar batcher failed");
            }
            match tokio::fs::remove_file(&self.socket_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(error = %e, "Failed to remove sidecar socket"),
            }
            tracing::debug!("Sidecar listener stopped");
        }))
    }
}

async fn serve_connection(
    stream: UnixStream,
    queue: mpsc::Sender<Queued>,
    mut shutdown_rx: watch::Receiver<bool>,
    debug_log: Option<Arc<PathBuf>>,
) {
    let (read_half, write_half) = stream.into_split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_replies(write_half, reply_rx));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => enqueue(&line, &queue, &reply_tx, debug_log.as_deref()).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Sidecar read failed");
                    break;
                }
            },
        }
    }

    // The writer ends once every queued event of this connection is answered
    drop(reply_tx);
    drop(queue);
    if let Err(e) = writer.await {
        tracing::error!(error = %e, "Sidecar writer failed");
    }
}

async fn enqueue(
    line: &str,
    queue: &mpsc::Sender<Queued>,
    replies: &mpsc::UnboundedSender<SidecarReply>,
    debug_log: Option<&PathBuf>,
) {
    let frame = match decode_line::<SidecarFrame>(line) {
        Ok(frame) => frame,
        Err(e) => {
            let Some(id) = salvage_id(line) else {
                tracing::warn!(error = %e, "Dropping sidecar frame without id");
                return;
            };
            let err = DataError::validation(format!("malformed sidecar frame: {}", e));
            let _ = replies.send(SidecarReply {
                id,
                outcome: SidecarOutcome::from_result(Err(err)),
            });
            return;
        }
    };

    if let Some(path) = debug_log {
        let project_id = match &frame.call {
            CallBatchItem::Start(req) => req.start.project_id.as_str(),
            CallBatchItem::End(req) => req.end.project_id.as_str(),
        };
        append_debug_line(path, project_id, &frame).await;
    }

    let queued = Queued {
        id: frame.id,
        item: frame.call,
        replies: replies.clone(),
    };
    if let Err(mpsc::error::SendError(queued)) = queue.send(queued).await {
        queued.reply(Err(DataError::backend_unavailable(
            "sidecar",
            "listener is shutting down",
        )));
    }
}

async fn write_replies(
    mut writer: OwnedWriteHalf,
    mut replies: mpsc::UnboundedReceiver<SidecarReply>,
) {
    while let Some(reply) = replies.recv().await {
        let line = match encode_line(&reply) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(id = reply.id, error = %e, "Failed to encode sidecar reply");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&line).await {
            tracing::debug!(error = %e, "Sidecar client went away");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn run_batcher(
    server: Arc<dyn TraceServer>,
    mut queue: mpsc::Receiver<Queued>,
    batch_max: usize,
    flush_interval: Duration,
) {
    let mut pending: Vec<Queued> = Vec::with_capacity(batch_max);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            queued = queue.recv() => match queued {
                Some(queued) => {
                    pending.push(queued);
                    if pending.len() >= batch_max {
                        flush(server.as_ref(), &mut pending).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(server.as_ref(), &mut pending).await;
                }
            }
        }
    }

    if !pending.is_empty() {
        flush(server.as_ref(), &mut pending).await;
    }
}

/// Apply pending events as one batch
///
/// If the batch fails, its events are applied one at a time so a single bad
/// event only fails its own caller.
async fn flush(server: &dyn TraceServer, pending: &mut Vec<Queued>) {
    let batch = std::mem::take(pending);
    let size = batch.len();
    let req = CallBatchReq {
        batch: batch.iter().map(|q| q.item.clone()).collect(),
    };

    match server.call_batch(req).await {
        Ok(res) if res.res.len() == size => {
            tracing::trace!(size, "Sidecar batch applied");
            for (queued, item) in batch.into_iter().zip(res.res) {
                queued.reply(Ok(item));
            }
        }
        Ok(res) => {
            tracing::warn!(size, answered = res.res.len(), "Sidecar batch answer size mismatch");
            apply_each(server, batch).await;
        }
        Err(e) => {
            tracing::debug!(size, error = %e, "Sidecar batch failed, applying events one by one");
            apply_each(server, batch).await;
        }
    }
}

async fn apply_each(server: &dyn TraceServer, batch: Vec<Queued>) {
    for queued in batch {
        let result = match queued.item.clone() {
            CallBatchItem::Start(req) => server.call_start(req).await.map(CallBatchItemRes::Start),
            CallBatchItem::End(req) => server.call_end(req).await.map(CallBatchItemRes::End),
        };
        queued.reply(result);
    }
}
