use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::error::BridgeError;
use super::message::{
    BridgeRequest, BridgeResponse, ClientFrame, RemoteError, RequestId, ResponseBody, decode,
    encode, methods,
};
use crate::data::error::DataError;
use crate::data::traits::TraceServer;

type EncodedRows = BoxStream<'static, Result<Vec<u8>, DataError>>;

macro_rules! unary {
    ($server:expr, $payload:expr, $op:ident) => {
        encode(&$server.$op(decode($payload)?).await?)?
    };
}

/// Serves bridge requests against any [`TraceServer`]
///
/// Each request runs on its own task, so responses leave in completion
/// order. The loop ends on a `Stop` frame or when the request queue closes.
pub struct BridgeWorker {
    server: Arc<dyn TraceServer>,
    requests: mpsc::Receiver<Vec<u8>>,
    responses: mpsc::Sender<Vec<u8>>,
    drain_timeout: Duration,
}

impl BridgeWorker {
    pub fn new(
        server: Arc<dyn TraceServer>,
        requests: mpsc::Receiver<Vec<u8>>,
        responses: mpsc::Sender<Vec<u8>>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            server,
            requests,
            responses,
            drain_timeout,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("Bridge worker started");
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                frame = self.requests.recv() => {
                    let Some(bytes) = frame else {
                        tracing::debug!("Bridge request queue closed");
                        break;
                    };
                    match decode::<ClientFrame>(&bytes) {
                        Ok(ClientFrame::Stop) => {
                            tracing::debug!("Bridge worker received stop");
                            break;
                        }
                        Ok(ClientFrame::Request(req)) => {
                            let server = Arc::clone(&self.server);
                            let tx = self.responses.clone();
                            tasks.spawn(handle(server, tx, req));
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropping undecodable bridge frame"),
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Bridge request task failed");
                    }
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            tracing::debug!(in_flight, "Draining bridge requests");
            let drain = async { while tasks.join_next().await.is_some() {} };
            if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
                tracing::warn!(in_flight = tasks.len(), "Aborting unfinished bridge requests");
                tasks.shutdown().await;
            }
        }
        tracing::debug!("Bridge worker stopped");
    }
}

async fn handle(server: Arc<dyn TraceServer>, tx: mpsc::Sender<Vec<u8>>, req: BridgeRequest) {
    let id = req.id;
    tracing::trace!(id, method = %req.method, "Bridge request received");

    if matches!(
        req.method.as_str(),
        methods::CALLS_QUERY_STREAM | methods::TABLE_QUERY_STREAM
    ) {
        let mut rows = match open_stream(server.as_ref(), &req.method, &req.payload).await {
            Ok(rows) => rows,
            Err(e) => {
                respond(&tx, id, ResponseBody::Error(RemoteError::from(&e))).await;
                return;
            }
        };
        while let Some(row) = rows.next().await {
            let body = match row {
                Ok(bytes) => ResponseBody::Item(bytes),
                Err(e) => {
                    respond(&tx, id, ResponseBody::Error(RemoteError::from(&e))).await;
                    return;
                }
            };
            if !respond(&tx, id, body).await {
                return;
            }
        }
        respond(&tx, id, ResponseBody::StreamEnd).await;
    } else {
        let body = match dispatch(server.as_ref(), &req.method, &req.payload).await {
            Ok(bytes) => ResponseBody::Value(bytes),
            Err(e) => ResponseBody::Error(RemoteError::from(&e)),
        };
        respond(&tx, id, body).await;
    }
}

/// Returns false once the client side is gone
async fn respond(tx: &mpsc::Sender<Vec<u8>>, id: RequestId, body: ResponseBody) -> bool {
    let frame = match encode(&BridgeResponse { id, body }) {
        Ok(frame) => frame,
        Err(e) => {
            let err = DataError::from(e);
            let fallback = BridgeResponse {
                id,
                body: ResponseBody::Error(RemoteError::from(&err)),
            };
            match encode(&fallback) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(id, error = %e, "Failed to encode bridge error response");
                    return false;
                }
            }
        }
    };
    tx.send(frame).await.is_ok()
}

async fn dispatch(
    server: &dyn TraceServer,
    method: &str,
    payload: &[u8],
) -> Result<Vec<u8>, DataError> {
    let bytes = match method {
        methods::CALL_START => unary!(server, payload, call_start),
        methods::CALL_END => unary!(server, payload, call_end),
        methods::CALL_BATCH => unary!(server, payload, call_batch),
        methods::CALL_READ => unary!(server, payload, call_read),
        methods::CALLS_QUERY => unary!(server, payload, calls_query),
        methods::CALLS_QUERY_STATS => unary!(server, payload, calls_query_stats),
        methods::CALLS_DELETE => unary!(server, payload, calls_delete),
        methods::CALL_UPDATE => unary!(server, payload, call_update),
        methods::THREADS_QUERY => unary!(server, payload, threads_query),
        methods::PROJECT_STATS => unary!(server, payload, project_stats),
        methods::OBJ_CREATE => unary!(server, payload, obj_create),
        methods::OBJ_READ => unary!(server, payload, obj_read),
        methods::OBJS_QUERY => unary!(server, payload, objs_query),
        methods::OBJ_DELETE => unary!(server, payload, obj_delete),
        methods::TABLE_CREATE => unary!(server, payload, table_create),
        methods::TABLE_CREATE_FROM_DIGESTS => unary!(server, payload, table_create_from_digests),
        methods::TABLE_UPDATE => unary!(server, payload, table_update),
        methods::TABLE_QUERY => unary!(server, payload, table_query),
        methods::TABLE_QUERY_STATS => unary!(server, payload, table_query_stats),
        methods::REFS_READ_BATCH => unary!(server, payload, refs_read_batch),
        methods::FILE_CREATE => unary!(server, payload, file_create),
        methods::FILE_CONTENT_READ => unary!(server, payload, file_content_read),
        methods::FEEDBACK_CREATE => unary!(server, payload, feedback_create),
        methods::FEEDBACK_QUERY => unary!(server, payload, feedback_query),
        methods::FEEDBACK_PURGE => unary!(server, payload, feedback_purge),
        methods::FEEDBACK_REPLACE => unary!(server, payload, feedback_replace),
        other => return Err(BridgeError::UnknownMethod(other.to_string()).into()),
    };
    Ok(bytes)
}

async fn open_stream(
    server: &dyn TraceServer,
    method: &str,
    payload: &[u8],
) -> Result<EncodedRows, DataError> {
    let rows: EncodedRows = match method {
        methods::CALLS_QUERY_STREAM => server
            .calls_query_stream(decode(payload)?)
            .await?
            .map(|row| row.and_then(|r| encode(&r).map_err(DataError::from)))
            .boxed(),
        methods::TABLE_QUERY_STREAM => server
            .table_query_stream(decode(payload)?)
            .await?
            .map(|row| row.and_then(|r| encode(&r).map_err(DataError::from)))
            .boxed(),
        other => return Err(BridgeError::UnknownMethod(other.to_string()).into()),
    };
    Ok(rows)
}
