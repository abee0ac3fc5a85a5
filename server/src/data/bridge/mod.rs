//! Cross-process request/response bridge
//!
//! A [`BridgeClient`] and a [`BridgeWorker`] talk over two unidirectional
//! byte queues of MessagePack frames. The client is itself a
//! [`TraceServer`], so a process can hand its hot-path writes to a sibling
//! that owns the store without any caller noticing.

mod client;
mod error;
mod message;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

pub use client::BridgeClient;
pub use error::BridgeError;
pub use message::{BridgeRequest, BridgeResponse, ClientFrame, RemoteError, ResponseBody};
pub use worker::BridgeWorker;

use crate::core::config::{BridgeConfig, TablesConfig};
use crate::core::constants::BRIDGE_QUEUE_CAPACITY;
use crate::data::traits::TraceServer;

/// Connect a client to a worker serving `server`
///
/// Tables larger than `tables.chunk_target_bytes` are uploaded by the client
/// in concurrent chunks.
pub fn channel(
    server: Arc<dyn TraceServer>,
    config: &BridgeConfig,
    tables: &TablesConfig,
) -> (BridgeClient, BridgeWorker) {
    let (req_tx, req_rx) = mpsc::channel(BRIDGE_QUEUE_CAPACITY);
    let (res_tx, res_rx) = mpsc::channel(BRIDGE_QUEUE_CAPACITY);
    let client = BridgeClient::new(req_tx, res_rx, config).with_tables(tables);
    let worker = BridgeWorker::new(
        server,
        req_rx,
        res_tx,
        Duration::from_secs(config.timeout_secs),
    );
    (client, worker)
}
