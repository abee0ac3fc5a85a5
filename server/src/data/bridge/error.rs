use thiserror::Error;

use crate::data::error::DataError;

/// Transport-level bridge failures
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("bridge request {method} timed out after {timeout_secs}s")]
    Timeout {
        method: &'static str,
        timeout_secs: u64,
    },

    #[error("bridge queue closed")]
    Closed,

    #[error("failed to encode bridge frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode bridge frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("unknown bridge method: {0}")]
    UnknownMethod(String),

    #[error("unexpected bridge response for {method}: {got}")]
    UnexpectedResponse { method: &'static str, got: &'static str },
}

impl From<BridgeError> for DataError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Timeout { timeout_secs, .. } => DataError::timeout("bridge", timeout_secs),
            BridgeError::Closed => DataError::backend_unavailable("bridge", "queue closed"),
            BridgeError::UnknownMethod(method) => {
                DataError::not_implemented(format!("bridge method {}", method))
            }
            other @ (BridgeError::Encode(_)
            | BridgeError::Decode(_)
            | BridgeError::UnexpectedResponse { .. }) => {
                DataError::Serialization(other.to_string())
            }
        }
    }
}
