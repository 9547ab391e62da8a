//! Error types for the state bus.

use thiserror::Error;

/// Main error type for bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Malformed patch: {0}")]
    MalformedPatch(String),

    #[error("Node is already stopped")]
    Stopped,

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Connection closed")]
    Disconnected,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
