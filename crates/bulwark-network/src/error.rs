//! Error types for the bulwark-network crate.

use thiserror::Error;

/// Errors that can occur in connectivity monitoring and the offline queue.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Waiting for connectivity timed out.
    #[error("connection not restored within {timeout_ms}ms")]
    ConnectionTimeout {
        /// How long the caller waited.
        timeout_ms: u64,
    },

    /// The offline queue is disabled.
    #[error("offline queue is disabled")]
    QueueDisabled,

    /// An operation with the same ID is already queued.
    #[error("operation {id} is already queued")]
    DuplicateOperation {
        /// The operation ID.
        id: String,
    },

    /// The monitor was shut down while a caller was waiting.
    #[error("network monitor closed")]
    MonitorClosed,

    /// Invalid configuration.
    #[error("invalid network configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// The queue snapshot could not be read or written.
    #[error("queue persistence failed: {0}")]
    Persistence(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
