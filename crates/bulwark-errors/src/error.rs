//! Error types for the bulwark-errors crate.

use thiserror::Error;

/// Errors raised while configuring or running the classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// A `retry-after` value could not be interpreted.
    #[error("invalid retry-after value: {value}")]
    InvalidRetryAfter {
        /// The raw header value.
        value: String,
    },

    /// An unknown error type name was supplied.
    #[error("unknown error type: {name}")]
    UnknownErrorType {
        /// The name that could not be parsed.
        name: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for classifier operations.
pub type Result<T> = std::result::Result<T, ClassifierError>;
