//! Error types for the bulwark-correlation crate.

use thiserror::Error;

/// Errors raised by the correlation engine.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// Engine configuration is out of range.
    #[error("invalid correlation config: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CorrelationError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for correlation operations.
pub type Result<T> = std::result::Result<T, CorrelationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_config() {
        let err = CorrelationError::InvalidConfig {
            reason: "weights must sum to 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid correlation config: weights must sum to 1"
        );
    }
}
