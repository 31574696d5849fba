//! Error types for the bulwark-recovery crate.

use thiserror::Error;

/// Errors raised while configuring recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A strategy with the same name is already registered.
    #[error("recovery strategy already registered: {name}")]
    DuplicateStrategy {
        /// The strategy name.
        name: String,
    },

    /// The strategy can never run.
    #[error("invalid recovery strategy {name}: {reason}")]
    InvalidStrategy {
        /// The strategy name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid orchestrator configuration.
    #[error("invalid recovery configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },
}

/// Result type for recovery configuration.
pub type Result<T> = std::result::Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = RecoveryError::InvalidStrategy {
            name: "noop".to_string(),
            reason: "max_attempts is zero".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid recovery strategy noop: max_attempts is zero"
        );
    }
}
