//! Error types for the bulwark-retry crate.

use std::time::Duration;

use bulwark_errors::CanonicalError;
use thiserror::Error;

use crate::engine::RetryAttempt;

/// The attempt history carried by a terminal retry error.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryHistory {
    /// Retries that were scheduled, in order.
    pub attempts: Vec<RetryAttempt>,
    /// Times the operation was invoked.
    pub calls: u32,
    /// Wall time from the first call to giving up.
    pub duration: Duration,
}

impl RetryHistory {
    /// Delay before each retry, in milliseconds.
    #[must_use]
    pub fn delays_ms(&self) -> Vec<u64> {
        self.attempts.iter().map(|a| a.delay_ms).collect()
    }
}

/// Errors returned when an operation could not be completed.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every allowed attempt failed.
    #[error("operation failed after {} calls: {last_error}", history.calls)]
    Exhausted {
        /// The last failure.
        last_error: Box<CanonicalError>,
        /// What was tried.
        history: RetryHistory,
    },

    /// The failure can not be fixed by retrying.
    #[error("operation failed with non-retryable error: {error}")]
    NonRetryable {
        /// The failure.
        error: Box<CanonicalError>,
        /// What was tried.
        history: RetryHistory,
    },

    /// A fallback chain was given no operations.
    #[error("no operations to try")]
    NoOperations,

    /// Invalid retry configuration.
    #[error("invalid retry configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },
}

impl RetryError {
    /// The last canonical error, if the operation ran at all.
    #[must_use]
    pub fn last_error(&self) -> Option<&CanonicalError> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::NonRetryable { error, .. } => Some(error),
            Self::NoOperations | Self::InvalidConfig { .. } => None,
        }
    }

    /// The attempt history, if the operation ran at all.
    #[must_use]
    pub const fn history(&self) -> Option<&RetryHistory> {
        match self {
            Self::Exhausted { history, .. } | Self::NonRetryable { history, .. } => Some(history),
            Self::NoOperations | Self::InvalidConfig { .. } => None,
        }
    }
}

/// Result type for retry operations.
pub type Result<T> = std::result::Result<T, RetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_no_operations() {
        assert_eq!(RetryError::NoOperations.to_string(), "no operations to try");
        assert!(RetryError::NoOperations.last_error().is_none());
        assert!(RetryError::NoOperations.history().is_none());
    }

    #[test]
    fn history_delays() {
        let history = RetryHistory {
            attempts: Vec::new(),
            calls: 1,
            duration: Duration::ZERO,
        };
        assert!(history.delays_ms().is_empty());
    }
}
