//! Error types for the bulwark crate.

use thiserror::Error;

/// Errors raised while building or running a [`Bulwark`](crate::Bulwark).
#[derive(Debug, Error)]
pub enum BulwarkError {
    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The tracing subscriber could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Classifier failure.
    #[error(transparent)]
    Classifier(#[from] bulwark_errors::ClassifierError),

    /// Network monitor failure.
    #[error(transparent)]
    Network(#[from] bulwark_network::NetworkError),

    /// Retry configuration failure.
    #[error(transparent)]
    Retry(#[from] bulwark_retry::RetryError),

    /// Recovery orchestrator failure.
    #[error(transparent)]
    Recovery(#[from] bulwark_recovery::RecoveryError),

    /// Alert engine failure.
    #[error(transparent)]
    Alert(#[from] bulwark_alerts::AlertError),

    /// Correlation engine failure.
    #[error(transparent)]
    Correlation(#[from] bulwark_correlation::CorrelationError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bulwark operations.
pub type Result<T> = std::result::Result<T, BulwarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = BulwarkError::Config("invalid TOML".to_string());
        assert_eq!(err.to_string(), "configuration error: invalid TOML");
    }

    #[test]
    fn wraps_alert_errors() {
        let err: BulwarkError = bulwark_alerts::AlertError::RuleNotFound {
            id: "cpu".to_string(),
        }
        .into();
        assert!(matches!(err, BulwarkError::Alert(_)));
        assert!(err.to_string().contains("cpu"));
    }
}
