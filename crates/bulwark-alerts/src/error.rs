//! Error types for the bulwark-alerts crate.

use thiserror::Error;

/// Errors raised by rule management and notification delivery.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The rule definition is malformed.
    #[error("invalid alert rule: {reason}")]
    InvalidRule {
        /// What is wrong with the rule.
        reason: String,
    },

    /// A rule with this ID is already registered.
    #[error("rule already exists: {id}")]
    DuplicateRule {
        /// The conflicting rule ID.
        id: String,
    },

    /// No rule with this ID is registered.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule ID that was not found.
        id: String,
    },

    /// No alert with this ID is in history.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The alert ID that was not found.
        id: String,
    },

    /// A channel could not deliver a notification.
    #[error("notification via {channel} failed: {reason}")]
    NotificationFailed {
        /// Channel name.
        channel: String,
        /// Failure detail.
        reason: String,
    },

    /// Engine configuration is out of range.
    #[error("invalid alerts config: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_rule() {
        let err = AlertError::InvalidRule {
            reason: "empty name".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert rule: empty name");
    }

    #[test]
    fn error_display_rule_not_found() {
        let err = AlertError::RuleNotFound {
            id: "critical_error_rate".to_string(),
        };
        assert_eq!(err.to_string(), "rule not found: critical_error_rate");
    }

    #[test]
    fn error_display_notification_failed() {
        let err = AlertError::NotificationFailed {
            channel: "pager".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "notification via pager failed: connection refused"
        );
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::SerializationError(_)));
    }
}
