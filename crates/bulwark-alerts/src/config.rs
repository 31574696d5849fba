//! Alert engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// Configuration for the [`crate::AlertManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Alerts kept in history; the oldest is evicted first.
    pub history_limit: usize,
    /// Alerts older than this are dropped by `cleanup_at`.
    pub retention_ms: u64,
    /// How often the escalation ticker runs.
    pub escalation_tick_ms: u64,
    /// How often expired alerts and correlations are purged.
    pub cleanup_interval_ms: u64,
    /// Seed the built-in rule set at startup.
    pub default_rules: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            retention_ms: 24 * 60 * 60 * 1000,
            escalation_tick_ms: 1000,
            cleanup_interval_ms: 10 * 60 * 1000,
            default_rules: true,
        }
    }
}

impl AlertsConfig {
    /// Retention window as a [`Duration`].
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    /// Escalation tick as a [`Duration`].
    #[must_use]
    pub const fn escalation_tick(&self) -> Duration {
        Duration::from_millis(self.escalation_tick_ms)
    }

    /// Cleanup interval as a [`Duration`].
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "history_limit must be greater than 0".to_string(),
            });
        }
        if self.escalation_tick_ms == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "escalation_tick_ms must be greater than 0".to_string(),
            });
        }
        if self.cleanup_interval_ms == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "cleanup_interval_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
