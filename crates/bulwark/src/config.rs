//! Top-level configuration.
//!
//! One TOML document with a section per component. Every section is
//! optional and falls back to its defaults:
//!
//! ```toml
//! [retry]
//! max_retries = 5
//! jitter = false
//!
//! [network]
//! health_url = "https://api.example.com/health"
//! queue_snapshot_path = "/var/lib/bulwark/queue.json"
//!
//! [alerts]
//! default_rules = true
//!
//! [logging]
//! filter = "bulwark=debug"
//! json = true
//! ```

use std::path::Path;

use bulwark_alerts::AlertsConfig;
use bulwark_correlation::CorrelationConfig;
use bulwark_errors::ClassifierConfig;
use bulwark_network::NetworkConfig;
use bulwark_recovery::RecoveryConfig;
use bulwark_retry::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::error::{BulwarkError, Result};

/// Default tracing directive.
pub const DEFAULT_LOG_FILTER: &str = "bulwark=info";

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

/// Configuration for every Bulwark component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulwarkConfig {
    /// Error classifier.
    pub classifier: ClassifierConfig,
    /// Retry policy used by [`Bulwark::run_with_retry`](crate::Bulwark::run_with_retry).
    pub retry: RetryConfig,
    /// Connectivity monitor and offline queue.
    pub network: NetworkConfig,
    /// Recovery orchestrator.
    pub recovery: RecoveryConfig,
    /// Alert rule engine.
    pub alerts: AlertsConfig,
    /// Alert correlation.
    pub correlation: CorrelationConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl BulwarkConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BulwarkError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BulwarkError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BulwarkError::Config(format!("cannot serialize config: {e}")))
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.network.validate()?;
        self.recovery.validate()?;
        self.alerts.validate()?;
        self.correlation.validate()?;

        if self.logging.filter.trim().is_empty() {
            return Err(BulwarkError::Config(
                "logging.filter cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
