//! Correlation engine configuration.

use std::collections::BTreeMap;

use bulwark_alerts::AlertSeverity;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{CorrelationError, Result};

/// Weights of the priority sub-scores. They must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of the severity score.
    pub severity: f64,
    /// Weight of the business impact score.
    pub business_impact: f64,
    /// Weight of the inverse frequency score.
    pub frequency: f64,
    /// Weight of the correlation confidence.
    pub correlation: f64,
    /// Weight of the user impact score.
    pub user_impact: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            severity: 0.30,
            business_impact: 0.25,
            frequency: 0.20,
            correlation: 0.15,
            user_impact: 0.10,
        }
    }
}

impl ScoreWeights {
    fn sum(&self) -> f64 {
        self.severity + self.business_impact + self.frequency + self.correlation + self.user_impact
    }
}

/// Minimum priority score needed to notify, per severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyThresholds {
    /// Threshold for critical alerts.
    pub critical: f64,
    /// Threshold for error alerts.
    pub error: f64,
    /// Threshold for warning alerts.
    pub warning: f64,
    /// Threshold for info alerts.
    pub info: f64,
}

impl Default for NotifyThresholds {
    fn default() -> Self {
        Self {
            critical: 0.6,
            error: 0.7,
            warning: 0.8,
            info: 0.9,
        }
    }
}

impl NotifyThresholds {
    /// Threshold for a severity.
    #[must_use]
    pub const fn for_severity(&self, severity: AlertSeverity) -> f64 {
        match severity {
            AlertSeverity::Critical => self.critical,
            AlertSeverity::Error => self.error,
            AlertSeverity::Warning => self.warning,
            AlertSeverity::Info => self.info,
        }
    }
}

/// Configuration for the [`crate::CorrelationEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Window in which repeated alerts are dropped as duplicates.
    pub dedup_window_ms: u64,
    /// Tag similarity at or above which same-rule alerts are duplicates.
    pub similarity_threshold: f64,
    /// Window for service patterns; spans beyond it reduce confidence.
    pub correlation_window_ms: u64,
    /// Window for temporal bursts.
    pub temporal_window_ms: u64,
    /// Alerts needed for a temporal burst.
    pub temporal_min_alerts: usize,
    /// Alerts needed for a service pattern.
    pub service_min_alerts: usize,
    /// How long after a critical alert related alerts count as a cascade.
    pub cascade_window_ms: u64,
    /// Correlation groups larger than this are treated as noise.
    pub max_group_size: usize,
    /// Window for the frequency score.
    pub frequency_window_ms: u64,
    /// History and correlations older than this are purged.
    pub retention_ms: u64,
    /// Alerts kept in history.
    pub history_limit: usize,
    /// Priority weights.
    pub weights: ScoreWeights,
    /// Notification thresholds.
    pub thresholds: NotifyThresholds,
    /// Business impact per subsystem name, matched against tags and rule IDs.
    pub business_impact: BTreeMap<String, f64>,
    /// Subsystems whose failures users see directly.
    pub user_facing: Vec<String>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        let business_impact = [
            ("payment", 1.0),
            ("billing", 0.9),
            ("auth", 0.9),
            ("database", 0.8),
            ("analysis", 0.7),
            ("api", 0.7),
            ("ui", 0.6),
            ("monitoring", 0.3),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let user_facing = ["ui", "frontend", "checkout", "auth", "api", "user"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            dedup_window_ms: 5 * 60 * 1000,
            similarity_threshold: 0.8,
            correlation_window_ms: 10 * 60 * 1000,
            temporal_window_ms: 2 * 60 * 1000,
            temporal_min_alerts: 3,
            service_min_alerts: 2,
            cascade_window_ms: 5 * 60 * 1000,
            max_group_size: 50,
            frequency_window_ms: 24 * 60 * 60 * 1000,
            retention_ms: 24 * 60 * 60 * 1000,
            history_limit: 1000,
            weights: ScoreWeights::default(),
            thresholds: NotifyThresholds::default(),
            business_impact,
            user_facing,
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

impl CorrelationConfig {
    /// Duplicate window.
    #[must_use]
    pub fn dedup_window(&self) -> Duration {
        millis(self.dedup_window_ms)
    }

    /// Correlation window.
    #[must_use]
    pub fn correlation_window(&self) -> Duration {
        millis(self.correlation_window_ms)
    }

    /// Temporal burst window.
    #[must_use]
    pub fn temporal_window(&self) -> Duration {
        millis(self.temporal_window_ms)
    }

    /// Cascade window.
    #[must_use]
    pub fn cascade_window(&self) -> Duration {
        millis(self.cascade_window_ms)
    }

    /// Frequency window.
    #[must_use]
    pub fn frequency_window(&self) -> Duration {
        millis(self.frequency_window_ms)
    }

    /// Retention window.
    #[must_use]
    pub fn retention(&self) -> Duration {
        millis(self.retention_ms)
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(CorrelationError::InvalidConfig { reason });

        if (self.weights.sum() - 1.0).abs() > 1e-6 {
            return invalid(format!(
                "score weights must sum to 1.0, got {:.3}",
                self.weights.sum()
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return invalid("similarity_threshold must be within [0, 1]".to_string());
        }
        let t = &self.thresholds;
        for (name, value) in [
            ("critical", t.critical),
            ("error", t.error),
            ("warning", t.warning),
            ("info", t.info),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} threshold must be within [0, 1]"));
            }
        }
        if let Some((name, _)) = self
            .business_impact
            .iter()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return invalid(format!("business impact for '{name}' must be within [0, 1]"));
        }
        if self.temporal_min_alerts < 2 {
            return invalid("temporal_min_alerts must be at least 2".to_string());
        }
        if self.history_limit == 0 || self.max_group_size == 0 {
            return invalid("history_limit and max_group_size must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = CorrelationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dedup_window(), Duration::minutes(5));
        assert_eq!(config.correlation_window(), Duration::minutes(10));
        assert_eq!(config.max_group_size, 50);
    }

    #[test]
    fn weights_must_sum_to_one() {
        let config = CorrelationConfig {
            weights: ScoreWeights {
                severity: 0.9,
                ..ScoreWeights::default()
            },
            ..CorrelationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range() {
        let config = CorrelationConfig {
            thresholds: NotifyThresholds {
                info: 1.5,
                ..NotifyThresholds::default()
            },
            ..CorrelationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn thresholds_by_severity() {
        let t = NotifyThresholds::default();
        assert!((t.for_severity(AlertSeverity::Critical) - 0.6).abs() < f64::EPSILON);
        assert!((t.for_severity(AlertSeverity::Info) - 0.9).abs() < f64::EPSILON);
    }
}
