//! The alert processing pipeline.
//!
//! [`CorrelationEngine::process_alert_at`] runs four steps for every alert:
//!
//! 1. drop duplicates of a recent alert from the same rule;
//! 2. compute a [`PriorityScore`];
//! 3. detect a pattern and add the alert to the matching correlation;
//! 4. decide whether a human should be notified.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use bulwark_alerts::{Alert, AlertSeverity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CorrelationConfig;
use crate::error::Result;
use crate::patterns::{AlertCorrelation, CorrelationPattern, SeenAlert, detect_pattern};
use crate::scoring::{PriorityScore, tag_similarity};

/// Critical alerts at or above this score are always sent.
pub const CRITICAL_FLOOR: f64 = 0.6;

/// Why an alert was not sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SuppressReason {
    /// Repeats a recent alert.
    Duplicate {
        /// The alert it repeats.
        of: String,
    },
    /// Priority below the severity's threshold.
    LowPriority {
        /// The threshold that was missed.
        threshold: f64,
    },
    /// Part of a correlation group too large to be useful.
    Noise {
        /// Size of the group.
        group_size: usize,
    },
}

/// What to do with an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Send it.
    Notify,
    /// Hold it back.
    Suppress(SuppressReason),
}

/// The outcome of processing one alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDecision {
    /// The alert processed.
    pub alert_id: String,
    /// Notify or suppress.
    pub decision: Decision,
    /// Priority, absent for duplicates.
    pub priority: Option<PriorityScore>,
    /// The correlation the alert joined, or the full group that turned it away.
    pub correlation: Option<AlertCorrelation>,
}

impl AlertDecision {
    /// Returns true if the alert should be sent.
    #[must_use]
    pub fn should_notify(&self) -> bool {
        matches!(self.decision, Decision::Notify)
    }

    /// Returns true if the alert was dropped as a duplicate.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self.decision,
            Decision::Suppress(SuppressReason::Duplicate { .. })
        )
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationStats {
    /// Alerts processed.
    pub processed: u64,
    /// Alerts dropped as duplicates.
    pub duplicates: u64,
    /// Alerts that should be sent.
    pub notified: u64,
    /// Alerts held back for priority or noise.
    pub suppressed: u64,
    /// Live correlation groups.
    pub active_correlations: usize,
    /// Alerts that belong to a correlation.
    pub correlated_alerts: usize,
    /// Alerts in history.
    pub history_size: usize,
}

/// What `cleanup_at` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// History entries removed.
    pub alerts: usize,
    /// Correlations removed.
    pub correlations: usize,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    duplicates: AtomicU64,
    notified: AtomicU64,
    suppressed: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
    history: VecDeque<SeenAlert>,
    correlations: HashMap<CorrelationPattern, AlertCorrelation>,
    membership: HashMap<String, CorrelationPattern>,
}

impl State {
    fn correlation_of(&self, alert_id: &str) -> Option<&AlertCorrelation> {
        self.membership
            .get(alert_id)
            .and_then(|p| self.correlations.get(p))
    }

    fn rule_confidence(&self, rule_id: &str) -> f64 {
        self.correlations
            .values()
            .filter(|c| c.rule_ids.contains(rule_id))
            .map(|c| c.confidence)
            .fold(0.0, f64::max)
    }
}

/// Deduplicates, scores and correlates alerts.
#[derive(Debug)]
pub struct CorrelationEngine {
    config: CorrelationConfig,
    state: Mutex<State>,
    counters: Counters,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self {
            config: CorrelationConfig::default(),
            state: Mutex::new(State::default()),
            counters: Counters::default(),
        }
    }
}

impl CorrelationEngine {
    /// Creates an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine after validating `config`.
    pub fn with_config(config: CorrelationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Processes an alert received now.
    pub fn process_alert(&self, alert: &Alert) -> AlertDecision {
        self.process_alert_at(alert, Utc::now())
    }

    /// Processes an alert received at `now`.
    pub fn process_alert_at(&self, alert: &Alert, now: DateTime<Utc>) -> AlertDecision {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        let config = &self.config;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(original) = self.find_duplicate(&state.history, alert, now) {
            debug!(alert_id = %alert.id, duplicate_of = %original, "duplicate alert dropped");
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            return AlertDecision {
                alert_id: alert.id.clone(),
                decision: Decision::Suppress(SuppressReason::Duplicate { of: original }),
                priority: None,
                correlation: None,
            };
        }

        let frequency_cutoff = now - config.frequency_window();
        let occurrences = state
            .history
            .iter()
            .filter(|s| s.alert.rule_id == alert.rule_id && s.received_at >= frequency_cutoff)
            .count()
            + 1;
        let priority = PriorityScore::for_alert(
            alert,
            config,
            occurrences,
            state.rule_confidence(&alert.rule_id),
        );

        let current = SeenAlert {
            alert: alert.clone(),
            received_at: now,
        };
        let matched = if state.membership.contains_key(&alert.id) {
            None
        } else {
            self.correlate(state, &current, now)
        };
        state.history.push_back(current);
        while state.history.len() > config.history_limit {
            state.history.pop_front();
        }

        let correlation = matched
            .and_then(|pattern| state.correlations.get(&pattern))
            .or_else(|| state.correlation_of(&alert.id))
            .cloned();
        let decision = self.decide(alert.severity, &priority, correlation.as_ref());
        match &decision {
            Decision::Notify => {
                self.counters.notified.fetch_add(1, Ordering::Relaxed);
            }
            Decision::Suppress(reason) => {
                debug!(alert_id = %alert.id, reason = ?reason, score = priority.total, "alert suppressed");
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            }
        }

        AlertDecision {
            alert_id: alert.id.clone(),
            decision,
            priority: Some(priority),
            correlation,
        }
    }

    fn find_duplicate(
        &self,
        history: &VecDeque<SeenAlert>,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let cutoff = now - self.config.dedup_window();
        history
            .iter()
            .rev()
            .take_while(|s| s.received_at >= cutoff)
            .filter(|s| s.alert.rule_id == alert.rule_id && s.received_at <= now)
            .find(|s| {
                (s.alert.message == alert.message && s.alert.tags == alert.tags)
                    || tag_similarity(&s.alert.tags, &alert.tags) >= self.config.similarity_threshold
            })
            .map(|s| s.alert.id.clone())
    }

    /// Adds the detected group's members, returning the group the alert
    /// matched. A full group records the alert as overflow instead.
    fn correlate(
        &self,
        state: &mut State,
        current: &SeenAlert,
        now: DateTime<Utc>,
    ) -> Option<CorrelationPattern> {
        let detection = {
            let recent: Vec<&SeenAlert> = state.history.iter().collect();
            detect_pattern(&recent, current, &self.config)
        }?;

        let window = self.config.correlation_window();
        let capacity = self.config.max_group_size;
        let correlation = state
            .correlations
            .entry(detection.pattern.clone())
            .or_insert_with(|| {
                info!(pattern = %detection.pattern, "new alert correlation");
                AlertCorrelation::new(detection.pattern.clone(), now)
            });

        for member in &detection.members {
            match state.membership.get(&member.alert_id) {
                Some(pattern) if pattern != &detection.pattern => continue,
                _ => {}
            }
            if correlation.len() >= capacity {
                if member.alert_id == current.alert.id {
                    correlation.overflow += 1;
                    correlation.last_updated = now;
                }
                continue;
            }
            if correlation.add_member(member, now) {
                state
                    .membership
                    .insert(member.alert_id.clone(), detection.pattern.clone());
            }
        }
        correlation.refresh_confidence(window);
        debug!(
            pattern = %detection.pattern,
            members = correlation.len(),
            overflow = correlation.overflow,
            confidence = correlation.confidence,
            "correlation updated"
        );
        Some(detection.pattern)
    }

    fn decide(
        &self,
        severity: AlertSeverity,
        priority: &PriorityScore,
        correlation: Option<&AlertCorrelation>,
    ) -> Decision {
        if let Some(group) = correlation.filter(|g| g.size() > self.config.max_group_size) {
            return Decision::Suppress(SuppressReason::Noise {
                group_size: group.size(),
            });
        }

        let threshold = self.config.thresholds.for_severity(severity);
        let critical_floor = severity == AlertSeverity::Critical && priority.total >= CRITICAL_FLOOR;
        if critical_floor || priority.total >= threshold {
            Decision::Notify
        } else {
            Decision::Suppress(SuppressReason::LowPriority { threshold })
        }
    }

    /// Purges history and correlations older than the retention window.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let cutoff = now - self.config.retention();
        let mut state = self.state.lock();

        let before_alerts = state.history.len();
        state.history.retain(|s| s.received_at >= cutoff);
        let before_correlations = state.correlations.len();
        state.correlations.retain(|_, c| c.last_updated >= cutoff);
        let State {
            correlations,
            membership,
            ..
        } = &mut *state;
        membership.retain(|_, pattern| correlations.contains_key(pattern));

        let report = CleanupReport {
            alerts: before_alerts - state.history.len(),
            correlations: before_correlations - state.correlations.len(),
        };
        if report != CleanupReport::default() {
            info!(
                alerts = report.alerts,
                correlations = report.correlations,
                "correlation state purged"
            );
        }
        report
    }

    /// Purges stale state using the current time.
    pub fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(Utc::now())
    }

    /// Live correlations, oldest first.
    #[must_use]
    pub fn correlations(&self) -> Vec<AlertCorrelation> {
        let mut all: Vec<AlertCorrelation> =
            self.state.lock().correlations.values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    /// The correlation an alert belongs to.
    #[must_use]
    pub fn correlation_for(&self, alert_id: &str) -> Option<AlertCorrelation> {
        self.state.lock().correlation_of(alert_id).cloned()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CorrelationStats {
        let state = self.state.lock();
        CorrelationStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            notified: self.counters.notified.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            active_correlations: state.correlations.len(),
            correlated_alerts: state.membership.len(),
            history_size: state.history.len(),
        }
    }
}
