//! Pattern detection over recent alerts.
//!
//! Three patterns are recognised, checked in this order:
//!
//! - **Temporal burst**: several alerts of one rule (or with near-identical
//!   tags) in a short window.
//! - **Service pattern**: alerts from distinct rules sharing a `service` tag
//!   within the correlation window.
//! - **Cascade**: an alert sharing `service` or `component` with an earlier
//!   critical alert from another rule.

use std::collections::BTreeSet;
use std::fmt;

use bulwark_alerts::{Alert, AlertSeverity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CorrelationConfig;
use crate::scoring::tag_similarity;

/// Kind of correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Burst of similar alerts.
    Temporal,
    /// Several rules failing for one service.
    Service,
    /// Fallout after a critical alert.
    Cascade,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporal => write!(f, "temporal"),
            Self::Service => write!(f, "service"),
            Self::Cascade => write!(f, "cascade"),
        }
    }
}

/// Identifies a correlation group: pattern plus grouping key.
///
/// The key is the rule ID for temporal bursts, the service name for service
/// patterns and the root alert ID for cascades.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationPattern {
    /// Pattern kind.
    pub pattern_type: PatternType,
    /// Grouping key.
    pub key: String,
}

impl CorrelationPattern {
    /// Creates a pattern.
    #[must_use]
    pub fn new(pattern_type: PatternType, key: impl Into<String>) -> Self {
        Self {
            pattern_type,
            key: key.into(),
        }
    }
}

impl fmt::Display for CorrelationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pattern_type, self.key)
    }
}

/// Confidence of a group: `min(count / 10, 1)`, reduced by 30% when the
/// group spans longer than `window`.
#[must_use]
pub fn confidence(count: usize, span: Duration, window: Duration) -> f64 {
    let base = (count as f64 / 10.0).min(1.0);
    if span > window { base * 0.7 } else { base }
}

/// A group of related alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCorrelation {
    /// Unique identifier.
    pub id: String,
    /// What ties the alerts together.
    pub pattern: CorrelationPattern,
    /// Member alerts in the order they joined.
    pub alert_ids: Vec<String>,
    /// Rules of the member alerts.
    pub rule_ids: BTreeSet<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// When the group was created.
    pub created_at: DateTime<Utc>,
    /// When a member was last added.
    pub last_updated: DateTime<Utc>,
    /// Earliest member arrival.
    pub first_seen: DateTime<Utc>,
    /// Latest member arrival.
    pub last_seen: DateTime<Utc>,
    /// Matching alerts turned away because the group was full.
    #[serde(default)]
    pub overflow: usize,
}

impl AlertCorrelation {
    /// Creates an empty group.
    #[must_use]
    pub fn new(pattern: CorrelationPattern, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pattern,
            alert_ids: Vec::new(),
            rule_ids: BTreeSet::new(),
            confidence: 0.0,
            created_at: now,
            last_updated: now,
            first_seen: now,
            last_seen: now,
            overflow: 0,
        }
    }

    /// Number of member alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alert_ids.len()
    }

    /// Alerts that matched the group, stored or turned away.
    #[must_use]
    pub fn size(&self) -> usize {
        self.alert_ids.len() + self.overflow
    }

    /// Returns true if the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alert_ids.is_empty()
    }

    /// Time between the first and last member.
    #[must_use]
    pub fn span(&self) -> Duration {
        self.last_seen - self.first_seen
    }

    /// Adds a member. Returns false if it was already present.
    pub fn add_member(&mut self, member: &MemberRef, now: DateTime<Utc>) -> bool {
        if self.alert_ids.iter().any(|id| id == &member.alert_id) {
            return false;
        }
        if self.alert_ids.is_empty() {
            self.first_seen = member.received_at;
            self.last_seen = member.received_at;
        } else {
            self.first_seen = self.first_seen.min(member.received_at);
            self.last_seen = self.last_seen.max(member.received_at);
        }
        self.alert_ids.push(member.alert_id.clone());
        self.rule_ids.insert(member.rule_id.clone());
        self.last_updated = now;
        true
    }

    /// Recomputes confidence from size and span.
    pub fn refresh_confidence(&mut self, window: Duration) {
        self.confidence = confidence(self.len(), self.span(), window);
    }
}

/// An alert as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenAlert {
    /// The alert.
    pub alert: Alert,
    /// When the engine received it.
    pub received_at: DateTime<Utc>,
}

impl SeenAlert {
    fn member(&self) -> MemberRef {
        MemberRef {
            alert_id: self.alert.id.clone(),
            rule_id: self.alert.rule_id.clone(),
            received_at: self.received_at,
        }
    }

    fn within(&self, current: &Self, window: Duration) -> bool {
        let age = current.received_at - self.received_at;
        age >= Duration::zero() && age <= window
    }
}

/// The parts of an alert a correlation keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Alert ID.
    pub alert_id: String,
    /// Rule ID.
    pub rule_id: String,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

/// A detected pattern and the alerts that form it, current alert last.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The group the alerts belong to.
    pub pattern: CorrelationPattern,
    /// Members, including the current alert.
    pub members: Vec<MemberRef>,
}

/// Burst of same-rule or tag-similar alerts.
#[must_use]
pub fn detect_temporal(
    recent: &[&SeenAlert],
    current: &SeenAlert,
    config: &CorrelationConfig,
) -> Option<Detection> {
    let window = config.temporal_window();
    let mut members: Vec<MemberRef> = recent
        .iter()
        .filter(|s| s.alert.id != current.alert.id && s.within(current, window))
        .filter(|s| {
            s.alert.rule_id == current.alert.rule_id
                || tag_similarity(&s.alert.tags, &current.alert.tags) >= config.similarity_threshold
        })
        .map(|s| s.member())
        .collect();

    if members.len() + 1 < config.temporal_min_alerts {
        return None;
    }
    members.push(current.member());
    Some(Detection {
        pattern: CorrelationPattern::new(PatternType::Temporal, current.alert.rule_id.clone()),
        members,
    })
}

/// Distinct rules failing for the same service.
#[must_use]
pub fn detect_service(
    recent: &[&SeenAlert],
    current: &SeenAlert,
    config: &CorrelationConfig,
) -> Option<Detection> {
    let service = current.alert.service()?;
    let window = config.correlation_window();
    let mut members: Vec<MemberRef> = recent
        .iter()
        .filter(|s| s.alert.id != current.alert.id && s.within(current, window))
        .filter(|s| s.alert.service() == Some(service))
        .map(|s| s.member())
        .collect();
    members.push(current.member());

    let rules: BTreeSet<&str> = members.iter().map(|m| m.rule_id.as_str()).collect();
    if members.len() < config.service_min_alerts || rules.len() < 2 {
        return None;
    }
    Some(Detection {
        pattern: CorrelationPattern::new(PatternType::Service, service),
        members,
    })
}

fn shares_scope(a: &Alert, b: &Alert) -> bool {
    ["service", "component"].iter().any(|key| {
        matches!((a.tags.get(*key), b.tags.get(*key)), (Some(x), Some(y)) if x == y)
    })
}

/// A later alert related to an earlier critical alert.
#[must_use]
pub fn detect_cascade(
    recent: &[&SeenAlert],
    current: &SeenAlert,
    config: &CorrelationConfig,
) -> Option<Detection> {
    let window = config.cascade_window();
    let root = recent
        .iter()
        .filter(|s| s.alert.id != current.alert.id && s.within(current, window))
        .filter(|s| s.alert.severity == AlertSeverity::Critical)
        .filter(|s| s.alert.rule_id != current.alert.rule_id)
        .filter(|s| shares_scope(&s.alert, &current.alert))
        .min_by_key(|s| s.received_at)?;

    Some(Detection {
        pattern: CorrelationPattern::new(PatternType::Cascade, root.alert.id.clone()),
        members: vec![root.member(), current.member()],
    })
}

/// First matching pattern: temporal, then service, then cascade.
#[must_use]
pub fn detect_pattern(
    recent: &[&SeenAlert],
    current: &SeenAlert,
    config: &CorrelationConfig,
) -> Option<Detection> {
    detect_temporal(recent, current, config)
        .or_else(|| detect_service(recent, current, config))
        .or_else(|| detect_cascade(recent, current, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_alerts::AlertRule;

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn seen(rule_id: &str, severity: AlertSeverity, tags: &[(&str, &str)], secs: i64) -> SeenAlert {
        let mut builder = AlertRule::builder(rule_id, rule_id)
            .predicate(|_| true)
            .severity(severity);
        for (k, v) in tags {
            builder = builder.tag(*k, *v);
        }
        let at = base() + Duration::seconds(secs);
        SeenAlert {
            alert: Alert::from_rule(&builder.build().unwrap(), None, at),
            received_at: at,
        }
    }

    mod confidence_tests {
        use super::*;

        #[test]
        fn grows_with_count_and_caps() {
            let w = Duration::minutes(10);
            assert!((confidence(3, Duration::zero(), w) - 0.3).abs() < 1e-12);
            assert!((confidence(10, Duration::zero(), w) - 1.0).abs() < 1e-12);
            assert!((confidence(25, Duration::zero(), w) - 1.0).abs() < 1e-12);
        }

        #[test]
        fn long_span_penalized() {
            let w = Duration::minutes(10);
            assert!((confidence(5, Duration::minutes(11), w) - 0.35).abs() < 1e-12);
        }

        #[test]
        fn add_member_tracks_span() {
            let a = seen("r", AlertSeverity::Error, &[], 0);
            let b = seen("r", AlertSeverity::Error, &[], 120);
            let mut group = AlertCorrelation::new(CorrelationPattern::new(PatternType::Temporal, "r"), base());
            assert!(group.add_member(&a.member(), base()));
            assert!(group.add_member(&b.member(), base()));
            assert!(!group.add_member(&b.member(), base()));
            assert_eq!(group.span(), Duration::seconds(120));
        }
    }

    mod detection_tests {
        use super::*;

        #[test]
        fn temporal_needs_three() {
            let config = CorrelationConfig::default();
            let a = seen("r", AlertSeverity::Error, &[("instance", "1")], 0);
            let b = seen("r", AlertSeverity::Error, &[("instance", "2")], 30);
            let c = seen("r", AlertSeverity::Error, &[("instance", "3")], 60);

            assert!(detect_temporal(&[&a], &b, &config).is_none());
            let detection = detect_temporal(&[&a, &b], &c, &config).unwrap();
            assert_eq!(detection.pattern, CorrelationPattern::new(PatternType::Temporal, "r"));
            assert_eq!(detection.members.len(), 3);
        }

        #[test]
        fn temporal_ignores_old_alerts() {
            let config = CorrelationConfig::default();
            let a = seen("r", AlertSeverity::Error, &[], 0);
            let b = seen("r", AlertSeverity::Error, &[], 100);
            let c = seen("r", AlertSeverity::Error, &[], 200);
            assert!(detect_temporal(&[&a, &b], &c, &config).is_none());
        }

        #[test]
        fn service_needs_distinct_rules() {
            let config = CorrelationConfig::default();
            let a = seen("latency", AlertSeverity::Warning, &[("service", "api")], 0);
            let same = seen("latency", AlertSeverity::Warning, &[("service", "api")], 60);
            let other = seen("errors", AlertSeverity::Warning, &[("service", "api")], 60);

            assert!(detect_service(&[&a], &same, &config).is_none());
            let detection = detect_service(&[&a], &other, &config).unwrap();
            assert_eq!(detection.pattern.key, "api");
        }

        #[test]
        fn cascade_from_critical_root() {
            let config = CorrelationConfig::default();
            let root = seen("db_down", AlertSeverity::Critical, &[("component", "db")], 0);
            let fallout = seen("slow_queries", AlertSeverity::Warning, &[("component", "db")], 120);
            let late = seen("slow_queries", AlertSeverity::Warning, &[("component", "db")], 400);

            let detection = detect_cascade(&[&root], &fallout, &config).unwrap();
            assert_eq!(detection.pattern.pattern_type, PatternType::Cascade);
            assert_eq!(detection.pattern.key, root.alert.id);
            assert!(detect_cascade(&[&root], &late, &config).is_none());
        }

        #[test]
        fn cascade_requires_shared_scope() {
            let config = CorrelationConfig::default();
            let root = seen("db_down", AlertSeverity::Critical, &[("component", "db")], 0);
            let unrelated = seen("cdn", AlertSeverity::Warning, &[("component", "cdn")], 10);
            assert!(detect_cascade(&[&root], &unrelated, &config).is_none());
        }

        #[test]
        fn temporal_checked_first() {
            let config = CorrelationConfig::default();
            let a = seen("r", AlertSeverity::Critical, &[("service", "api"), ("n", "1")], 0);
            let b = seen("r", AlertSeverity::Error, &[("service", "api"), ("n", "2")], 10);
            let c = seen("r", AlertSeverity::Error, &[("service", "api"), ("n", "3")], 20);
            let detection = detect_pattern(&[&a, &b], &c, &config).unwrap();
            assert_eq!(detection.pattern.pattern_type, PatternType::Temporal);
        }
    }
}
