//! Core types for the alert rule engine.
//!
//! - [`AlertSeverity`]: how urgent an alert is, and where it is routed
//! - [`MetricsSnapshot`]: the metric values rules are evaluated against
//! - [`AlertCondition`]: a serializable threshold check on one metric
//! - [`EscalationPolicy`]: how an unresolved alert grows louder over time
//! - [`AlertRule`]: when to alert, how loudly, and how often
//! - [`Alert`]: one firing of a rule

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};

/// Maximum length for rule names.
pub const MAX_NAME_LENGTH: usize = 256;

/// The severity level of an alert.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational, no action required.
    Info,
    /// Should be investigated.
    #[default]
    Warning,
    /// Something is broken for some users.
    Error,
    /// Requires immediate attention.
    Critical,
}

impl AlertSeverity {
    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// Returns the priority of this severity (higher = more urgent).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
            Self::Error => 3,
            Self::Critical => 4,
        }
    }

    /// Normalized weight used in priority scoring.
    #[must_use]
    pub const fn score(&self) -> f64 {
        match self {
            Self::Info => 0.25,
            Self::Warning => 0.5,
            Self::Error => 0.75,
            Self::Critical => 1.0,
        }
    }

    /// Channels a fresh alert of this severity is routed to.
    #[must_use]
    pub fn default_channels(&self) -> Vec<ChannelKind> {
        match self {
            Self::Info | Self::Warning => vec![ChannelKind::Chat],
            Self::Error => vec![ChannelKind::Chat, ChannelKind::Email],
            Self::Critical => vec![ChannelKind::Chat, ChannelKind::Email, ChannelKind::Pager],
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(AlertError::InvalidRule {
                reason: format!("unknown severity '{other}'"),
            }),
        }
    }
}

/// Logical notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Team chat.
    Chat,
    /// Email.
    Email,
    /// On-call paging.
    Pager,
    /// Generic HTTP integration; receives every notification.
    Webhook,
}

impl ChannelKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Email => "email",
            Self::Pager => "pager",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operators for alert conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Evaluates `left <op> right`.
    #[must_use]
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThan => left < right,
            Self::LessThanOrEqual => left <= right,
            Self::Equal => (left - right).abs() < f64::EPSILON,
            Self::NotEqual => (left - right).abs() >= f64::EPSILON,
        }
    }

    /// Returns the operator as a string symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// A single metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A numeric reading.
    Number(f64),
    /// A flag, e.g. `database_connected`.
    Bool(bool),
    /// Free text; numeric text still compares as a number.
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value: bools are 1/0, text is parsed.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Metric values keyed by name, as supplied by the metrics collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSnapshot {
    values: BTreeMap<String, MetricValue>,
}

impl MetricsSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object of metric values.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetricValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.values.get(key)
    }

    /// Numeric value for a key, if present and coercible.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(MetricValue::as_f64)
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no metrics are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<MetricValue>> FromIterator<(K, V)> for MetricsSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A threshold check on one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// The metric to evaluate.
    pub metric_name: String,
    /// The comparison operator.
    pub operator: ComparisonOperator,
    /// The threshold value to compare against.
    pub threshold: f64,
}

impl AlertCondition {
    /// Creates a new alert condition.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the metric name is empty or the
    /// threshold is not finite.
    pub fn new(
        metric_name: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
    ) -> Result<Self> {
        let metric_name = metric_name.into();
        if metric_name.is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "metric name cannot be empty".to_string(),
            });
        }
        if !threshold.is_finite() {
            return Err(AlertError::InvalidRule {
                reason: format!("threshold for '{metric_name}' must be finite"),
            });
        }

        Ok(Self {
            metric_name,
            operator,
            threshold,
        })
    }

    /// Evaluates the condition against a metric value.
    #[must_use]
    pub fn evaluate(&self, value: f64) -> bool {
        self.operator.evaluate(value, self.threshold)
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric_name, self.operator, self.threshold)
    }
}

/// Custom rule predicate over the whole snapshot.
pub type RulePredicate = Arc<dyn Fn(&MetricsSnapshot) -> bool + Send + Sync>;

/// One escalation step: wait, then re-notify louder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStep {
    /// How long the alert must stay unresolved before this step runs.
    pub delay_ms: u64,
    /// Severity the alert is raised to.
    pub severity: AlertSeverity,
    /// Channels notified when the step runs.
    pub channels: Vec<ChannelKind>,
}

impl EscalationStep {
    /// Creates a step.
    #[must_use]
    pub fn new(delay: Duration, severity: AlertSeverity, channels: Vec<ChannelKind>) -> Self {
        Self {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            severity,
            channels,
        }
    }

    /// Delay as a [`Duration`].
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Escalation chain for unresolved alerts.
///
/// Level `n` runs step `n - 1`. Levels past the last step repeat it until
/// `max_level` is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Ordered steps.
    pub steps: Vec<EscalationStep>,
    /// Highest level an alert may reach.
    pub max_level: u32,
}

impl EscalationPolicy {
    /// Creates a policy whose max level is the number of steps.
    #[must_use]
    pub fn new(steps: Vec<EscalationStep>) -> Self {
        let max_level = u32::try_from(steps.len()).unwrap_or(u32::MAX);
        Self { steps, max_level }
    }

    /// Overrides the max level.
    #[must_use]
    pub const fn with_max_level(mut self, max_level: u32) -> Self {
        self.max_level = max_level;
        self
    }

    /// Step that produces `level`, if the policy allows reaching it.
    #[must_use]
    pub fn step_for_level(&self, level: u32) -> Option<&EscalationStep> {
        if level == 0 || level > self.max_level {
            return None;
        }
        let index = (level as usize - 1).min(self.steps.len().checked_sub(1)?);
        self.steps.get(index)
    }

    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "escalation policy needs at least one step".to_string(),
            });
        }
        if self.max_level == 0 {
            return Err(AlertError::InvalidRule {
                reason: "escalation max level must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Result of evaluating a rule against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleEvaluation {
    /// The rule's condition holds.
    Fired {
        /// The metric value that tripped a threshold condition.
        value: Option<f64>,
    },
    /// The condition does not hold.
    Clear,
    /// The metric the condition reads is absent or not numeric.
    MissingMetric,
}

/// A rule that defines when and how to alert.
#[derive(Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier.
    pub id: String,
    /// Human-readable name, used as the alert title.
    pub name: String,
    /// Threshold condition.
    #[serde(default)]
    pub condition: Option<AlertCondition>,
    /// Custom predicate; takes precedence over `condition`.
    #[serde(skip)]
    pub predicate: Option<RulePredicate>,
    /// Severity of alerts this rule raises.
    pub severity: AlertSeverity,
    /// Minimum time between two firings.
    pub cooldown_ms: u64,
    /// Tags copied onto every alert.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Optional escalation chain.
    #[serde(default)]
    pub escalation: Option<EscalationPolicy>,
    /// Whether the rule is evaluated.
    pub enabled: bool,
    /// Alert message; `{value}` and `{threshold}` are substituted.
    #[serde(default)]
    pub message: String,
}

impl fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("condition", &self.condition)
            .field("has_predicate", &self.predicate.is_some())
            .field("severity", &self.severity)
            .field("cooldown_ms", &self.cooldown_ms)
            .field("tags", &self.tags)
            .field("escalation", &self.escalation)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl AlertRule {
    /// Creates a builder for an alert rule.
    #[must_use]
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> AlertRuleBuilder {
        AlertRuleBuilder::new(id, name)
    }

    /// Cooldown as a [`Duration`].
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Evaluates the rule against a snapshot.
    #[must_use]
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> RuleEvaluation {
        if let Some(predicate) = &self.predicate {
            return if predicate(snapshot) {
                RuleEvaluation::Fired {
                    value: self
                        .condition
                        .as_ref()
                        .and_then(|c| snapshot.number(&c.metric_name)),
                }
            } else {
                RuleEvaluation::Clear
            };
        }

        let Some(condition) = &self.condition else {
            return RuleEvaluation::Clear;
        };
        match snapshot.number(&condition.metric_name) {
            Some(value) if condition.evaluate(value) => RuleEvaluation::Fired { value: Some(value) },
            Some(_) => RuleEvaluation::Clear,
            None => RuleEvaluation::MissingMetric,
        }
    }

    /// Renders the alert message for a firing.
    #[must_use]
    pub fn render_message(&self, value: Option<f64>) -> String {
        let template = if self.message.is_empty() {
            match &self.condition {
                Some(condition) => format!("{condition} (current: {{value}})"),
                None => self.name.clone(),
            }
        } else {
            self.message.clone()
        };

        let value = value.map_or_else(|| "n/a".to_string(), |v| format!("{v}"));
        let threshold = self
            .condition
            .as_ref()
            .map_or_else(|| "n/a".to_string(), |c| format!("{}", c.threshold));
        template
            .replace("{value}", &value)
            .replace("{threshold}", &threshold)
    }

    /// Checks the rule is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "rule id cannot be empty".to_string(),
            });
        }
        if self.name.is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "rule name cannot be empty".to_string(),
            });
        }
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(AlertError::InvalidRule {
                reason: format!("rule name exceeds {MAX_NAME_LENGTH} characters"),
            });
        }
        if self.condition.is_none() && self.predicate.is_none() {
            return Err(AlertError::InvalidRule {
                reason: format!("rule '{}' has neither a condition nor a predicate", self.id),
            });
        }
        if let Some(policy) = &self.escalation {
            policy.validate()?;
        }
        Ok(())
    }
}

/// Builder for [`AlertRule`].
pub struct AlertRuleBuilder {
    rule: AlertRule,
}

impl AlertRuleBuilder {
    fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rule: AlertRule {
                id: id.into(),
                name: name.into(),
                condition: None,
                predicate: None,
                severity: AlertSeverity::default(),
                cooldown_ms: 300_000,
                tags: BTreeMap::new(),
                escalation: None,
                enabled: true,
                message: String::new(),
            },
        }
    }

    /// Sets the threshold condition.
    #[must_use]
    pub fn condition(mut self, condition: AlertCondition) -> Self {
        self.rule.condition = Some(condition);
        self
    }

    /// Sets a custom predicate.
    #[must_use]
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MetricsSnapshot) -> bool + Send + Sync + 'static,
    {
        self.rule.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets the severity.
    #[must_use]
    pub const fn severity(mut self, severity: AlertSeverity) -> Self {
        self.rule.severity = severity;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.rule.cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule.tags.insert(key.into(), value.into());
        self
    }

    /// Sets the escalation policy.
    #[must_use]
    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.rule.escalation = Some(policy);
        self
    }

    /// Sets whether the rule is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.rule.enabled = enabled;
        self
    }

    /// Sets the message template.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.rule.message = message.into();
        self
    }

    /// Builds the rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the rule fails validation.
    pub fn build(self) -> Result<AlertRule> {
        self.rule.validate()?;
        Ok(self.rule)
    }
}

/// One firing of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier.
    pub id: String,
    /// The originating rule.
    pub rule_id: String,
    /// Name of the originating rule.
    pub rule_name: String,
    /// Short title.
    pub title: String,
    /// Rendered message.
    pub message: String,
    /// Current severity; escalation may raise it.
    pub severity: AlertSeverity,
    /// When the rule fired.
    pub timestamp: DateTime<Utc>,
    /// Tags copied from the rule.
    pub tags: BTreeMap<String, String>,
    /// Metric value that tripped the rule, if any.
    pub value: Option<f64>,
    /// Whether the alert has been resolved.
    pub resolved: bool,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Number of escalation steps applied.
    pub escalation_level: u32,
}

impl Alert {
    /// Creates an alert for a rule firing at `now`.
    #[must_use]
    pub fn from_rule(rule: &AlertRule, value: Option<f64>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            title: rule.name.clone(),
            message: rule.render_message(value),
            severity: rule.severity,
            timestamp: now,
            tags: rule.tags.clone(),
            value,
            resolved: false,
            resolved_at: None,
            escalation_level: 0,
        }
    }

    /// Marks the alert resolved. Returns false if it already was.
    pub fn resolve_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_at = Some(now);
        true
    }

    /// Returns true while the alert is unresolved.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.resolved
    }

    /// Time from firing to resolution.
    #[must_use]
    pub fn resolution_time(&self) -> Option<chrono::Duration> {
        self.resolved_at.map(|at| at - self.timestamp)
    }

    /// Value of the `service` tag.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.tags.get("service").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod severity_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(AlertSeverity::Info, "info", 0.25)]
        #[test_case(AlertSeverity::Warning, "warning", 0.5)]
        #[test_case(AlertSeverity::Error, "error", 0.75)]
        #[test_case(AlertSeverity::Critical, "critical", 1.0)]
        fn severity_str_and_score(severity: AlertSeverity, name: &str, score: f64) {
            assert_eq!(severity.as_str(), name);
            assert!((severity.score() - score).abs() < f64::EPSILON);
            assert_eq!(name.parse::<AlertSeverity>().unwrap(), severity);
        }

        #[test]
        fn severity_ordering() {
            assert!(AlertSeverity::Critical > AlertSeverity::Error);
            assert!(AlertSeverity::Error > AlertSeverity::Warning);
            assert!(AlertSeverity::Warning > AlertSeverity::Info);
        }

        #[test]
        fn severity_routing() {
            assert_eq!(AlertSeverity::Info.default_channels(), vec![ChannelKind::Chat]);
            assert_eq!(
                AlertSeverity::Error.default_channels(),
                vec![ChannelKind::Chat, ChannelKind::Email]
            );
            assert_eq!(
                AlertSeverity::Critical.default_channels(),
                vec![ChannelKind::Chat, ChannelKind::Email, ChannelKind::Pager]
            );
        }

        #[test]
        fn unknown_severity_rejected() {
            assert!("loud".parse::<AlertSeverity>().is_err());
        }
    }

    mod metric_tests {
        use super::*;

        #[test]
        fn coercion() {
            assert_eq!(MetricValue::from(0.5).as_f64(), Some(0.5));
            assert_eq!(MetricValue::from(true).as_f64(), Some(1.0));
            assert_eq!(MetricValue::from(false).as_f64(), Some(0.0));
            assert_eq!(MetricValue::from(" 42 ").as_f64(), Some(42.0));
            assert_eq!(MetricValue::from("healthy").as_f64(), None);
        }

        #[test]
        fn snapshot_from_json() {
            let snapshot = MetricsSnapshot::from_json(
                r#"{"error_rate": 0.12, "database_connected": false, "region": "eu"}"#,
            )
            .unwrap();
            assert_eq!(snapshot.len(), 3);
            assert_eq!(snapshot.number("error_rate"), Some(0.12));
            assert_eq!(snapshot.number("database_connected"), Some(0.0));
            assert_eq!(snapshot.number("region"), None);
            assert_eq!(snapshot.get("region"), Some(&MetricValue::from("eu")));
        }

        #[test]
        fn snapshot_from_iter() {
            let snapshot: MetricsSnapshot = [("a", 1.0), ("b", 2.0)].into_iter().collect();
            assert_eq!(snapshot.number("b"), Some(2.0));
        }
    }

    mod operator_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(ComparisonOperator::GreaterThan, 0.12, 0.10, true)]
        #[test_case(ComparisonOperator::GreaterThan, 0.10, 0.10, false)]
        #[test_case(ComparisonOperator::GreaterThanOrEqual, 0.10, 0.10, true)]
        #[test_case(ComparisonOperator::LessThan, 0.4, 0.5, true)]
        #[test_case(ComparisonOperator::LessThanOrEqual, 0.6, 0.5, false)]
        #[test_case(ComparisonOperator::Equal, 0.0, 0.0, true)]
        #[test_case(ComparisonOperator::NotEqual, 1.0, 0.0, true)]
        fn operator_evaluate(op: ComparisonOperator, left: f64, right: f64, expected: bool) {
            assert_eq!(op.evaluate(left, right), expected);
        }

        #[test]
        fn operator_serialization() {
            let json = serde_json::to_string(&ComparisonOperator::GreaterThanOrEqual).unwrap();
            assert_eq!(json, r#"">=""#);
        }
    }

    mod condition_tests {
        use super::*;

        #[test]
        fn condition_rejects_empty_metric() {
            assert!(AlertCondition::new("", ComparisonOperator::GreaterThan, 1.0).is_err());
        }

        #[test]
        fn condition_rejects_nan_threshold() {
            assert!(AlertCondition::new("x", ComparisonOperator::GreaterThan, f64::NAN).is_err());
        }

        #[test]
        fn condition_display() {
            let c = AlertCondition::new("error_rate", ComparisonOperator::GreaterThan, 0.1).unwrap();
            assert_eq!(c.to_string(), "error_rate > 0.1");
        }
    }

    mod rule_tests {
        use super::*;

        fn error_rate_rule() -> AlertRule {
            AlertRule::builder("critical_error_rate", "Critical error rate")
                .condition(
                    AlertCondition::new("error_rate", ComparisonOperator::GreaterThan, 0.10)
                        .unwrap(),
                )
                .severity(AlertSeverity::Critical)
                .cooldown(Duration::from_secs(300))
                .tag("service", "api")
                .message("Error rate {value} above {threshold}")
                .build()
                .unwrap()
        }

        #[test]
        fn builder_defaults() {
            let rule = error_rate_rule();
            assert!(rule.enabled);
            assert_eq!(rule.cooldown(), Duration::from_secs(300));
            assert_eq!(rule.tags.get("service").map(String::as_str), Some("api"));
        }

        #[test]
        fn rule_requires_condition_or_predicate() {
            let err = AlertRule::builder("r", "Rule").build().unwrap_err();
            assert!(matches!(err, AlertError::InvalidRule { .. }));
        }

        #[test]
        fn rule_name_too_long_fails() {
            let result = AlertRule::builder("r", "x".repeat(MAX_NAME_LENGTH + 1))
                .predicate(|_| true)
                .build();
            assert!(result.is_err());
        }

        #[test]
        fn empty_escalation_rejected() {
            let result = AlertRule::builder("r", "Rule")
                .predicate(|_| true)
                .escalation(EscalationPolicy::new(Vec::new()))
                .build();
            assert!(result.is_err());
        }

        #[test]
        fn evaluate_threshold() {
            let rule = error_rate_rule();
            let breach = MetricsSnapshot::new().with("error_rate", 0.12);
            let fine = MetricsSnapshot::new().with("error_rate", 0.02);

            assert_eq!(rule.evaluate(&breach), RuleEvaluation::Fired { value: Some(0.12) });
            assert_eq!(rule.evaluate(&fine), RuleEvaluation::Clear);
            assert_eq!(
                rule.evaluate(&MetricsSnapshot::new()),
                RuleEvaluation::MissingMetric
            );
        }

        #[test]
        fn predicate_takes_precedence() {
            let rule = AlertRule::builder("db", "Database down")
                .predicate(|s| s.get("database_connected") == Some(&MetricValue::Bool(false)))
                .build()
                .unwrap();
            let down = MetricsSnapshot::new().with("database_connected", false);
            assert_eq!(rule.evaluate(&down), RuleEvaluation::Fired { value: None });
        }

        #[test]
        fn message_rendering() {
            let rule = error_rate_rule();
            assert_eq!(rule.render_message(Some(0.12)), "Error rate 0.12 above 0.1");
        }

        #[test]
        fn default_message_mentions_condition() {
            let rule = AlertRule::builder("r", "Rule")
                .condition(AlertCondition::new("x", ComparisonOperator::LessThan, 0.5).unwrap())
                .build()
                .unwrap();
            assert_eq!(rule.render_message(Some(0.2)), "x < 0.5 (current: 0.2)");
        }

        #[test]
        fn serialization_skips_predicate() {
            let rule = error_rate_rule();
            let json = serde_json::to_string(&rule).unwrap();
            let back: AlertRule = serde_json::from_str(&json).unwrap();
            assert_eq!(back.id, rule.id);
            assert_eq!(back.condition, rule.condition);
            assert!(back.predicate.is_none());
        }
    }

    mod escalation_tests {
        use super::*;

        fn policy() -> EscalationPolicy {
            EscalationPolicy::new(vec![
                EscalationStep::new(
                    Duration::from_secs(300),
                    AlertSeverity::Error,
                    vec![ChannelKind::Email],
                ),
                EscalationStep::new(
                    Duration::from_secs(600),
                    AlertSeverity::Critical,
                    vec![ChannelKind::Pager],
                ),
            ])
        }

        #[test]
        fn steps_by_level() {
            let policy = policy();
            assert!(policy.step_for_level(0).is_none());
            assert_eq!(policy.step_for_level(1).unwrap().severity, AlertSeverity::Error);
            assert_eq!(policy.step_for_level(2).unwrap().severity, AlertSeverity::Critical);
            assert!(policy.step_for_level(3).is_none());
        }

        #[test]
        fn last_step_repeats_up_to_max_level() {
            let policy = policy().with_max_level(4);
            assert_eq!(policy.step_for_level(4).unwrap().channels, vec![ChannelKind::Pager]);
            assert!(policy.step_for_level(5).is_none());
        }
    }

    mod alert_tests {
        use super::*;

        #[test]
        fn alert_from_rule_and_resolve() {
            let rule = AlertRule::builder("r", "Rule")
                .predicate(|_| true)
                .severity(AlertSeverity::Error)
                .tag("service", "checkout")
                .build()
                .unwrap();
            let fired_at = Utc::now();
            let mut alert = Alert::from_rule(&rule, None, fired_at);

            assert_eq!(alert.rule_id, "r");
            assert_eq!(alert.title, "Rule");
            assert_eq!(alert.service(), Some("checkout"));
            assert!(alert.is_active());

            let later = fired_at + chrono::Duration::seconds(90);
            assert!(alert.resolve_at(later));
            assert!(!alert.resolve_at(later));
            assert_eq!(alert.resolution_time(), Some(chrono::Duration::seconds(90)));
        }
    }
}
