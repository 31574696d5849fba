//! Priority scoring and tag similarity.
//!
//! The priority of an alert is a weighted sum of five sub-scores, each in
//! `[0, 1]`. See [`PriorityScore`].

use std::collections::{BTreeMap, BTreeSet};

use bulwark_alerts::Alert;
use serde::{Deserialize, Serialize};

use crate::config::{CorrelationConfig, ScoreWeights};

/// Fraction of tags two alerts share.
///
/// `matching / union`, where a tag matches when both sides have the key with
/// the same value and the union is over keys. Two empty tag sets are
/// identical.
#[must_use]
pub fn tag_similarity(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> f64 {
    let union: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    if union.is_empty() {
        return 1.0;
    }
    let matching = a.iter().filter(|(k, v)| b.get(*k) == Some(*v)).count();
    matching as f64 / union.len() as f64
}

/// Inverse frequency: 1.0 for a first occurrence down to 0.2 for a rule
/// firing more than 20 times in the window.
#[must_use]
pub const fn frequency_score(occurrences: usize) -> f64 {
    match occurrences {
        0..=1 => 1.0,
        2..=5 => 0.8,
        6..=10 => 0.6,
        11..=20 => 0.4,
        _ => 0.2,
    }
}

/// Lowercase alphanumeric words of an alert's rule ID and tag values.
fn subsystem_tokens(alert: &Alert) -> BTreeSet<String> {
    std::iter::once(alert.rule_id.as_str())
        .chain(alert.tags.values().map(String::as_str))
        .flat_map(|s| s.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Highest business impact of any subsystem the alert mentions, or 0.5.
#[must_use]
pub fn business_impact_score(alert: &Alert, table: &BTreeMap<String, f64>) -> f64 {
    let tokens = subsystem_tokens(alert);
    table
        .iter()
        .filter(|(name, _)| tokens.contains(&name.to_ascii_lowercase()))
        .map(|(_, score)| *score)
        .reduce(f64::max)
        .unwrap_or(0.5)
}

/// 1.0 if the alert mentions a user-facing subsystem, else 0.3.
#[must_use]
pub fn user_impact_score(alert: &Alert, user_facing: &[String]) -> f64 {
    let tokens = subsystem_tokens(alert);
    if user_facing
        .iter()
        .any(|s| tokens.contains(&s.to_ascii_lowercase()))
    {
        1.0
    } else {
        0.3
    }
}

/// The derived priority of one alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    /// Weighted total in `[0, 1]`.
    pub total: f64,
    /// Severity sub-score.
    pub severity: f64,
    /// Business impact sub-score.
    pub business_impact: f64,
    /// Inverse frequency sub-score.
    pub frequency: f64,
    /// Correlation confidence sub-score.
    pub correlation: f64,
    /// User impact sub-score.
    pub user_impact: f64,
}

impl PriorityScore {
    /// Combines sub-scores with `weights`.
    #[must_use]
    pub fn new(
        weights: &ScoreWeights,
        severity: f64,
        business_impact: f64,
        frequency: f64,
        correlation: f64,
        user_impact: f64,
    ) -> Self {
        let total = weights.severity * severity
            + weights.business_impact * business_impact
            + weights.frequency * frequency
            + weights.correlation * correlation
            + weights.user_impact * user_impact;
        Self {
            total: total.clamp(0.0, 1.0),
            severity,
            business_impact,
            frequency,
            correlation,
            user_impact,
        }
    }

    /// Scores `alert` given its recent occurrence count and the confidence
    /// of any correlation its rule is part of.
    #[must_use]
    pub fn for_alert(
        alert: &Alert,
        config: &CorrelationConfig,
        occurrences: usize,
        correlation: f64,
    ) -> Self {
        Self::new(
            &config.weights,
            alert.severity.score(),
            business_impact_score(alert, &config.business_impact),
            frequency_score(occurrences),
            correlation.clamp(0.0, 1.0),
            user_impact_score(alert, &config.user_facing),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_alerts::{AlertRule, AlertSeverity};
    use chrono::Utc;
    use proptest::prelude::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn alert(rule_id: &str, severity: AlertSeverity, tag_pairs: &[(&str, &str)]) -> Alert {
        let mut builder = AlertRule::builder(rule_id, rule_id)
            .predicate(|_| true)
            .severity(severity);
        for (k, v) in tag_pairs {
            builder = builder.tag(*k, *v);
        }
        Alert::from_rule(&builder.build().unwrap(), None, Utc::now())
    }

    mod similarity_tests {
        use super::*;

        #[test]
        fn identical_tags() {
            let a = tags(&[("service", "api"), ("region", "eu")]);
            assert!((tag_similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn partial_overlap() {
            let a = tags(&[("service", "api"), ("instance", "i-1")]);
            let b = tags(&[("service", "api"), ("instance", "i-2")]);
            assert!((tag_similarity(&a, &b) - 0.5).abs() < f64::EPSILON);
        }

        #[test]
        fn union_counts_missing_keys() {
            let a = tags(&[("service", "api")]);
            let b = tags(&[("service", "api"), ("region", "eu")]);
            assert!((tag_similarity(&a, &b) - 0.5).abs() < f64::EPSILON);
        }

        #[test]
        fn empty_sets_identical() {
            assert!((tag_similarity(&tags(&[]), &tags(&[])) - 1.0).abs() < f64::EPSILON);
        }

        fn tag_map() -> impl Strategy<Value = BTreeMap<String, String>> {
            prop::collection::btree_map("[a-d]", "[x-z]", 0..4)
        }

        proptest! {
            #[test]
            fn similarity_bounded_and_symmetric(a in tag_map(), b in tag_map()) {
                let ab = tag_similarity(&a, &b);
                let ba = tag_similarity(&b, &a);
                prop_assert!((0.0..=1.0).contains(&ab));
                prop_assert!((ab - ba).abs() < 1e-12);
            }

            #[test]
            fn self_similarity_is_one(a in tag_map()) {
                prop_assert!((tag_similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
            }
        }
    }

    mod score_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(0, 1.0)]
        #[test_case(1, 1.0)]
        #[test_case(5, 0.8)]
        #[test_case(10, 0.6)]
        #[test_case(20, 0.4)]
        #[test_case(21, 0.2)]
        fn frequency_steps(count: usize, expected: f64) {
            assert!((frequency_score(count) - expected).abs() < f64::EPSILON);
        }

        #[test]
        fn business_impact_takes_max() {
            let config = CorrelationConfig::default();
            let a = alert("payment_errors", AlertSeverity::Error, &[("service", "database")]);
            assert!((business_impact_score(&a, &config.business_impact) - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn business_impact_default() {
            let config = CorrelationConfig::default();
            let a = alert("disk", AlertSeverity::Error, &[("service", "batch")]);
            assert!((business_impact_score(&a, &config.business_impact) - 0.5).abs() < f64::EPSILON);
        }

        #[test]
        fn user_facing_matches_whole_words() {
            let config = CorrelationConfig::default();
            let facing = alert("x", AlertSeverity::Info, &[("component", "checkout-page")]);
            let internal = alert("x", AlertSeverity::Info, &[("component", "rapid-batch")]);
            assert!((user_impact_score(&facing, &config.user_facing) - 1.0).abs() < f64::EPSILON);
            assert!((user_impact_score(&internal, &config.user_facing) - 0.3).abs() < f64::EPSILON);
        }

        #[test]
        fn critical_default_score() {
            let config = CorrelationConfig::default();
            let a = alert("disk", AlertSeverity::Critical, &[]);
            let score = PriorityScore::for_alert(&a, &config, 1, 0.0);
            // 0.30 + 0.25 * 0.5 + 0.20 + 0 + 0.10 * 0.3
            assert!((score.total - 0.655).abs() < 1e-9);
        }

        #[test]
        fn correlation_raises_score() {
            let config = CorrelationConfig::default();
            let a = alert("disk", AlertSeverity::Warning, &[]);
            let plain = PriorityScore::for_alert(&a, &config, 1, 0.0);
            let correlated = PriorityScore::for_alert(&a, &config, 1, 1.0);
            assert!((correlated.total - plain.total - 0.15).abs() < 1e-9);
        }
    }
}
