//! Built-in alert rules.
//!
//! | id                      | metric                 | condition | severity |
//! |-------------------------|------------------------|-----------|----------|
//! | `high_error_rate`       | `error_rate`           | > 0.05    | warning  |
//! | `critical_error_rate`   | `error_rate`           | > 0.10    | critical |
//! | `slow_responses`        | `avg_response_ms`      | > 2000    | warning  |
//! | `database_connectivity` | `database_connected`   | == false  | critical |
//! | `memory_warning`        | `memory_usage`         | > 0.80    | warning  |
//! | `memory_critical`       | `memory_usage`         | > 0.95    | critical |
//! | `service_health`        | `service_health`       | < 0.5     | error    |
//!
//! The critical error rate, database and service health rules escalate
//! when left unresolved.

use std::time::Duration;

use bulwark_alerts::{
    AlertCondition, AlertRule, AlertSeverity, ChannelKind, ComparisonOperator, EscalationPolicy,
    EscalationStep, Result,
};

const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);
const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Escalation for rules that page: chat and email after 5 minutes, then
/// the pager at critical severity after 15.
pub fn paging_escalation() -> EscalationPolicy {
    EscalationPolicy::new(vec![
        EscalationStep::new(
            FIVE_MINUTES,
            AlertSeverity::Error,
            vec![ChannelKind::Chat, ChannelKind::Email],
        ),
        EscalationStep::new(
            FIFTEEN_MINUTES,
            AlertSeverity::Critical,
            vec![ChannelKind::Chat, ChannelKind::Email, ChannelKind::Pager],
        ),
    ])
}

fn threshold(metric: &str, operator: ComparisonOperator, value: f64) -> Result<AlertCondition> {
    AlertCondition::new(metric, operator, value)
}

/// The built-in rule set.
pub fn default_rules() -> Result<Vec<AlertRule>> {
    use ComparisonOperator::{Equal, GreaterThan, LessThan};

    Ok(vec![
        AlertRule::builder("high_error_rate", "High error rate")
            .condition(threshold("error_rate", GreaterThan, 0.05)?)
            .severity(AlertSeverity::Warning)
            .cooldown(FIVE_MINUTES)
            .tag("category", "errors")
            .message("Error rate {value} is above {threshold}")
            .build()?,
        AlertRule::builder("critical_error_rate", "Critical error rate")
            .condition(threshold("error_rate", GreaterThan, 0.10)?)
            .severity(AlertSeverity::Critical)
            .cooldown(FIVE_MINUTES)
            .tag("category", "errors")
            .escalation(paging_escalation())
            .message("Error rate {value} is above {threshold}")
            .build()?,
        AlertRule::builder("slow_responses", "Slow responses")
            .condition(threshold("avg_response_ms", GreaterThan, 2000.0)?)
            .severity(AlertSeverity::Warning)
            .cooldown(TEN_MINUTES)
            .tag("category", "performance")
            .message("Average response time {value}ms is above {threshold}ms")
            .build()?,
        AlertRule::builder("database_connectivity", "Database connectivity failed")
            .condition(threshold("database_connected", Equal, 0.0)?)
            .severity(AlertSeverity::Critical)
            .cooldown(FIVE_MINUTES)
            .tag("category", "infrastructure")
            .tag("component", "database")
            .escalation(paging_escalation())
            .message("Database connection check failed")
            .build()?,
        AlertRule::builder("memory_warning", "High memory usage")
            .condition(threshold("memory_usage", GreaterThan, 0.80)?)
            .severity(AlertSeverity::Warning)
            .cooldown(TEN_MINUTES)
            .tag("category", "resources")
            .message("Memory usage {value} is above {threshold}")
            .build()?,
        AlertRule::builder("memory_critical", "Critical memory usage")
            .condition(threshold("memory_usage", GreaterThan, 0.95)?)
            .severity(AlertSeverity::Critical)
            .cooldown(FIVE_MINUTES)
            .tag("category", "resources")
            .message("Memory usage {value} is above {threshold}")
            .build()?,
        AlertRule::builder("service_health", "Service health degraded")
            .condition(threshold("service_health", LessThan, 0.5)?)
            .severity(AlertSeverity::Error)
            .cooldown(FIVE_MINUTES)
            .tag("category", "availability")
            .escalation(paging_escalation())
            .message("Service health score {value} is below {threshold}")
            .build()?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_alerts::{MetricsSnapshot, RuleEvaluation};
    use test_case::test_case;

    fn rule(id: &str) -> AlertRule {
        default_rules()
            .unwrap()
            .into_iter()
            .find(|r| r.id == id)
            .unwrap()
    }

    #[test]
    fn seven_rules_with_unique_ids() {
        let rules = default_rules().unwrap();
        assert_eq!(rules.len(), 7);
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 7);
    }

    #[test_case("high_error_rate", AlertSeverity::Warning)]
    #[test_case("critical_error_rate", AlertSeverity::Critical)]
    #[test_case("slow_responses", AlertSeverity::Warning)]
    #[test_case("database_connectivity", AlertSeverity::Critical)]
    #[test_case("memory_warning", AlertSeverity::Warning)]
    #[test_case("memory_critical", AlertSeverity::Critical)]
    #[test_case("service_health", AlertSeverity::Error)]
    fn severities(id: &str, expected: AlertSeverity) {
        assert_eq!(rule(id).severity, expected);
    }

    #[test]
    fn escalating_rules() {
        let escalating: Vec<String> = default_rules()
            .unwrap()
            .into_iter()
            .filter(|r| r.escalation.is_some())
            .map(|r| r.id)
            .collect();
        assert_eq!(
            escalating,
            ["critical_error_rate", "database_connectivity", "service_health"]
        );
    }

    #[test]
    fn error_rate_thresholds() {
        let snapshot = MetricsSnapshot::new().with("error_rate", 0.07);
        assert!(matches!(
            rule("high_error_rate").evaluate(&snapshot),
            RuleEvaluation::Fired { .. }
        ));
        assert_eq!(
            rule("critical_error_rate").evaluate(&snapshot),
            RuleEvaluation::Clear
        );
    }

    #[test]
    fn database_flag() {
        let down = MetricsSnapshot::new().with("database_connected", false);
        let up = MetricsSnapshot::new().with("database_connected", true);
        let db = rule("database_connectivity");
        assert!(matches!(db.evaluate(&down), RuleEvaluation::Fired { .. }));
        assert_eq!(db.evaluate(&up), RuleEvaluation::Clear);
    }

    #[test]
    fn health_below_threshold() {
        let snapshot = MetricsSnapshot::new().with("service_health", 0.3);
        assert!(matches!(
            rule("service_health").evaluate(&snapshot),
            RuleEvaluation::Fired { .. }
        ));
    }

    #[test]
    fn paging_escalation_reaches_pager() {
        let policy = paging_escalation();
        assert_eq!(policy.max_level, 2);
        let last = policy.step_for_level(2).unwrap();
        assert_eq!(last.severity, AlertSeverity::Critical);
        assert!(last.channels.contains(&ChannelKind::Pager));
    }
}
