//! The alert rule engine wired to the correlation engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bulwark_alerts::{
    Alert, AlertManager, AlertRule, AlertsConfig, ChannelRouter, CheckResult, EscalationHandle,
    MetricsSnapshot, NotificationChannel,
};
use bulwark_correlation::{AlertCorrelation, CorrelationConfig, CorrelationEngine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatch::CorrelatingDispatcher;
use crate::error::Result;
use crate::rules::default_rules;

/// Aggregate statistics across rules, alerts and notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemStats {
    /// Registered rules.
    pub rules: usize,
    /// Alerts fired since startup.
    pub total_alerts: u64,
    /// Alerts in history that are still unresolved.
    pub active_alerts: usize,
    /// Alerts resolved since startup.
    pub resolved_alerts: u64,
    /// Notifications held back as duplicates, low priority or noise.
    pub suppressed_alerts: u64,
    /// Alerts that belong to a correlation group.
    pub correlated_alerts: usize,
    /// Live correlation groups.
    pub active_correlations: usize,
    /// Successful channel deliveries.
    pub notifications_sent: u64,
    /// Failed channel deliveries.
    pub notification_failures: u64,
    /// Mean time to resolve, over resolved alerts still in history.
    pub average_resolution_ms: Option<f64>,
}

fn purge(manager: &AlertManager, engine: &CorrelationEngine, now: DateTime<Utc>) {
    let alerts = manager.cleanup_at(now);
    let report = engine.cleanup_at(now);
    debug!(
        alerts,
        history = report.alerts,
        correlations = report.correlations,
        "alert cleanup"
    );
}

/// Handle for the periodic cleanup task.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    running: Arc<AtomicBool>,
}

impl CleanupHandle {
    /// Whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the task at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Alert rules, correlation and notification channels behind one API.
#[derive(Debug)]
pub struct IntegratedAlertSystem {
    manager: Arc<AlertManager>,
    engine: Arc<CorrelationEngine>,
    router: Arc<ChannelRouter>,
}

impl IntegratedAlertSystem {
    /// Builds the system and seeds the built-in rules when
    /// `alerts.default_rules` is set.
    ///
    /// # Errors
    ///
    /// Fails if either configuration is invalid.
    pub fn new(alerts: AlertsConfig, correlation: CorrelationConfig) -> Result<Self> {
        alerts.validate()?;
        let seed = alerts.default_rules;

        let engine = Arc::new(CorrelationEngine::with_config(correlation)?);
        let router = Arc::new(ChannelRouter::new());
        let dispatcher = CorrelatingDispatcher::new(Arc::clone(&engine), Arc::clone(&router));
        let manager = Arc::new(AlertManager::with_config(alerts).with_dispatcher(Arc::new(dispatcher)));

        let system = Self {
            manager,
            engine,
            router,
        };
        if seed {
            let rules = default_rules()?;
            let count = rules.len();
            for rule in rules {
                system.manager.add_rule(rule)?;
            }
            info!(count, "seeded default alert rules");
        }
        Ok(system)
    }

    /// The rule engine.
    #[must_use]
    pub fn manager(&self) -> &Arc<AlertManager> {
        &self.manager
    }

    /// The correlation engine.
    #[must_use]
    pub fn correlation(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    /// Registers a notification channel.
    pub fn add_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.router.add_channel(channel);
    }

    /// Removes a notification channel by name.
    pub fn remove_channel(&self, name: &str) -> bool {
        self.router.remove_channel(name)
    }

    /// Registers a rule.
    pub fn add_rule(&self, rule: AlertRule) -> Result<()> {
        Ok(self.manager.add_rule(rule)?)
    }

    /// Replaces an existing rule.
    pub fn update_rule(&self, rule: AlertRule) -> Result<()> {
        Ok(self.manager.update_rule(rule)?)
    }

    /// Removes a rule. Returns false if it did not exist.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.manager.remove_rule(rule_id)
    }

    /// Registered rules.
    #[must_use]
    pub fn rules(&self) -> Vec<AlertRule> {
        self.manager.list_rules()
    }

    /// Silences a rule for `duration`.
    pub fn suppress_rule(&self, rule_id: &str, duration: Duration) -> Result<()> {
        Ok(self.manager.suppress_rule(rule_id, duration)?)
    }

    /// Lifts a suppression early.
    pub fn unsuppress_rule(&self, rule_id: &str) -> bool {
        self.manager.unsuppress_rule(rule_id)
    }

    /// Marks an alert resolved and cancels its escalation.
    pub fn resolve_alert(&self, alert_id: &str) -> Result<Alert> {
        Ok(self.manager.resolve_alert(alert_id)?)
    }

    /// Evaluates every rule against `snapshot`.
    pub fn check_metrics(&self, snapshot: &MetricsSnapshot) -> CheckResult {
        self.check_metrics_at(snapshot, Utc::now())
    }

    /// Evaluates every rule against `snapshot` as of `now`.
    pub fn check_metrics_at(&self, snapshot: &MetricsSnapshot, now: DateTime<Utc>) -> CheckResult {
        let result = self.manager.check_rules_at(snapshot, now);
        if !result.fired.is_empty() {
            debug!(
                fired = result.fired.len(),
                delivered = result.notifications_sent,
                "metrics check fired alerts"
            );
        }
        result
    }

    /// Runs due escalations.
    pub fn process_escalations(&self) -> Vec<Alert> {
        self.manager.process_escalations()
    }

    /// Runs escalations due at `now`.
    pub fn process_escalations_at(&self, now: DateTime<Utc>) -> Vec<Alert> {
        self.manager.process_escalations_at(now)
    }

    /// Spawns the background escalation ticker.
    pub fn spawn_escalation_task(&self) -> EscalationHandle {
        self.manager.spawn_escalation_task()
    }

    /// Alerts that are not resolved.
    #[must_use]
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.manager.active_alerts()
    }

    /// Every alert in history.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.manager.alerts()
    }

    /// Live correlation groups.
    #[must_use]
    pub fn correlations(&self) -> Vec<AlertCorrelation> {
        self.engine.correlations()
    }

    /// Drops alerts and correlations past their retention.
    pub fn cleanup_at(&self, now: DateTime<Utc>) {
        purge(&self.manager, &self.engine, now);
    }

    /// Spawns a task that runs [`cleanup_at`](Self::cleanup_at) every
    /// `alerts.cleanup_interval_ms`. Must be called inside a tokio runtime.
    pub fn spawn_cleanup_task(&self) -> CleanupHandle {
        let running = Arc::new(AtomicBool::new(true));
        let task_running = Arc::clone(&running);
        let manager: Weak<AlertManager> = Arc::downgrade(&self.manager);
        let engine: Weak<CorrelationEngine> = Arc::downgrade(&self.engine);
        let every = self.manager.config().cleanup_interval();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            timer.tick().await;

            while task_running.load(Ordering::SeqCst) {
                timer.tick().await;
                if !task_running.load(Ordering::SeqCst) {
                    break;
                }
                let (Some(manager), Some(engine)) = (manager.upgrade(), engine.upgrade()) else {
                    task_running.store(false, Ordering::SeqCst);
                    break;
                };
                purge(&manager, &engine, Utc::now());
            }
            debug!("cleanup task stopped");
        });

        CleanupHandle { running }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SystemStats {
        let alerts = self.manager.stats();
        let correlation = self.engine.stats();
        let delivery = self.router.stats();

        let resolution_ms: Vec<f64> = self
            .manager
            .alerts()
            .iter()
            .filter_map(Alert::resolution_time)
            .map(|d| d.num_milliseconds() as f64)
            .collect();
        let average_resolution_ms = if resolution_ms.is_empty() {
            None
        } else {
            Some(resolution_ms.iter().sum::<f64>() / resolution_ms.len() as f64)
        };

        SystemStats {
            rules: alerts.rules,
            total_alerts: alerts.total_fired,
            active_alerts: alerts.active_alerts,
            resolved_alerts: alerts.total_resolved,
            suppressed_alerts: correlation.duplicates + correlation.suppressed,
            correlated_alerts: correlation.correlated_alerts,
            active_correlations: correlation.active_correlations,
            notifications_sent: delivery.sent,
            notification_failures: delivery.failed,
            average_resolution_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_alerts::{
        AlertCondition, AlertSeverity, ChannelKind, ComparisonOperator, RecordingChannel,
    };
    use chrono::Duration as ChronoDuration;

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn empty_system() -> (IntegratedAlertSystem, RecordingChannel) {
        let alerts = AlertsConfig {
            default_rules: false,
            ..AlertsConfig::default()
        };
        let system = IntegratedAlertSystem::new(alerts, CorrelationConfig::default()).unwrap();
        let chat = RecordingChannel::new("chat", ChannelKind::Chat);
        system.add_channel(Arc::new(chat.clone()));
        (system, chat)
    }

    fn cpu_rule(severity: AlertSeverity) -> AlertRule {
        AlertRule::builder("cpu", "CPU saturated")
            .condition(AlertCondition::new("cpu", ComparisonOperator::GreaterThan, 0.9).unwrap())
            .severity(severity)
            .tag("service", "api")
            .build()
            .unwrap()
    }

    mod setup_tests {
        use super::*;

        #[test]
        fn seeds_default_rules() {
            let system =
                IntegratedAlertSystem::new(AlertsConfig::default(), CorrelationConfig::default())
                    .unwrap();
            assert_eq!(system.rules().len(), 7);
        }

        #[test]
        fn respects_default_rules_flag() {
            let (system, _) = empty_system();
            assert!(system.rules().is_empty());
        }

        #[test]
        fn rejects_invalid_correlation_config() {
            let correlation = CorrelationConfig {
                max_group_size: 0,
                ..CorrelationConfig::default()
            };
            assert!(IntegratedAlertSystem::new(AlertsConfig::default(), correlation).is_err());
        }

        #[test]
        fn rule_lifecycle() {
            let (system, _) = empty_system();
            system.add_rule(cpu_rule(AlertSeverity::Warning)).unwrap();
            assert!(system.add_rule(cpu_rule(AlertSeverity::Warning)).is_err());
            system.update_rule(cpu_rule(AlertSeverity::Critical)).unwrap();
            assert_eq!(system.rules()[0].severity, AlertSeverity::Critical);
            assert!(system.remove_rule("cpu"));
            assert!(!system.remove_rule("cpu"));
        }
    }

    mod notification_tests {
        use super::*;

        #[test]
        fn critical_breach_notifies() {
            let (system, chat) = empty_system();
            system.add_rule(cpu_rule(AlertSeverity::Critical)).unwrap();

            let result =
                system.check_metrics_at(&MetricsSnapshot::new().with("cpu", 0.95), base());
            assert_eq!(result.fired.len(), 1);
            assert_eq!(chat.count(), 1);
            assert_eq!(system.stats().notifications_sent, 1);
        }

        #[test]
        fn low_priority_fires_but_stays_quiet() {
            let (system, chat) = empty_system();
            system.add_rule(cpu_rule(AlertSeverity::Info)).unwrap();

            let result =
                system.check_metrics_at(&MetricsSnapshot::new().with("cpu", 0.95), base());
            assert_eq!(result.fired.len(), 1);
            assert_eq!(chat.count(), 0);

            let stats = system.stats();
            assert_eq!(stats.total_alerts, 1);
            assert_eq!(stats.suppressed_alerts, 1);
        }

        #[test]
        fn suppressed_rule_does_not_fire() {
            let (system, chat) = empty_system();
            system.add_rule(cpu_rule(AlertSeverity::Critical)).unwrap();
            system.suppress_rule("cpu", Duration::from_secs(600)).unwrap();

            let result = system.check_metrics(&MetricsSnapshot::new().with("cpu", 0.95));
            assert!(result.fired.is_empty());
            assert_eq!(chat.count(), 0);

            assert!(system.unsuppress_rule("cpu"));
        }
    }

    mod resolution_tests {
        use super::*;

        #[test]
        fn resolve_updates_stats() {
            let (system, _) = empty_system();
            system.add_rule(cpu_rule(AlertSeverity::Critical)).unwrap();
            let fired = system.check_metrics(&MetricsSnapshot::new().with("cpu", 0.95));
            let id = fired.fired[0].id.clone();

            assert_eq!(system.active_alerts().len(), 1);
            let resolved = system.resolve_alert(&id).unwrap();
            assert!(resolved.resolved);

            let stats = system.stats();
            assert_eq!(stats.active_alerts, 0);
            assert_eq!(stats.resolved_alerts, 1);
            assert!(stats.average_resolution_ms.is_some());
        }

        #[test]
        fn resolve_unknown_alert() {
            let (system, _) = empty_system();
            assert!(system.resolve_alert("missing").is_err());
        }

        #[test]
        fn no_resolutions_no_average() {
            let (system, _) = empty_system();
            assert_eq!(system.stats().average_resolution_ms, None);
        }
    }

    mod escalation_tests {
        use super::*;
        use crate::rules::paging_escalation;

        #[test]
        fn escalation_reaches_pager() {
            let (system, _) = empty_system();
            let pager = RecordingChannel::new("pager", ChannelKind::Pager);
            system.add_channel(Arc::new(pager.clone()));

            let rule = AlertRule::builder("db", "Database down")
                .condition(
                    AlertCondition::new("database_connected", ComparisonOperator::Equal, 0.0)
                        .unwrap(),
                )
                .severity(AlertSeverity::Error)
                .escalation(paging_escalation())
                .build()
                .unwrap();
            system.add_rule(rule).unwrap();

            system.check_metrics_at(
                &MetricsSnapshot::new().with("database_connected", false),
                base(),
            );
            assert_eq!(pager.count(), 0);

            let first = system.process_escalations_at(base() + ChronoDuration::minutes(5));
            assert_eq!(first.len(), 1);
            assert_eq!(pager.count(), 0);

            let second = system.process_escalations_at(base() + ChronoDuration::minutes(21));
            assert_eq!(second.len(), 1);
            assert_eq!(second[0].severity, AlertSeverity::Critical);
            assert_eq!(pager.count(), 1);
        }
    }

    mod cleanup_tests {
        use super::*;

        #[test]
        fn cleanup_drops_old_alerts() {
            let (system, _) = empty_system();
            system.add_rule(cpu_rule(AlertSeverity::Critical)).unwrap();
            system.check_metrics_at(&MetricsSnapshot::new().with("cpu", 0.95), base());
            assert_eq!(system.alerts().len(), 1);

            assert_eq!(system.correlation().stats().history_size, 1);

            system.cleanup_at(base() + ChronoDuration::days(2));
            assert!(system.alerts().is_empty());
            assert_eq!(system.correlation().stats().history_size, 0);
        }

        #[tokio::test(start_paused = true)]
        async fn cleanup_task_purges_on_interval() {
            let (system, _) = empty_system();
            system.add_rule(cpu_rule(AlertSeverity::Critical)).unwrap();
            system.check_metrics_at(&MetricsSnapshot::new().with("cpu", 0.95), base());

            let handle = system.spawn_cleanup_task();
            let interval = system.manager().config().cleanup_interval();
            tokio::time::sleep(interval / 2).await;
            assert_eq!(system.alerts().len(), 1);

            tokio::time::sleep(interval).await;
            assert!(system.alerts().is_empty());
            assert!(system.correlations().is_empty());
            assert_eq!(system.correlation().stats().history_size, 0);

            handle.stop();
            assert!(!handle.is_running());
        }
    }
}
