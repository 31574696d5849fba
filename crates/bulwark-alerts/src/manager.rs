//! Alert manager for evaluating rules and managing alerts.
//!
//! [`AlertManager`] is the entry point of the rule engine. It evaluates rules
//! against a [`MetricsSnapshot`], enforces per-rule cooldown and
//! suppression, keeps a bounded alert history, and escalates unresolved
//! alerts according to each rule's [`crate::EscalationPolicy`].
//!
//! Time-dependent operations have an `_at` variant taking the current time
//! explicitly; the plain variants use [`Utc::now`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channels::{ChannelRouter, DispatchReport, NotificationDispatcher};
use crate::config::AlertsConfig;
use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertRule, EscalationPolicy, MetricsSnapshot, RuleEvaluation};

/// The result of one `check_rules` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckResult {
    /// Enabled rules evaluated.
    pub rules_evaluated: usize,
    /// Alerts created by this pass.
    pub fired: Vec<Alert>,
    /// Rules whose condition held but were still cooling down.
    pub skipped_cooldown: usize,
    /// Rules whose condition held but were suppressed.
    pub skipped_suppressed: usize,
    /// Rules whose metric was missing from the snapshot.
    pub missing_metrics: usize,
    /// Channel deliveries that succeeded.
    pub notifications_sent: usize,
    /// Channel deliveries that failed.
    pub notification_failures: usize,
}

/// Aggregate counters for the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    /// Registered rules.
    pub rules: usize,
    /// Alerts currently in history.
    pub alerts_in_history: usize,
    /// Unresolved alerts in history.
    pub active_alerts: usize,
    /// Alerts ever created.
    pub total_fired: u64,
    /// Alerts ever resolved.
    pub total_resolved: u64,
    /// Firings blocked by suppression.
    pub suppressed: u64,
    /// Firings blocked by cooldown.
    pub cooled_down: u64,
    /// Escalation steps applied.
    pub escalations: u64,
    /// Escalations waiting to run.
    pub pending_escalations: usize,
    /// Successful channel deliveries.
    pub notifications_sent: u64,
    /// Failed channel deliveries.
    pub notification_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fired: AtomicU64,
    resolved: AtomicU64,
    suppressed: AtomicU64,
    cooled_down: AtomicU64,
    escalations: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record_dispatch(&self, report: &DispatchReport) {
        self.sent.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }
}

/// Firing bookkeeping for one rule.
#[derive(Debug, Clone, Copy, Default)]
struct RuleState {
    last_fired: Option<DateTime<Utc>>,
    suppressed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct PendingEscalation {
    level: u32,
    due_at: DateTime<Utc>,
    policy: EscalationPolicy,
}

/// Insertion-ordered alert history with a hard bound.
#[derive(Debug)]
struct AlertHistory {
    limit: usize,
    order: VecDeque<String>,
    alerts: HashMap<String, Alert>,
}

impl AlertHistory {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            order: VecDeque::new(),
            alerts: HashMap::new(),
        }
    }

    /// Stores an alert; returns the IDs evicted to make room.
    fn push(&mut self, alert: Alert) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.order.len() >= self.limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.alerts.remove(&oldest);
            evicted.push(oldest);
        }
        self.order.push_back(alert.id.clone());
        self.alerts.insert(alert.id.clone(), alert);
        evicted
    }

    fn retain(&mut self, mut keep: impl FnMut(&Alert) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        let alerts = &mut self.alerts;
        self.order.retain(|id| {
            let kept = alerts.get(id).is_some_and(&mut keep);
            if !kept {
                alerts.remove(id);
                removed.push(id.clone());
            }
            kept
        });
        removed
    }

    fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.order.iter().filter_map(|id| self.alerts.get(id))
    }
}

/// Evaluates rules and owns alert state.
pub struct AlertManager {
    config: AlertsConfig,
    rules: RwLock<BTreeMap<String, AlertRule>>,
    rule_state: Mutex<HashMap<String, RuleState>>,
    history: Mutex<AlertHistory>,
    escalations: Mutex<HashMap<String, PendingEscalation>>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    counters: Counters,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("config", &self.config)
            .field("rules", &self.rules.read().len())
            .field("history", &self.history.lock().order.len())
            .finish_non_exhaustive()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    /// Creates a manager with default configuration and an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AlertsConfig::default())
    }

    /// Creates a manager with the given configuration and an empty router.
    #[must_use]
    pub fn with_config(config: AlertsConfig) -> Self {
        let history = AlertHistory::new(config.history_limit);
        Self {
            config,
            rules: RwLock::new(BTreeMap::new()),
            rule_state: Mutex::new(HashMap::new()),
            history: Mutex::new(history),
            escalations: Mutex::new(HashMap::new()),
            dispatcher: Arc::new(ChannelRouter::new()),
            counters: Counters::default(),
        }
    }

    /// Replaces the notification dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &AlertsConfig {
        &self.config
    }

    /// Registers a rule.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRule` if validation fails, `DuplicateRule` if the ID
    /// is taken.
    pub fn add_rule(&self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write();
        if rules.contains_key(&rule.id) {
            return Err(AlertError::DuplicateRule { id: rule.id });
        }
        info!(rule_id = %rule.id, rule_name = %rule.name, severity = %rule.severity, "added alert rule");
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Replaces an existing rule. Cooldown and suppression state is kept.
    pub fn update_rule(&self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write();
        if !rules.contains_key(&rule.id) {
            return Err(AlertError::RuleNotFound { id: rule.id });
        }
        info!(rule_id = %rule.id, rule_name = %rule.name, "updated alert rule");
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Removes a rule and its firing state.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self.rules.write().remove(rule_id).is_some();
        if removed {
            self.rule_state.lock().remove(rule_id);
            info!(rule_id = %rule_id, "removed alert rule");
        }
        removed
    }

    /// Returns a rule by ID.
    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.rules.read().get(rule_id).cloned()
    }

    /// All rules, ordered by ID.
    #[must_use]
    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.rules.read().values().cloned().collect()
    }

    /// Number of registered rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Enables a rule.
    pub fn enable_rule(&self, rule_id: &str) -> Result<()> {
        self.set_enabled(rule_id, true)
    }

    /// Disables a rule.
    pub fn disable_rule(&self, rule_id: &str) -> Result<()> {
        self.set_enabled(rule_id, false)
    }

    fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<()> {
        let mut rules = self.rules.write();
        let rule = rules.get_mut(rule_id).ok_or_else(|| AlertError::RuleNotFound {
            id: rule_id.to_string(),
        })?;
        rule.enabled = enabled;
        info!(rule_id = %rule_id, enabled, "rule enablement changed");
        Ok(())
    }

    /// Blocks a rule from firing for `duration`.
    pub fn suppress_rule(&self, rule_id: &str, duration: Duration) -> Result<()> {
        self.suppress_rule_at(rule_id, duration, Utc::now())
    }

    /// Blocks a rule from firing until `now + duration`.
    pub fn suppress_rule_at(
        &self,
        rule_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.rules.read().contains_key(rule_id) {
            return Err(AlertError::RuleNotFound {
                id: rule_id.to_string(),
            });
        }
        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.rule_state
            .lock()
            .entry(rule_id.to_string())
            .or_default()
            .suppressed_until = Some(until);
        info!(rule_id = %rule_id, until = %until, "rule suppressed");
        Ok(())
    }

    /// Lifts a suppression. Returns false if the rule was not suppressed.
    pub fn unsuppress_rule(&self, rule_id: &str) -> bool {
        let lifted = self
            .rule_state
            .lock()
            .get_mut(rule_id)
            .and_then(|s| s.suppressed_until.take())
            .is_some();
        if lifted {
            info!(rule_id = %rule_id, "rule suppression lifted");
        }
        lifted
    }

    /// Returns true if the rule is suppressed at `now`.
    #[must_use]
    pub fn is_suppressed_at(&self, rule_id: &str, now: DateTime<Utc>) -> bool {
        self.rule_state
            .lock()
            .get(rule_id)
            .and_then(|s| s.suppressed_until)
            .is_some_and(|until| until > now)
    }

    /// Evaluates every enabled rule against `snapshot` now.
    pub fn check_rules(&self, snapshot: &MetricsSnapshot) -> CheckResult {
        self.check_rules_at(snapshot, Utc::now())
    }

    /// Evaluates every enabled rule against `snapshot` at `now`.
    pub fn check_rules_at(&self, snapshot: &MetricsSnapshot, now: DateTime<Utc>) -> CheckResult {
        let rules: Vec<AlertRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect();

        let mut result = CheckResult {
            rules_evaluated: rules.len(),
            ..CheckResult::default()
        };

        for rule in rules {
            let value = match rule.evaluate(snapshot) {
                RuleEvaluation::Fired { value } => value,
                RuleEvaluation::Clear => continue,
                RuleEvaluation::MissingMetric => {
                    debug!(rule_id = %rule.id, "metric missing from snapshot");
                    result.missing_metrics += 1;
                    continue;
                }
            };

            match self.claim_firing(&rule, now) {
                Gate::Open => {}
                Gate::Suppressed => {
                    debug!(rule_id = %rule.id, "rule suppressed, not firing");
                    self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                    result.skipped_suppressed += 1;
                    continue;
                }
                Gate::CoolingDown => {
                    debug!(rule_id = %rule.id, "rule in cooldown, not firing");
                    self.counters.cooled_down.fetch_add(1, Ordering::Relaxed);
                    result.skipped_cooldown += 1;
                    continue;
                }
            }

            let alert = Alert::from_rule(&rule, value, now);
            info!(
                alert_id = %alert.id,
                rule_id = %rule.id,
                severity = %alert.severity,
                value = ?value,
                "alert fired"
            );
            self.counters.fired.fetch_add(1, Ordering::Relaxed);
            self.store(alert.clone());

            let report = self
                .dispatcher
                .dispatch(&alert, &alert.severity.default_channels());
            self.counters.record_dispatch(&report);
            result.notifications_sent += report.delivered;
            result.notification_failures += report.failed;

            if let Some(policy) = &rule.escalation {
                self.schedule_escalation(&alert.id, policy.clone(), 1, now);
            }
            result.fired.push(alert);
        }

        result
    }

    fn claim_firing(&self, rule: &AlertRule, now: DateTime<Utc>) -> Gate {
        let mut states = self.rule_state.lock();
        let state = states.entry(rule.id.clone()).or_default();

        if let Some(until) = state.suppressed_until {
            if until > now {
                return Gate::Suppressed;
            }
            state.suppressed_until = None;
        }

        if let Some(last) = state.last_fired {
            let elapsed = (now - last).num_milliseconds();
            if elapsed < 0 || (elapsed as u64) < rule.cooldown_ms {
                return Gate::CoolingDown;
            }
        }

        state.last_fired = Some(now);
        Gate::Open
    }

    fn store(&self, alert: Alert) {
        let evicted = self.history.lock().push(alert);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted oldest alerts from history");
            let mut escalations = self.escalations.lock();
            for id in &evicted {
                escalations.remove(id);
            }
        }
    }

    /// Returns an alert by ID.
    #[must_use]
    pub fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        self.history.lock().alerts.get(alert_id).cloned()
    }

    /// Alert history, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.history.lock().iter().cloned().collect()
    }

    /// Unresolved alerts, oldest first.
    #[must_use]
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.history
            .lock()
            .iter()
            .filter(|a| a.is_active())
            .cloned()
            .collect()
    }

    /// Number of alerts in history.
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.history.lock().order.len()
    }

    /// Resolves an alert now.
    pub fn resolve_alert(&self, alert_id: &str) -> Result<Alert> {
        self.resolve_alert_at(alert_id, Utc::now())
    }

    /// Resolves an alert at `now` and cancels its pending escalation.
    ///
    /// Resolving an already resolved alert returns it unchanged.
    pub fn resolve_alert_at(&self, alert_id: &str, now: DateTime<Utc>) -> Result<Alert> {
        let alert = {
            let mut history = self.history.lock();
            let alert = history
                .alerts
                .get_mut(alert_id)
                .ok_or_else(|| AlertError::AlertNotFound {
                    id: alert_id.to_string(),
                })?;
            if alert.resolve_at(now) {
                self.counters.resolved.fetch_add(1, Ordering::Relaxed);
                info!(alert_id = %alert_id, rule_id = %alert.rule_id, "alert resolved");
            }
            alert.clone()
        };

        if self.escalations.lock().remove(alert_id).is_some() {
            debug!(alert_id = %alert_id, "pending escalation cancelled");
        }
        Ok(alert)
    }

    /// Drops alerts older than the retention window.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let retention =
            chrono::Duration::milliseconds(i64::try_from(self.config.retention_ms).unwrap_or(i64::MAX));
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };

        let removed = self.history.lock().retain(|a| a.timestamp >= cutoff);
        if !removed.is_empty() {
            let mut escalations = self.escalations.lock();
            for id in &removed {
                escalations.remove(id);
            }
            info!(count = removed.len(), "expired alerts removed");
        }
        removed.len()
    }

    fn schedule_escalation(
        &self,
        alert_id: &str,
        policy: EscalationPolicy,
        level: u32,
        now: DateTime<Utc>,
    ) {
        let Some(step) = policy.step_for_level(level) else {
            return;
        };
        let due_at = chrono::Duration::from_std(step.delay())
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        debug!(alert_id = %alert_id, level, due_at = %due_at, "escalation scheduled");
        self.escalations.lock().insert(
            alert_id.to_string(),
            PendingEscalation {
                level,
                due_at,
                policy,
            },
        );
    }

    /// Number of escalations waiting to run.
    #[must_use]
    pub fn pending_escalations(&self) -> usize {
        self.escalations.lock().len()
    }

    /// Runs every escalation due now.
    pub fn process_escalations(&self) -> Vec<Alert> {
        self.process_escalations_at(Utc::now())
    }

    /// Runs every escalation due at `now`. Returns the escalated alerts.
    pub fn process_escalations_at(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let due: Vec<(String, PendingEscalation)> = {
            let mut escalations = self.escalations.lock();
            let ids: Vec<String> = escalations
                .iter()
                .filter(|(_, p)| p.due_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| escalations.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let mut escalated = Vec::new();
        for (alert_id, pending) in due {
            let Some(step) = pending.policy.step_for_level(pending.level).cloned() else {
                continue;
            };

            let alert = {
                let mut history = self.history.lock();
                let Some(alert) = history.alerts.get_mut(&alert_id) else {
                    continue;
                };
                if alert.resolved {
                    continue;
                }
                alert.escalation_level = pending.level;
                alert.severity = alert.severity.max(step.severity);
                alert.clone()
            };

            warn!(
                alert_id = %alert_id,
                rule_id = %alert.rule_id,
                level = alert.escalation_level,
                severity = %alert.severity,
                "alert escalated"
            );
            self.counters.escalations.fetch_add(1, Ordering::Relaxed);
            let report = self.dispatcher.dispatch(&alert, &step.channels);
            self.counters.record_dispatch(&report);

            self.schedule_escalation(&alert_id, pending.policy, pending.level + 1, now);
            escalated.push(alert);
        }
        escalated
    }

    /// Spawns a ticker that runs due escalations every
    /// `escalation_tick_ms`.
    ///
    /// The task holds a weak reference and exits once the manager is
    /// dropped or the handle is stopped.
    pub fn spawn_escalation_task(self: &Arc<Self>) -> EscalationHandle {
        let running = Arc::new(AtomicBool::new(true));
        let task_running = Arc::clone(&running);
        let manager: Weak<Self> = Arc::downgrade(self);
        let tick = self.config.escalation_tick();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(tick);
            timer.tick().await;

            while task_running.load(Ordering::SeqCst) {
                timer.tick().await;
                if !task_running.load(Ordering::SeqCst) {
                    break;
                }
                let Some(manager) = manager.upgrade() else {
                    task_running.store(false, Ordering::SeqCst);
                    break;
                };
                manager.process_escalations();
            }
            debug!("escalation task stopped");
        });

        EscalationHandle { running }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> AlertStats {
        let (alerts_in_history, active_alerts) = {
            let history = self.history.lock();
            let active = history.iter().filter(|a| a.is_active()).count();
            (history.order.len(), active)
        };
        AlertStats {
            rules: self.rule_count(),
            alerts_in_history,
            active_alerts,
            total_fired: self.counters.fired.load(Ordering::Relaxed),
            total_resolved: self.counters.resolved.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            cooled_down: self.counters.cooled_down.load(Ordering::Relaxed),
            escalations: self.counters.escalations.load(Ordering::Relaxed),
            pending_escalations: self.pending_escalations(),
            notifications_sent: self.counters.sent.load(Ordering::Relaxed),
            notification_failures: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

enum Gate {
    Open,
    Suppressed,
    CoolingDown,
}

/// Handle for the background escalation task.
#[derive(Debug)]
pub struct EscalationHandle {
    running: Arc<AtomicBool>,
}

impl EscalationHandle {
    /// Check if the escalation task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the task. It exits at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RecordingChannel;
    use crate::types::{
        AlertCondition, AlertSeverity, ChannelKind, ComparisonOperator, EscalationStep,
    };

    struct Fixture {
        manager: AlertManager,
        chat: RecordingChannel,
        email: RecordingChannel,
        pager: RecordingChannel,
    }

    fn fixture() -> Fixture {
        fixture_with(AlertsConfig::default())
    }

    fn fixture_with(config: AlertsConfig) -> Fixture {
        let router = Arc::new(ChannelRouter::new());
        let chat = RecordingChannel::new("chat", ChannelKind::Chat);
        let email = RecordingChannel::new("email", ChannelKind::Email);
        let pager = RecordingChannel::new("pager", ChannelKind::Pager);
        router.add_channel(Arc::new(chat.clone()));
        router.add_channel(Arc::new(email.clone()));
        router.add_channel(Arc::new(pager.clone()));
        Fixture {
            manager: AlertManager::with_config(config).with_dispatcher(router),
            chat,
            email,
            pager,
        }
    }

    fn critical_error_rate() -> AlertRule {
        AlertRule::builder("critical_error_rate", "Critical error rate")
            .condition(
                AlertCondition::new("error_rate", ComparisonOperator::GreaterThan, 0.10).unwrap(),
            )
            .severity(AlertSeverity::Critical)
            .cooldown(Duration::from_secs(300))
            .build()
            .unwrap()
    }

    fn breach() -> MetricsSnapshot {
        MetricsSnapshot::new().with("error_rate", 0.12)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    mod rule_management {
        use super::*;

        #[test]
        fn add_duplicate_fails() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            let err = f.manager.add_rule(critical_error_rate()).unwrap_err();
            assert!(matches!(err, AlertError::DuplicateRule { .. }));
        }

        #[test]
        fn update_missing_fails() {
            let f = fixture();
            let err = f.manager.update_rule(critical_error_rate()).unwrap_err();
            assert!(matches!(err, AlertError::RuleNotFound { .. }));
        }

        #[test]
        fn remove_rule() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            assert!(f.manager.remove_rule("critical_error_rate"));
            assert!(!f.manager.remove_rule("critical_error_rate"));
            assert_eq!(f.manager.rule_count(), 0);
        }

        #[test]
        fn disabled_rule_not_evaluated() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            f.manager.disable_rule("critical_error_rate").unwrap();

            let result = f.manager.check_rules_at(&breach(), at(0));
            assert_eq!(result.rules_evaluated, 0);
            assert!(result.fired.is_empty());

            f.manager.enable_rule("critical_error_rate").unwrap();
            assert_eq!(f.manager.check_rules_at(&breach(), at(1)).fired.len(), 1);
        }

        #[test]
        fn enable_unknown_rule_fails() {
            let f = fixture();
            assert!(f.manager.enable_rule("nope").is_err());
        }
    }

    mod firing {
        use super::*;

        #[test]
        fn fires_once_within_cooldown() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();

            let first = f.manager.check_rules_at(&breach(), at(0));
            assert_eq!(first.fired.len(), 1);
            assert_eq!(first.fired[0].value, Some(0.12));

            let second = f.manager.check_rules_at(&breach(), at(1));
            assert!(second.fired.is_empty());
            assert_eq!(second.skipped_cooldown, 1);
            assert_eq!(f.manager.alert_count(), 1);
        }

        #[test]
        fn fires_again_after_cooldown() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            f.manager.check_rules_at(&breach(), at(0));
            assert_eq!(f.manager.check_rules_at(&breach(), at(300)).fired.len(), 1);
        }

        #[test]
        fn earlier_clock_stays_in_cooldown() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            f.manager.check_rules_at(&breach(), at(100));
            assert!(f.manager.check_rules_at(&breach(), at(50)).fired.is_empty());
        }

        #[test]
        fn critical_routes_to_all_channels() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            let result = f.manager.check_rules_at(&breach(), at(0));

            assert_eq!(result.notifications_sent, 3);
            assert_eq!(f.chat.count(), 1);
            assert_eq!(f.email.count(), 1);
            assert_eq!(f.pager.count(), 1);
        }

        #[test]
        fn warning_routes_to_chat_only() {
            let f = fixture();
            f.manager
                .add_rule(
                    AlertRule::builder("latency", "High latency")
                        .condition(
                            AlertCondition::new(
                                "avg_response_ms",
                                ComparisonOperator::GreaterThan,
                                2000.0,
                            )
                            .unwrap(),
                        )
                        .build()
                        .unwrap(),
                )
                .unwrap();
            f.manager.check_rules_at(
                &MetricsSnapshot::new().with("avg_response_ms", 2500.0),
                at(0),
            );
            assert_eq!(f.chat.count(), 1);
            assert_eq!(f.email.count(), 0);
        }

        #[test]
        fn missing_metric_counted() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            let result = f.manager.check_rules_at(&MetricsSnapshot::new(), at(0));
            assert_eq!(result.missing_metrics, 1);
        }

        #[test]
        fn channel_failures_counted() {
            let router = Arc::new(ChannelRouter::new());
            router.add_channel(Arc::new(
                RecordingChannel::new("chat", ChannelKind::Chat).failing(),
            ));
            let manager = AlertManager::new().with_dispatcher(router);
            manager.add_rule(critical_error_rate()).unwrap();

            let result = manager.check_rules_at(&breach(), at(0));
            assert_eq!(result.fired.len(), 1);
            assert_eq!(result.notification_failures, 1);
            assert_eq!(manager.stats().notification_failures, 1);
        }
    }

    mod suppression {
        use super::*;

        #[test]
        fn suppressed_rule_does_not_fire() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            f.manager
                .suppress_rule_at("critical_error_rate", Duration::from_secs(600), at(0))
                .unwrap();

            let result = f.manager.check_rules_at(&breach(), at(10));
            assert!(result.fired.is_empty());
            assert_eq!(result.skipped_suppressed, 1);
            assert!(f.manager.is_suppressed_at("critical_error_rate", at(10)));
        }

        #[test]
        fn suppression_expires() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            f.manager
                .suppress_rule_at("critical_error_rate", Duration::from_secs(60), at(0))
                .unwrap();
            assert_eq!(f.manager.check_rules_at(&breach(), at(61)).fired.len(), 1);
        }

        #[test]
        fn unsuppress() {
            let f = fixture();
            f.manager.add_rule(critical_error_rate()).unwrap();
            f.manager
                .suppress_rule_at("critical_error_rate", Duration::from_secs(600), at(0))
                .unwrap();
            assert!(f.manager.unsuppress_rule("critical_error_rate"));
            assert!(!f.manager.unsuppress_rule("critical_error_rate"));
            assert_eq!(f.manager.check_rules_at(&breach(), at(1)).fired.len(), 1);
        }

        #[test]
        fn suppress_unknown_rule_fails() {
            let f = fixture();
            assert!(f.manager.suppress_rule("nope", Duration::from_secs(1)).is_err());
        }
    }

    mod escalation {
        use super::*;

        fn escalating_rule() -> AlertRule {
            AlertRule::builder("db", "Database connectivity")
                .predicate(|s| s.number("database_connected") == Some(0.0))
                .severity(AlertSeverity::Warning)
                .escalation(
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
                    ]),
                )
                .build()
                .unwrap()
        }

        fn down() -> MetricsSnapshot {
            MetricsSnapshot::new().with("database_connected", false)
        }

        #[test]
        fn escalates_through_chain_then_stops() {
            let f = fixture();
            f.manager.add_rule(escalating_rule()).unwrap();
            let alert = f.manager.check_rules_at(&down(), at(0)).fired.remove(0);
            assert_eq!(f.manager.pending_escalations(), 1);

            assert!(f.manager.process_escalations_at(at(299)).is_empty());

            let first = f.manager.process_escalations_at(at(300));
            assert_eq!(first.len(), 1);
            assert_eq!(first[0].escalation_level, 1);
            assert_eq!(first[0].severity, AlertSeverity::Error);
            assert_eq!(f.email.count(), 1);

            let second = f.manager.process_escalations_at(at(900));
            assert_eq!(second[0].escalation_level, 2);
            assert_eq!(second[0].severity, AlertSeverity::Critical);
            assert_eq!(f.pager.count(), 1);

            assert_eq!(f.manager.pending_escalations(), 0);
            assert!(f.manager.process_escalations_at(at(10_000)).is_empty());
            assert_eq!(
                f.manager.get_alert(&alert.id).unwrap().escalation_level,
                2
            );
        }

        #[test]
        fn resolve_cancels_escalation() {
            let f = fixture();
            f.manager.add_rule(escalating_rule()).unwrap();
            let alert = f.manager.check_rules_at(&down(), at(0)).fired.remove(0);

            let resolved = f.manager.resolve_alert_at(&alert.id, at(60)).unwrap();
            assert!(resolved.resolved);
            assert_eq!(resolved.resolved_at, Some(at(60)));
            assert_eq!(f.manager.pending_escalations(), 0);
            assert!(f.manager.process_escalations_at(at(1_000)).is_empty());
        }

        #[test]
        fn max_level_repeats_last_step() {
            let f = fixture();
            let mut rule = escalating_rule();
            rule.escalation = rule.escalation.map(|p| p.with_max_level(3));
            f.manager.add_rule(rule).unwrap();
            f.manager.check_rules_at(&down(), at(0));

            f.manager.process_escalations_at(at(300));
            f.manager.process_escalations_at(at(900));
            let third = f.manager.process_escalations_at(at(1_500));
            assert_eq!(third[0].escalation_level, 3);
            assert_eq!(f.pager.count(), 2);
            assert_eq!(f.manager.pending_escalations(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn escalation_task_stops() {
            let manager = Arc::new(AlertManager::new());
            let handle = manager.spawn_escalation_task();
            assert!(handle.is_running());
            tokio::time::sleep(Duration::from_secs(3)).await;
            handle.stop();
            assert!(!handle.is_running());
        }
    }

    mod history {
        use super::*;

        fn always(id: &str) -> AlertRule {
            AlertRule::builder(id, id)
                .predicate(|_| true)
                .cooldown(Duration::ZERO)
                .build()
                .unwrap()
        }

        #[test]
        fn bounded_history_evicts_oldest() {
            let f = fixture_with(AlertsConfig {
                history_limit: 2,
                ..AlertsConfig::default()
            });
            f.manager.add_rule(always("r")).unwrap();
            let first = f.manager.check_rules_at(&MetricsSnapshot::new(), at(0)).fired;
            f.manager.check_rules_at(&MetricsSnapshot::new(), at(1));
            f.manager.check_rules_at(&MetricsSnapshot::new(), at(2));

            assert_eq!(f.manager.alert_count(), 2);
            assert!(f.manager.get_alert(&first[0].id).is_none());
            let stamps: Vec<_> = f.manager.alerts().iter().map(|a| a.timestamp).collect();
            assert_eq!(stamps, vec![at(1), at(2)]);
        }

        #[test]
        fn resolve_unknown_alert_fails() {
            let f = fixture();
            assert!(matches!(
                f.manager.resolve_alert("missing"),
                Err(AlertError::AlertNotFound { .. })
            ));
        }

        #[test]
        fn cleanup_drops_expired() {
            let f = fixture();
            f.manager.add_rule(always("r")).unwrap();
            f.manager.check_rules_at(&MetricsSnapshot::new(), at(0));
            f.manager.check_rules_at(&MetricsSnapshot::new(), at(86_000));

            assert_eq!(f.manager.cleanup_at(at(86_500)), 1);
            assert_eq!(f.manager.alert_count(), 1);
        }

        #[test]
        fn stats_track_lifecycle() {
            let f = fixture();
            f.manager.add_rule(always("r")).unwrap();
            let alert = f.manager.check_rules_at(&MetricsSnapshot::new(), at(0)).fired.remove(0);
            f.manager.check_rules_at(&MetricsSnapshot::new(), at(1));
            f.manager.resolve_alert_at(&alert.id, at(5)).unwrap();

            let stats = f.manager.stats();
            assert_eq!(stats.total_fired, 2);
            assert_eq!(stats.total_resolved, 1);
            assert_eq!(stats.active_alerts, 1);
            assert_eq!(stats.notifications_sent, 2);
        }
    }
}
