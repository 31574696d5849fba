//! The composition root.
//!
//! [`Bulwark`] owns one instance of every component, wired together:
//!
//! - the classifier asks the network monitor whether the client is online,
//! - the retry engine and the network strategy wait on the monitor instead
//!   of sleeping through an outage,
//! - the recovery orchestrator has the built-in strategies registered,
//! - alerts go through the correlation engine before reaching a channel,
//! - failures that outlive their retries are handed to recovery by
//!   [`Bulwark::run_resilient`].
//!
//! Build it once at startup with [`Bulwark::builder`], call
//! [`start`](Bulwark::start) from inside a tokio runtime, and
//! [`shutdown`](Bulwark::shutdown) before exit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bulwark_alerts::{EscalationHandle, NotificationChannel};
use bulwark_errors::{
    Classification, ConnectivityStatus, ErrorClassifier, ErrorContext, RawFailure,
};
use bulwark_network::{
    ConnectionWaiter, HealthProbe, NetworkMonitor, OperationExecutor, ProbeHandle,
};
use bulwark_recovery::{
    register_default_strategies, AuthHandler, RecoveryOrchestrator, RecoveryResult,
    RetryOperation, ServiceModeController, StrategyDependencies,
};
use bulwark_retry::{RetryEngine, RetryError};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::BulwarkConfig;
use crate::error::Result;
use crate::system::{CleanupHandle, IntegratedAlertSystem};

/// A failure that neither retries nor recovery could absorb.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct Unrecovered {
    /// The terminal retry error, with its attempt history.
    pub error: RetryError,
    /// What recovery did, when it ran.
    pub recovery: Option<RecoveryResult>,
}

impl Unrecovered {
    /// Whether the failure should be surfaced as an incident.
    #[must_use]
    pub fn escalate(&self) -> bool {
        self.recovery.as_ref().is_some_and(|r| r.escalate)
    }
}

/// Builder for [`Bulwark`].
#[must_use]
pub struct BulwarkBuilder {
    config: BulwarkConfig,
    executor: Option<Arc<dyn OperationExecutor>>,
    probe: Option<Arc<dyn HealthProbe>>,
    auth: Option<Arc<dyn AuthHandler>>,
    providers: Vec<String>,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl std::fmt::Debug for BulwarkBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulwarkBuilder")
            .field("config", &self.config)
            .field("executor", &self.executor.is_some())
            .field("probe", &self.probe.is_some())
            .field("auth", &self.auth.is_some())
            .field("providers", &self.providers)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl BulwarkBuilder {
    fn new(config: BulwarkConfig) -> Self {
        Self {
            config,
            executor: None,
            probe: None,
            auth: None,
            providers: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Replays queued operations when connectivity returns.
    pub fn executor(mut self, executor: Arc<dyn OperationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Overrides the HTTP probe built from `network.health_url`.
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Enables the token refresh strategy.
    pub fn auth_handler(mut self, auth: Arc<dyn AuthHandler>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Providers the analysis fallback strategy may switch between.
    pub fn providers(mut self, providers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a notification channel.
    pub fn channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Validates the configuration and wires every component.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when a built-in strategy cannot be
    /// registered.
    pub fn build(self) -> Result<Bulwark> {
        let config = self.config;
        config.validate()?;

        let mut monitor = NetworkMonitor::from_config(config.network.clone())?;
        if let Some(executor) = self.executor {
            monitor = monitor.with_executor(executor);
        }
        if let Some(probe) = self.probe {
            monitor = monitor.with_probe(probe);
        }
        let monitor = Arc::new(monitor);
        let restored = monitor.restore_queue();
        if restored > 0 {
            info!(restored, "restored offline queue");
        }

        let connectivity: Arc<dyn ConnectivityStatus> = Arc::clone(&monitor) as _;
        let waiter: Arc<dyn ConnectionWaiter> = Arc::clone(&monitor) as _;

        let classifier =
            ErrorClassifier::with_config(config.classifier.clone()).with_connectivity(connectivity);
        let retry = RetryEngine::new(classifier.clone()).with_connection_waiter(Arc::clone(&waiter));

        let service_mode = Arc::new(ServiceModeController::new(self.providers));
        let recovery = RecoveryOrchestrator::new(config.recovery.clone())?;
        register_default_strategies(
            &recovery,
            &StrategyDependencies {
                waiter: Some(waiter),
                auth: self.auth,
                service_mode: Arc::clone(&service_mode),
                base_delay: None,
            },
        )?;

        let alerts = IntegratedAlertSystem::new(config.alerts.clone(), config.correlation.clone())?;
        for channel in self.channels {
            alerts.add_channel(channel);
        }

        info!(
            strategies = recovery.strategy_names().len(),
            rules = alerts.rules().len(),
            online = monitor.is_online(),
            "bulwark initialized"
        );

        Ok(Bulwark {
            config,
            classifier,
            monitor,
            retry,
            recovery,
            service_mode,
            alerts,
            probe_handle: Mutex::new(None),
            escalation_handle: Mutex::new(None),
            cleanup_handle: Mutex::new(None),
        })
    }
}

/// Every Bulwark component, owned in one place.
pub struct Bulwark {
    config: BulwarkConfig,
    classifier: ErrorClassifier,
    monitor: Arc<NetworkMonitor>,
    retry: RetryEngine,
    recovery: RecoveryOrchestrator,
    service_mode: Arc<ServiceModeController>,
    alerts: IntegratedAlertSystem,
    probe_handle: Mutex<Option<ProbeHandle>>,
    escalation_handle: Mutex<Option<EscalationHandle>>,
    cleanup_handle: Mutex<Option<CleanupHandle>>,
}

impl std::fmt::Debug for Bulwark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulwark")
            .field("monitor", &self.monitor)
            .field("alerts", &self.alerts)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Bulwark {
    /// Starts building from `config`.
    pub fn builder(config: BulwarkConfig) -> BulwarkBuilder {
        BulwarkBuilder::new(config)
    }

    /// Builds with no injected capabilities.
    pub fn new(config: BulwarkConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &BulwarkConfig {
        &self.config
    }

    /// The error classifier.
    #[must_use]
    pub const fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// The connectivity monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    /// The retry engine.
    #[must_use]
    pub const fn retry(&self) -> &RetryEngine {
        &self.retry
    }

    /// The recovery orchestrator.
    #[must_use]
    pub const fn recovery(&self) -> &RecoveryOrchestrator {
        &self.recovery
    }

    /// Provider and service mode state used by the fallback strategy.
    #[must_use]
    pub fn service_mode(&self) -> &Arc<ServiceModeController> {
        &self.service_mode
    }

    /// The integrated alert system.
    #[must_use]
    pub const fn alerts(&self) -> &IntegratedAlertSystem {
        &self.alerts
    }

    /// Classifies a failure.
    #[must_use]
    pub fn classify(&self, failure: &RawFailure, context: &ErrorContext) -> Classification {
        self.classifier.classify(failure, context)
    }

    /// Runs `operation` under the configured retry policy.
    pub async fn run_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        context: &ErrorContext,
    ) -> bulwark_retry::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawFailure>,
    {
        self.retry
            .with_retry(operation, &self.config.retry, context)
            .await
    }

    /// Runs `operation` under the retry policy and, when the failure
    /// survives it, hands the last error to the recovery orchestrator.
    ///
    /// A successful recovery re-runs `operation` and returns its value.
    /// Otherwise the retry error comes back together with the recovery
    /// result, whose `escalate` flag says whether to raise an incident.
    pub async fn run_resilient<T, E, F, Fut>(
        &self,
        operation: F,
        context: &ErrorContext,
    ) -> std::result::Result<T, Unrecovered>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<RawFailure> + Send + 'static,
    {
        let operation = Arc::new(operation);
        let error = match self
            .retry
            .with_retry(&*operation, &self.config.retry, context)
            .await
        {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let Some(last_error) = error.last_error().cloned() else {
            return Err(Unrecovered {
                error,
                recovery: None,
            });
        };

        let recovered: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let rerun: RetryOperation = {
            let slot = Arc::clone(&recovered);
            Arc::new(
                move || -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>> {
                    let attempt = operation();
                    let slot = Arc::clone(&slot);
                    Box::pin(async move {
                        match attempt.await {
                            Ok(value) => {
                                *slot.lock() = Some(value);
                                Ok(())
                            }
                            Err(e) => Err(e.into().message),
                        }
                    })
                },
            )
        };

        info!(
            error_id = %last_error.id(),
            error_type = %last_error.error_type(),
            "retries exhausted, attempting recovery"
        );
        let result = self
            .recovery
            .attempt_recovery(&last_error, context, Some(rerun))
            .await;

        match recovered.lock().take() {
            Some(value) if result.success => Ok(value),
            _ => {
                if result.escalate {
                    warn!(
                        error_id = %last_error.id(),
                        strategy = result.strategy_used.as_deref().unwrap_or("-"),
                        message = %result.message,
                        "recovery failed, escalating"
                    );
                }
                Err(Unrecovered {
                    error,
                    recovery: Some(result),
                })
            }
        }
    }

    /// Starts the probe loop (when a probe is configured), the escalation
    /// ticker and the periodic alert cleanup. Must be called inside a
    /// tokio runtime. Calling it twice has no effect.
    pub fn start(&self) {
        {
            let mut probe = self.probe_handle.lock();
            if probe.is_none() && self.config.network.health_url.is_some() {
                *probe = Some(self.monitor.start_probing());
            }
        }
        {
            let mut cleanup = self.cleanup_handle.lock();
            if cleanup.is_none() {
                *cleanup = Some(self.alerts.spawn_cleanup_task());
            }
        }

        let mut escalation = self.escalation_handle.lock();
        if escalation.is_none() {
            *escalation = Some(self.alerts.spawn_escalation_task());
        }
        info!("bulwark background tasks started");
    }

    /// Whether background tasks are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.escalation_handle
            .lock()
            .as_ref()
            .is_some_and(EscalationHandle::is_running)
    }

    /// Stops background tasks and persists the offline queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue snapshot cannot be written. Tasks are
    /// stopped either way.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.probe_handle.lock().take() {
            handle.stop();
        }
        if let Some(handle) = self.escalation_handle.lock().take() {
            handle.stop();
        }
        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.stop();
        }

        let queued = self.monitor.queue_len();
        if let Err(e) = self.monitor.persist_queue() {
            warn!(error = %e, queued, "failed to persist offline queue");
            return Err(e.into());
        }
        info!(queued, "bulwark shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_alerts::{ChannelKind, MetricsSnapshot, RecordingChannel};
    use bulwark_errors::ErrorType;
    use bulwark_network::{OperationPriority, QueuedOperation};

    fn quiet_config() -> BulwarkConfig {
        let mut config = BulwarkConfig::default();
        config.alerts.default_rules = false;
        config
    }

    #[test]
    fn builds_with_defaults() {
        let bulwark = Bulwark::new(BulwarkConfig::default()).unwrap();
        assert_eq!(bulwark.alerts().rules().len(), 7);
        assert!(bulwark.monitor().is_online());
        assert!(!bulwark.recovery().strategy_names().is_empty());
        assert!(!bulwark.is_running());
    }

    #[test]
    fn auth_strategy_only_with_handler() {
        let bulwark = Bulwark::new(quiet_config()).unwrap();
        assert!(bulwark
            .recovery()
            .strategies_for(ErrorType::Authentication)
            .is_empty());
    }

    #[test]
    fn invalid_config_rejected() {
        let mut config = BulwarkConfig::default();
        config.recovery.max_concurrent = 0;
        assert!(Bulwark::new(config).is_err());
    }

    #[test]
    fn builder_registers_channels() {
        let chat = RecordingChannel::new("chat", ChannelKind::Chat);
        let mut config = quiet_config();
        config.alerts.default_rules = true;
        let bulwark = Bulwark::builder(config)
            .channel(Arc::new(chat.clone()))
            .build()
            .unwrap();

        bulwark
            .alerts()
            .check_metrics(&MetricsSnapshot::new().with("memory_usage", 0.99));
        assert_eq!(chat.count(), 1);
    }

    #[test]
    fn classify_uses_connectivity() {
        let bulwark = Bulwark::new(quiet_config()).unwrap();
        let classification = bulwark.classify(&RawFailure::http(503), &ErrorContext::new());
        assert_eq!(
            classification.error.error_type(),
            ErrorType::ServiceUnavailable
        );
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let bulwark = Bulwark::new(quiet_config()).unwrap();
        bulwark.start();
        assert!(bulwark.is_running());
        let cleanup = bulwark.cleanup_handle.lock().clone().unwrap();
        assert!(cleanup.is_running());
        bulwark.start();

        bulwark.shutdown().unwrap();
        assert!(!bulwark.is_running());
        assert!(!cleanup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn started_runtime_purges_stale_alerts() {
        let bulwark = Bulwark::new(quiet_config()).unwrap();
        let rule = bulwark_alerts::AlertRule::builder("disk_full", "Disk full")
            .predicate(|_| true)
            .severity(bulwark_alerts::AlertSeverity::Critical)
            .build()
            .unwrap();
        bulwark.alerts().add_rule(rule).unwrap();

        let stale = chrono::Utc::now() - chrono::Duration::hours(25);
        bulwark
            .alerts()
            .check_metrics_at(&MetricsSnapshot::new(), stale);
        assert_eq!(bulwark.alerts().alerts().len(), 1);
        assert_eq!(bulwark.alerts().correlation().stats().history_size, 1);

        bulwark.start();
        let interval = bulwark.config().alerts.cleanup_interval();
        tokio::time::sleep(interval + std::time::Duration::from_secs(1)).await;

        assert!(bulwark.alerts().alerts().is_empty());
        assert_eq!(bulwark.alerts().correlation().stats().history_size, 0);
        bulwark.shutdown().unwrap();
    }

    #[tokio::test]
    async fn shutdown_persists_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut config = quiet_config();
        config.network.queue_snapshot_path = Some(path.clone());

        let bulwark = Bulwark::new(config.clone()).unwrap();
        bulwark
            .monitor()
            .queue_operation(
                QueuedOperation::new("sync", serde_json::json!({"doc": 1}))
                    .with_priority(OperationPriority::High),
            )
            .unwrap();
        bulwark.shutdown().unwrap();
        assert!(path.exists());

        let restored = Bulwark::new(config).unwrap();
        assert_eq!(restored.monitor().queue_len(), 1);
    }
}
