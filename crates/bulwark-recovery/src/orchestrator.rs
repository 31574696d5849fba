//! The recovery orchestrator.
//!
//! Strategies are registered per error type and run in descending priority.
//! At most one recovery runs per error ID; concurrent callers for the same
//! error join the running one. Recoveries run on their own task, so a caller
//! that stops waiting does not leave a stale in-flight entry behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bulwark_errors::{CanonicalError, ErrorContext, ErrorType};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, RecoveryAttemptLog, RecoveryStats};
use crate::error::{RecoveryError, Result};
use crate::strategy::RecoveryStrategy;

/// Re-runs the operation that originally failed.
pub type RetryOperation =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

type InFlight = Shared<BoxFuture<'static, RecoveryResult>>;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Maximum recoveries running at once.
    pub max_concurrent: usize,
    /// Minimum time between recoveries of the same error.
    pub error_cooldown_ms: u64,
    /// Delay between attempts when a strategy does not suggest one.
    pub default_attempt_delay_ms: u64,
    /// Audit log entries kept.
    pub audit_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            error_cooldown_ms: 1_000,
            default_attempt_delay_ms: 1_000,
            audit_capacity: AuditLog::DEFAULT_CAPACITY,
        }
    }
}

impl RecoveryConfig {
    /// Minimum time between recoveries of the same error.
    #[must_use]
    pub const fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }

    /// Delay between attempts when a strategy does not suggest one.
    #[must_use]
    pub const fn default_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.default_attempt_delay_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(RecoveryError::InvalidConfig {
                reason: "max_concurrent must be positive".to_string(),
            });
        }
        if self.audit_capacity == 0 {
            return Err(RecoveryError::InvalidConfig {
                reason: "audit_capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// How a recovery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// A strategy fixed the problem.
    Recovered,
    /// Every strategy was exhausted.
    Failed,
    /// Throttled; ask again after `retry_after`.
    RetryLater,
    /// No strategy handles the error.
    NoStrategy,
}

/// The result of [`RecoveryOrchestrator::attempt_recovery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// How the recovery ended.
    pub status: RecoveryStatus,
    /// Whether the error was recovered.
    pub success: bool,
    /// Strategy that succeeded, or the last one tried.
    pub strategy_used: Option<String>,
    /// Attempts across all strategies.
    pub attempts: u32,
    /// Summary.
    pub message: String,
    /// The caller should surface the error and consider an incident.
    pub escalate: bool,
    /// Suggested wait before asking again.
    pub retry_after: Option<Duration>,
}

impl RecoveryResult {
    fn retry_later(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            status: RecoveryStatus::RetryLater,
            success: false,
            strategy_used: None,
            attempts: 0,
            message: message.into(),
            escalate: false,
            retry_after: Some(retry_after),
        }
    }

    fn failed(status: RecoveryStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            strategy_used: None,
            attempts: 0,
            message: message.into(),
            escalate: true,
            retry_after: None,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    by_type: HashMap<ErrorType, Vec<RecoveryStrategy>>,
    names: Vec<String>,
}

struct Inner {
    config: RecoveryConfig,
    registry: RwLock<Registry>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    error_cooldowns: Mutex<HashMap<String, Instant>>,
    strategy_last_used: Mutex<HashMap<String, Instant>>,
    audit: AuditLog,
}

/// Removes the in-flight entry however the recovery task ends.
struct InFlightGuard {
    inner: Arc<Inner>,
    error_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.error_id);
    }
}

/// Maps error types to recovery strategies and runs them.
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("config", &self.inner.config)
            .field("strategies", &self.inner.registry.read().names)
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for RecoveryOrchestrator {
    fn default() -> Self {
        Self::build(RecoveryConfig::default())
    }
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator with no strategies.
    pub fn new(config: RecoveryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RecoveryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                audit: AuditLog::new(config.audit_capacity),
                config,
                registry: RwLock::new(Registry::default()),
                in_flight: Mutex::new(HashMap::new()),
                error_cooldowns: Mutex::new(HashMap::new()),
                strategy_last_used: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The orchestrator's configuration.
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// Registers a strategy for each error type it handles.
    pub fn register_strategy(&self, strategy: RecoveryStrategy) -> Result<()> {
        strategy.validate()?;

        let mut registry = self.inner.registry.write();
        if registry.names.contains(&strategy.name) {
            return Err(RecoveryError::DuplicateStrategy {
                name: strategy.name,
            });
        }

        for error_type in &strategy.error_types {
            let list = registry.by_type.entry(*error_type).or_default();
            list.push(strategy.clone());
            // Stable: equal priorities keep registration order.
            list.sort_by_key(|s| std::cmp::Reverse(s.priority));
        }

        info!(
            strategy = %strategy.name,
            priority = strategy.priority,
            max_attempts = strategy.max_attempts,
            "Registered recovery strategy"
        );
        registry.names.push(strategy.name);
        Ok(())
    }

    /// Removes a strategy by name.
    pub fn unregister_strategy(&self, name: &str) -> bool {
        let mut registry = self.inner.registry.write();
        let before = registry.names.len();
        registry.names.retain(|n| n != name);
        for list in registry.by_type.values_mut() {
            list.retain(|s| s.name != name);
        }
        registry.names.len() != before
    }

    /// Strategies for `error_type`, highest priority first.
    #[must_use]
    pub fn strategies_for(&self, error_type: ErrorType) -> Vec<RecoveryStrategy> {
        self.inner
            .registry
            .read()
            .by_type
            .get(&error_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Registered strategy names, in registration order.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<String> {
        self.inner.registry.read().names.clone()
    }

    /// Recoveries currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// The attempt log.
    #[must_use]
    pub fn audit_log(&self) -> &AuditLog {
        &self.inner.audit
    }

    /// Success rates from the attempt log.
    #[must_use]
    pub fn stats(&self) -> RecoveryStats {
        self.inner.audit.stats()
    }

    /// Forgets every error and strategy cooldown.
    pub fn clear_cooldowns(&self) {
        self.inner.error_cooldowns.lock().clear();
        self.inner.strategy_last_used.lock().clear();
    }

    /// Tries to recover from `error`.
    ///
    /// `operation` is re-run after a strategy reports success; the recovery
    /// only counts when it succeeds too.
    pub async fn attempt_recovery(
        &self,
        error: &CanonicalError,
        context: &ErrorContext,
        operation: Option<RetryOperation>,
    ) -> RecoveryResult {
        let error_id = error.id().to_string();

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();

            if let Some(running) = in_flight.get(&error_id) {
                debug!(error_id = %error_id, "Joining in-flight recovery");
                Ok(running.clone())
            } else if in_flight.len() >= self.inner.config.max_concurrent {
                Err(RecoveryResult::retry_later(
                    format!(
                        "{} recoveries already running",
                        self.inner.config.max_concurrent
                    ),
                    self.inner.config.error_cooldown(),
                ))
            } else if let Some(remaining) = self.error_cooling_down(error) {
                Err(RecoveryResult::retry_later(
                    "same error recovered moments ago",
                    remaining,
                ))
            } else {
                let task = self.spawn_recovery(error.clone(), context.clone(), operation);
                in_flight.insert(error_id.clone(), task.clone());
                Ok(task)
            }
        };

        match pending {
            Ok(task) => task.await,
            Err(throttled) => {
                debug!(error_id = %error_id, message = %throttled.message, "Recovery throttled");
                throttled
            }
        }
    }

    fn error_cooling_down(&self, error: &CanonicalError) -> Option<Duration> {
        let cooldown = self.inner.config.error_cooldown();
        let key = fingerprint(error);
        let now = Instant::now();

        let mut cooldowns = self.inner.error_cooldowns.lock();
        if let Some(last) = cooldowns.get(&key) {
            let elapsed = now.duration_since(*last);
            if elapsed < cooldown {
                return Some(cooldown - elapsed);
            }
        }
        cooldowns.insert(key, now);
        None
    }

    fn spawn_recovery(
        &self,
        error: CanonicalError,
        context: ErrorContext,
        operation: Option<RetryOperation>,
    ) -> InFlight {
        let inner = Arc::clone(&self.inner);
        let error_id = error.id().to_string();
        let strategy_hint = format!("{} recovery", error.error_type());

        let handle = tokio::spawn(async move {
            let _guard = InFlightGuard {
                inner: Arc::clone(&inner),
                error_id,
            };
            inner.run(&error, &context, operation).await
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                error!(error = %e, "Recovery task failed");
                RecoveryResult::failed(
                    RecoveryStatus::Failed,
                    format!("{strategy_hint} aborted: {e}"),
                )
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn run(
        &self,
        error: &CanonicalError,
        context: &ErrorContext,
        operation: Option<RetryOperation>,
    ) -> RecoveryResult {
        let strategies = self
            .registry
            .read()
            .by_type
            .get(&error.error_type())
            .cloned()
            .unwrap_or_default();

        if strategies.is_empty() {
            debug!(error_type = %error.error_type(), "No recovery strategy registered");
            return RecoveryResult::failed(
                RecoveryStatus::NoStrategy,
                format!("no recovery strategy for {}", error.error_type()),
            );
        }

        let mut total_attempts = 0;
        let mut last_strategy = None;
        let mut last_message = String::from("no applicable recovery strategy");

        for strategy in strategies {
            if !strategy.accepts(error) {
                debug!(strategy = %strategy.name, "Strategy condition rejected error");
                continue;
            }
            if self.strategy_cooling_down(&strategy) {
                debug!(strategy = %strategy.name, "Strategy cooling down, skipping");
                continue;
            }

            info!(
                strategy = %strategy.name,
                error_id = %error.id(),
                error_type = %error.error_type(),
                component = context.component.as_deref().unwrap_or("-"),
                "Attempting recovery"
            );
            last_strategy = Some(strategy.name.clone());

            for attempt in 1..=strategy.max_attempts {
                total_attempts += 1;
                let started = Instant::now();
                let outcome = strategy.action().recover(error, attempt).await;

                let mut success = outcome.success;
                let mut message = outcome.message.clone();
                if success {
                    if let Some(operation) = &operation {
                        if let Err(reason) = operation().await {
                            success = false;
                            message = format!("{message}; retried operation failed: {reason}");
                        }
                    }
                }

                self.audit.record(RecoveryAttemptLog::new(
                    error.id(),
                    &strategy.name,
                    attempt,
                    success,
                    started.elapsed().as_millis() as u64,
                    &message,
                ));

                if success {
                    info!(
                        strategy = %strategy.name,
                        attempt,
                        error_id = %error.id(),
                        "Recovery succeeded"
                    );
                    return RecoveryResult {
                        status: RecoveryStatus::Recovered,
                        success: true,
                        strategy_used: Some(strategy.name.clone()),
                        attempts: total_attempts,
                        message,
                        escalate: false,
                        retry_after: None,
                    };
                }

                warn!(
                    strategy = %strategy.name,
                    attempt,
                    max_attempts = strategy.max_attempts,
                    message = %message,
                    "Recovery attempt failed"
                );
                last_message = message;

                // A strategy that succeeded but whose retried operation failed
                // moves on without waiting or consulting `should_retry`.
                if outcome.success {
                    continue;
                }
                if !outcome.should_retry {
                    break;
                }
                if attempt < strategy.max_attempts {
                    let delay = outcome
                        .next_attempt_delay
                        .unwrap_or_else(|| self.config.default_attempt_delay());
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(
            error_id = %error.id(),
            error_type = %error.error_type(),
            attempts = total_attempts,
            "Recovery strategies exhausted, escalating"
        );
        RecoveryResult {
            status: RecoveryStatus::Failed,
            success: false,
            strategy_used: last_strategy,
            attempts: total_attempts,
            message: last_message,
            escalate: true,
            retry_after: None,
        }
    }

    fn strategy_cooling_down(&self, strategy: &RecoveryStrategy) -> bool {
        let now = Instant::now();
        let mut last_used = self.strategy_last_used.lock();
        if let Some(last) = last_used.get(&strategy.name) {
            if now.duration_since(*last) < strategy.cooldown {
                return true;
            }
        }
        last_used.insert(strategy.name.clone(), now);
        false
    }
}

/// Key identifying "the same error" for the per-error cooldown.
fn fingerprint(error: &CanonicalError) -> String {
    format!(
        "{}:{}:{}",
        error.error_type(),
        error.status_code().map_or_else(String::new, |s| s.to_string()),
        error.message()
    )
}
