//! Recovery strategies and their outcomes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bulwark_errors::{CanonicalError, ErrorType};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{RecoveryError, Result};

/// What one recovery attempt achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    /// Whether the attempt fixed the problem.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Whether further attempts of the same strategy make sense.
    pub should_retry: bool,
    /// Delay before the next attempt.
    pub next_attempt_delay: Option<Duration>,
}

impl StrategyOutcome {
    /// A successful attempt.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            should_retry: false,
            next_attempt_delay: None,
        }
    }

    /// A failed attempt that may be retried.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            should_retry: true,
            next_attempt_delay: None,
        }
    }

    /// Stops further attempts of this strategy.
    #[must_use]
    pub const fn no_retry(mut self) -> Self {
        self.should_retry = false;
        self
    }

    /// Sets the delay before the next attempt.
    #[must_use]
    pub const fn retry_after(mut self, delay: Duration) -> Self {
        self.next_attempt_delay = Some(delay);
        self
    }
}

/// The remediation a strategy performs.
pub trait RecoveryAction: Send + Sync {
    /// Runs attempt number `attempt` (1-based) against `error`.
    fn recover<'a>(&'a self, error: &'a CanonicalError, attempt: u32)
        -> BoxFuture<'a, StrategyOutcome>;
}

/// Adapts a closure into a [`RecoveryAction`].
pub struct FnAction<F>(F);

impl<F, Fut> RecoveryAction for FnAction<F>
where
    F: Fn(CanonicalError, u32) -> Fut + Send + Sync,
    Fut: Future<Output = StrategyOutcome> + Send + 'static,
{
    fn recover<'a>(
        &'a self,
        error: &'a CanonicalError,
        attempt: u32,
    ) -> BoxFuture<'a, StrategyOutcome> {
        (self.0)(error.clone(), attempt).boxed()
    }
}

/// Wraps a closure as a shareable action.
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn RecoveryAction>
where
    F: Fn(CanonicalError, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrategyOutcome> + Send + 'static,
{
    Arc::new(FnAction(f))
}

type Condition = Arc<dyn Fn(&CanonicalError) -> bool + Send + Sync>;

/// A type-specific procedure for remediating a classified error.
#[derive(Clone)]
pub struct RecoveryStrategy {
    /// Unique name.
    pub name: String,
    /// Error types this strategy handles.
    pub error_types: Vec<ErrorType>,
    /// Attempts per recovery.
    pub max_attempts: u32,
    /// Higher runs first.
    pub priority: i32,
    /// Minimum time between two uses of this strategy.
    pub cooldown: Duration,
    /// Strategies tried after this one, by name. Informational.
    pub escalation_chain: Vec<String>,
    condition: Option<Condition>,
    action: Arc<dyn RecoveryAction>,
}

impl std::fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStrategy")
            .field("name", &self.name)
            .field("error_types", &self.error_types)
            .field("max_attempts", &self.max_attempts)
            .field("priority", &self.priority)
            .field("cooldown", &self.cooldown)
            .field("escalation_chain", &self.escalation_chain)
            .field("has_condition", &self.condition.is_some())
            .finish_non_exhaustive()
    }
}

impl RecoveryStrategy {
    /// Creates a strategy with one attempt, priority 0 and no cooldown.
    #[must_use]
    pub fn new(name: impl Into<String>, action: Arc<dyn RecoveryAction>) -> Self {
        Self {
            name: name.into(),
            error_types: Vec::new(),
            max_attempts: 1,
            priority: 0,
            cooldown: Duration::ZERO,
            escalation_chain: Vec::new(),
            condition: None,
            action,
        }
    }

    /// Adds a handled error type.
    #[must_use]
    pub fn handles(mut self, error_type: ErrorType) -> Self {
        if !self.error_types.contains(&error_type) {
            self.error_types.push(error_type);
        }
        self
    }

    /// Sets the attempts per recovery.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Only run for errors matching `condition`.
    #[must_use]
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&CanonicalError) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Names a follow-up strategy.
    #[must_use]
    pub fn escalates_to(mut self, name: impl Into<String>) -> Self {
        self.escalation_chain.push(name.into());
        self
    }

    /// Whether the strategy applies to `error`.
    #[must_use]
    pub fn accepts(&self, error: &CanonicalError) -> bool {
        self.error_types.contains(&error.error_type())
            && self.condition.as_ref().is_none_or(|condition| condition(error))
    }

    /// The strategy's action.
    #[must_use]
    pub fn action(&self) -> &Arc<dyn RecoveryAction> {
        &self.action
    }

    /// Checks that the strategy can ever run.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| RecoveryError::InvalidStrategy {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.error_types.is_empty() {
            return Err(invalid("handles no error types"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts is zero"));
        }
        Ok(())
    }
}
