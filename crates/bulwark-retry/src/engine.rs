//! The retry engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bulwark_errors::{CanonicalError, ErrorClassifier, ErrorContext, ErrorType, RawFailure};
use bulwark_network::ConnectionWaiter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{apply_jitter, RetryConfig};
use crate::error::{Result, RetryError, RetryHistory};

/// One scheduled retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based retry number.
    pub attempt_number: u32,
    /// Delay before the retry.
    pub delay_ms: u64,
    /// The failure that caused the retry.
    pub error: CanonicalError,
    /// When the retry was scheduled.
    pub timestamp: DateTime<Utc>,
}

/// A successful result and how it was reached.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// The operation's value.
    pub value: T,
    /// Retries scheduled before the success.
    pub attempts: Vec<RetryAttempt>,
    /// Time from the first call to the success.
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    /// Delay before each retry, in milliseconds.
    #[must_use]
    pub fn delays_ms(&self) -> Vec<u64> {
        self.attempts.iter().map(|a| a.delay_ms).collect()
    }

    /// Times the operation was invoked.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }
}

/// Observes retries as they are scheduled.
pub trait RetryObserver: Send + Sync + std::fmt::Debug {
    /// Called before the engine waits for a retry.
    fn on_retry(&self, attempt: &RetryAttempt);

    /// Called when the engine gives up.
    fn on_give_up(&self, _error: &RetryError) {}
}

/// Logs retries with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_retry(&self, attempt: &RetryAttempt) {
        warn!(
            attempt = attempt.attempt_number,
            delay_ms = attempt.delay_ms,
            error_type = %attempt.error.error_type(),
            error_id = %attempt.error.id(),
            "Operation failed, retrying"
        );
    }

    fn on_give_up(&self, error: &RetryError) {
        warn!(error = %error, "Giving up on operation");
    }
}

/// A boxed operation factory for [`RetryEngine::with_fallback`].
pub type BoxedOperation<T, E> =
    Box<dyn FnMut() -> Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send>> + Send>;

/// Boxes a closure for use in a fallback chain.
pub fn boxed_operation<T, E, F, Fut>(mut operation: F) -> BoxedOperation<T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
{
    Box::new(move || Box::pin(operation()))
}

/// Whether an error may be retried under `config`.
#[must_use]
pub fn is_retry_eligible(error: &CanonicalError, config: &RetryConfig) -> bool {
    match error.retryable() {
        Some(false) => false,
        _ if error.error_type().is_never_retryable() => false,
        Some(true) => true,
        None => config.retryable_types.contains(&error.error_type()),
    }
}

/// Runs operations with bounded retries.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    classifier: ErrorClassifier,
    waiter: Option<Arc<dyn ConnectionWaiter>>,
    observer: Arc<dyn RetryObserver>,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(ErrorClassifier::new())
    }
}

impl RetryEngine {
    /// Creates an engine that classifies failures with `classifier`.
    #[must_use]
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self {
            classifier,
            waiter: None,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Waits for connectivity on connectivity failures instead of sleeping.
    #[must_use]
    pub fn with_connection_waiter(mut self, waiter: Arc<dyn ConnectionWaiter>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    /// Replaces the retry observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The classifier used for failures.
    #[must_use]
    pub const fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable
    /// error, or exhausts `config.max_retries`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut operation: F,
        config: &RetryConfig,
        context: &ErrorContext,
    ) -> Result<RetryOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawFailure>,
    {
        let started = Instant::now();
        let mut attempts: Vec<RetryAttempt> = Vec::new();
        let mut retries: u32 = 0;

        loop {
            let failure: RawFailure = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(retries, "Operation succeeded after retrying");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) => e.into(),
            };

            let context = context.clone().with_retry_count(retries);
            let error = self.classifier.classify(&failure, &context).error;

            if !is_retry_eligible(&error, config) {
                return Err(self.give_up(RetryError::NonRetryable {
                    error: Box::new(error),
                    history: RetryHistory {
                        attempts,
                        calls: retries + 1,
                        duration: started.elapsed(),
                    },
                }));
            }

            if retries >= config.max_retries {
                return Err(self.give_up(RetryError::Exhausted {
                    last_error: Box::new(error),
                    history: RetryHistory {
                        attempts,
                        calls: retries + 1,
                        duration: started.elapsed(),
                    },
                }));
            }

            retries += 1;
            let delay = retry_delay(retries, &error, config);
            let error_type = error.error_type();
            let attempt = RetryAttempt {
                attempt_number: retries,
                delay_ms: delay.as_millis() as u64,
                error,
                timestamp: Utc::now(),
            };
            self.observer.on_retry(&attempt);
            attempts.push(attempt);

            self.wait(delay, error_type, config).await;
        }
    }

    /// Like [`execute`](Self::execute) but returns only the value.
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        config: &RetryConfig,
        context: &ErrorContext,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawFailure>,
    {
        self.execute(operation, config, context)
            .await
            .map(|outcome| outcome.value)
    }

    /// Tries each operation in order, each with its own retries. Returns
    /// the first success or the last failure.
    pub async fn with_fallback<T, E>(
        &self,
        operations: Vec<BoxedOperation<T, E>>,
        config: &RetryConfig,
        context: &ErrorContext,
    ) -> Result<T>
    where
        E: Into<RawFailure>,
    {
        let total = operations.len();
        let mut last_error = None;

        for (index, mut operation) in operations.into_iter().enumerate() {
            match self.execute(&mut operation, config, context).await {
                Ok(outcome) => {
                    if index > 0 {
                        debug!(index, "Fallback operation succeeded");
                    }
                    return Ok(outcome.value);
                }
                Err(e) => {
                    if index + 1 < total {
                        warn!(index, error = %e, "Operation failed, trying fallback");
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(RetryError::NoOperations))
    }

    fn give_up(&self, error: RetryError) -> RetryError {
        self.observer.on_give_up(&error);
        error
    }

    async fn wait(&self, delay: Duration, error_type: ErrorType, config: &RetryConfig) {
        if error_type == ErrorType::Connectivity {
            if let Some(waiter) = &self.waiter {
                if !waiter.is_connected() {
                    let limit = config.max_delay().max(delay);
                    if let Err(e) = waiter.wait_until_online(Some(limit)).await {
                        debug!(error = %e, "Still offline, retrying anyway");
                    }
                    return;
                }
            }
        }
        tokio::time::sleep(delay).await;
    }
}

/// Delay before retry `attempt`: the server's retry-after when given,
/// otherwise exponential backoff with optional jitter.
fn retry_delay(attempt: u32, error: &CanonicalError, config: &RetryConfig) -> Duration {
    if let Some(ms) = error.retry_after_ms() {
        return Duration::from_millis(ms);
    }
    let delay = config.delay_for_attempt(attempt);
    if config.jitter {
        apply_jitter(delay, &mut rand::thread_rng())
    } else {
        delay
    }
}
