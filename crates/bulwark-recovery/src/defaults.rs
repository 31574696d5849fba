//! The built-in recovery strategies.
//!
//! Call [`register_default_strategies`] once from the composition root.

use std::sync::Arc;
use std::time::Duration;

use bulwark_errors::{CanonicalError, ErrorType};
use bulwark_network::ConnectionWaiter;
use bulwark_retry::{apply_jitter, calculate_backoff};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{info, warn};

use crate::error::Result;
use crate::orchestrator::RecoveryOrchestrator;
use crate::service_mode::ServiceModeController;
use crate::strategy::{RecoveryAction, RecoveryStrategy, StrategyOutcome};

/// Name of the connectivity strategy.
pub const NETWORK_STRATEGY: &str = "network-reconnect";
/// Name of the token refresh strategy.
pub const AUTH_STRATEGY: &str = "auth-refresh";
/// Name of the rate limit strategy.
pub const RATE_LIMIT_STRATEGY: &str = "rate-limit-backoff";
/// Name of the server error strategy.
pub const SERVER_STRATEGY: &str = "server-backoff";
/// Name of the service unavailable strategy.
pub const SERVICE_UNAVAILABLE_STRATEGY: &str = "service-unavailable-backoff";
/// Name of the analysis fallback strategy.
pub const ANALYSIS_STRATEGY: &str = "analysis-fallback";

const NETWORK_WAIT_LIMIT: Duration = Duration::from_secs(30);
const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(300);
const SERVICE_UNAVAILABLE_STEP: Duration = Duration::from_secs(10);

/// Token refresh and re-login, supplied by the host application.
pub trait AuthHandler: Send + Sync {
    /// Tries to refresh the session token.
    fn refresh_token(&self) -> BoxFuture<'_, std::result::Result<(), String>>;

    /// Sends the user back to the login flow.
    fn force_relogin(&self) -> BoxFuture<'_, ()>;
}

/// Capabilities the default strategies depend on.
#[derive(Clone, Default)]
pub struct StrategyDependencies {
    /// Waits for connectivity.
    pub waiter: Option<Arc<dyn ConnectionWaiter>>,
    /// Refreshes tokens. Without it no authentication strategy is registered.
    pub auth: Option<Arc<dyn AuthHandler>>,
    /// Provider and service mode switching.
    pub service_mode: Arc<ServiceModeController>,
    /// Base delay for the exponential strategies.
    pub base_delay: Option<Duration>,
}

impl StrategyDependencies {
    fn base_delay(&self) -> Duration {
        self.base_delay.unwrap_or(Duration::from_secs(1))
    }
}

/// Registers the built-in strategies.
pub fn register_default_strategies(
    orchestrator: &RecoveryOrchestrator,
    deps: &StrategyDependencies,
) -> Result<()> {
    let base = deps.base_delay();

    orchestrator.register_strategy(
        RecoveryStrategy::new(
            NETWORK_STRATEGY,
            Arc::new(NetworkReconnect {
                waiter: deps.waiter.clone(),
                base,
            }),
        )
        .handles(ErrorType::Network)
        .handles(ErrorType::Connectivity)
        .with_max_attempts(3)
        .with_priority(90),
    )?;

    if let Some(auth) = &deps.auth {
        orchestrator.register_strategy(
            RecoveryStrategy::new(
                AUTH_STRATEGY,
                Arc::new(AuthRefresh {
                    auth: Arc::clone(auth),
                }),
            )
            .handles(ErrorType::Authentication)
            .handles(ErrorType::SessionExpired)
            .with_max_attempts(2)
            .with_priority(100)
            .with_cooldown(Duration::from_secs(5)),
        )?;
    }

    orchestrator.register_strategy(
        RecoveryStrategy::new(RATE_LIMIT_STRATEGY, Arc::new(RateLimitBackoff { base }))
            .handles(ErrorType::RateLimit)
            .with_max_attempts(3)
            .with_priority(80),
    )?;

    orchestrator.register_strategy(
        RecoveryStrategy::new(SERVER_STRATEGY, Arc::new(ExponentialWait { base }))
            .handles(ErrorType::Server)
            .with_max_attempts(3)
            .with_priority(70)
            // 501 will not start working by itself.
            .with_condition(|error| error.status_code() != Some(501))
            .escalates_to(SERVICE_UNAVAILABLE_STRATEGY),
    )?;

    orchestrator.register_strategy(
        RecoveryStrategy::new(
            SERVICE_UNAVAILABLE_STRATEGY,
            Arc::new(LinearWait {
                step: SERVICE_UNAVAILABLE_STEP,
            }),
        )
        .handles(ErrorType::ServiceUnavailable)
        .with_max_attempts(2)
        .with_priority(60),
    )?;

    orchestrator.register_strategy(
        RecoveryStrategy::new(
            ANALYSIS_STRATEGY,
            Arc::new(AnalysisFallback {
                controller: Arc::clone(&deps.service_mode),
            }),
        )
        .handles(ErrorType::Analysis)
        .handles(ErrorType::Provider)
        .with_max_attempts(3)
        .with_priority(50),
    )?;

    Ok(())
}

fn backoff(attempt: u32, base: Duration) -> Duration {
    calculate_backoff(attempt, base, Duration::from_secs(30), 2.0)
}

struct NetworkReconnect {
    waiter: Option<Arc<dyn ConnectionWaiter>>,
    base: Duration,
}

impl RecoveryAction for NetworkReconnect {
    fn recover<'a>(
        &'a self,
        _error: &'a CanonicalError,
        attempt: u32,
    ) -> BoxFuture<'a, StrategyOutcome> {
        async move {
            let delay = backoff(attempt, self.base);
            if let Some(waiter) = &self.waiter {
                if let Err(e) = waiter.wait_until_online(Some(NETWORK_WAIT_LIMIT)).await {
                    return StrategyOutcome::failure(format!("still offline: {e}"))
                        .retry_after(delay);
                }
            }
            tokio::time::sleep(delay).await;
            StrategyOutcome::success(format!("connection available after {}ms", delay.as_millis()))
        }
        .boxed()
    }
}

struct AuthRefresh {
    auth: Arc<dyn AuthHandler>,
}

impl RecoveryAction for AuthRefresh {
    fn recover<'a>(
        &'a self,
        _error: &'a CanonicalError,
        attempt: u32,
    ) -> BoxFuture<'a, StrategyOutcome> {
        async move {
            if attempt == 1 {
                return match self.auth.refresh_token().await {
                    Ok(()) => {
                        info!("Session token refreshed");
                        StrategyOutcome::success("session token refreshed")
                    }
                    Err(reason) => {
                        warn!(reason = %reason, "Token refresh failed");
                        StrategyOutcome::failure(format!("token refresh failed: {reason}"))
                            .retry_after(Duration::ZERO)
                    }
                };
            }

            self.auth.force_relogin().await;
            StrategyOutcome::failure("re-authentication required").no_retry()
        }
        .boxed()
    }
}

struct RateLimitBackoff {
    base: Duration,
}

impl RecoveryAction for RateLimitBackoff {
    fn recover<'a>(
        &'a self,
        error: &'a CanonicalError,
        attempt: u32,
    ) -> BoxFuture<'a, StrategyOutcome> {
        let delay = error.retry_after_ms().map_or_else(
            || {
                let computed = calculate_backoff(attempt, self.base, RATE_LIMIT_MAX_DELAY, 2.0);
                apply_jitter(computed, &mut rand::thread_rng()).min(RATE_LIMIT_MAX_DELAY)
            },
            Duration::from_millis,
        );
        async move {
            tokio::time::sleep(delay).await;
            StrategyOutcome::success(format!("waited {}ms for rate limit", delay.as_millis()))
        }
        .boxed()
    }
}

struct ExponentialWait {
    base: Duration,
}

impl RecoveryAction for ExponentialWait {
    fn recover<'a>(
        &'a self,
        _error: &'a CanonicalError,
        attempt: u32,
    ) -> BoxFuture<'a, StrategyOutcome> {
        let delay = backoff(attempt, self.base);
        async move {
            tokio::time::sleep(delay).await;
            StrategyOutcome::success(format!("backed off {}ms", delay.as_millis()))
        }
        .boxed()
    }
}

struct LinearWait {
    step: Duration,
}

impl RecoveryAction for LinearWait {
    fn recover<'a>(
        &'a self,
        _error: &'a CanonicalError,
        attempt: u32,
    ) -> BoxFuture<'a, StrategyOutcome> {
        let delay = self.step * attempt;
        async move {
            tokio::time::sleep(delay).await;
            StrategyOutcome::success(format!("waited {}ms for service", delay.as_millis()))
        }
        .boxed()
    }
}

struct AnalysisFallback {
    controller: Arc<ServiceModeController>,
}

impl RecoveryAction for AnalysisFallback {
    fn recover<'a>(
        &'a self,
        _error: &'a CanonicalError,
        attempt: u32,
    ) -> BoxFuture<'a, StrategyOutcome> {
        let outcome = match attempt {
            1 => match self.controller.switch_to_next_provider() {
                Some(provider) => StrategyOutcome::success(format!("switched to {provider}")),
                None => {
                    self.controller.enter_degraded();
                    StrategyOutcome::success("no alternate provider, degraded mode")
                }
            },
            2 => {
                self.controller.enter_degraded();
                StrategyOutcome::success("degraded mode")
            }
            _ => {
                self.controller.enter_fallback();
                StrategyOutcome::success("fallback mode")
            }
        };
        async move { outcome }.boxed()
    }
}
