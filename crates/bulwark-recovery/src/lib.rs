//! Automated recovery for classified failures.
//!
//! A [`RecoveryOrchestrator`] maps each [`bulwark_errors::ErrorType`] to an
//! ordered list of [`RecoveryStrategy`] values and runs them when a retry
//! budget is exhausted. Each attempt is written to a bounded [`AuditLog`].
//!
//! The built-in strategies (connectivity wait, token refresh, rate limit and
//! server backoff, provider failover) are registered by
//! [`register_default_strategies`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod audit;
pub mod defaults;
pub mod error;
pub mod orchestrator;
pub mod service_mode;
pub mod strategy;

pub use audit::{AuditLog, RecoveryAttemptLog, RecoveryStats, StrategyStats};
pub use defaults::{register_default_strategies, AuthHandler, StrategyDependencies};
pub use error::{RecoveryError, Result};
pub use orchestrator::{
    RecoveryConfig, RecoveryOrchestrator, RecoveryResult, RecoveryStatus, RetryOperation,
};
pub use service_mode::{ServiceMode, ServiceModeController};
pub use strategy::{action_fn, FnAction, RecoveryAction, RecoveryStrategy, StrategyOutcome};
