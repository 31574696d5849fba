//! Bulwark: resilience and alerting for client-side services.
//!
//! This crate wires the component crates into one runtime:
//!
//! - [`bulwark_errors`]: turn raw failures into canonical error records
//! - [`bulwark_retry`]: retry with exponential backoff and fallbacks
//! - [`bulwark_network`]: connectivity monitoring and the offline queue
//! - [`bulwark_recovery`]: recovery strategies per error type
//! - [`bulwark_alerts`]: threshold rules, cooldowns and escalation
//! - [`bulwark_correlation`]: deduplication, priority scoring and grouping
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark::{Bulwark, BulwarkConfig, MetricsSnapshot};
//!
//! # async fn run() -> bulwark::Result<()> {
//! let config = BulwarkConfig::from_file("bulwark.toml")?;
//! bulwark::init_tracing(&config.logging)?;
//!
//! let bulwark = Bulwark::new(config)?;
//! bulwark.start();
//!
//! let snapshot = MetricsSnapshot::new().with("error_rate", 0.12);
//! let result = bulwark.alerts().check_metrics(&snapshot);
//! println!("{} alerts fired", result.fired.len());
//!
//! bulwark.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod rules;
pub mod runtime;
pub mod system;
pub mod telemetry;

pub use config::{BulwarkConfig, LoggingConfig, DEFAULT_LOG_FILTER};
pub use dispatch::CorrelatingDispatcher;
pub use error::{BulwarkError, Result};
pub use rules::{default_rules, paging_escalation};
pub use runtime::{Bulwark, BulwarkBuilder, Unrecovered};
pub use system::{CleanupHandle, IntegratedAlertSystem, SystemStats};
pub use telemetry::init_tracing;

pub use bulwark_alerts as alerts;
pub use bulwark_correlation as correlation;
pub use bulwark_errors as errors;
pub use bulwark_network as network;
pub use bulwark_recovery as recovery;
pub use bulwark_retry as retry;

pub use bulwark_alerts::{Alert, AlertRule, AlertSeverity, MetricsSnapshot};
pub use bulwark_errors::{CanonicalError, ErrorContext, ErrorType, RawFailure};
