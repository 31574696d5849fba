//! Threshold alerting for Bulwark.
//!
//! `bulwark-alerts` evaluates a [`MetricsSnapshot`] against registered
//! [`AlertRule`]s and notifies humans through severity-routed channels.
//!
//! # Features
//!
//! - **Rules**: threshold conditions or custom predicates, with tags and a
//!   message template
//! - **Cooldown and suppression**: a rule fires at most once per cooldown,
//!   and not at all while suppressed
//! - **Escalation**: unresolved alerts are re-sent louder on a schedule
//! - **Routing**: info/warning go to chat, error adds email, critical adds
//!   the pager
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bulwark_alerts::{
//!     AlertCondition, AlertManager, AlertRule, AlertSeverity, ChannelKind, ChannelRouter,
//!     ComparisonOperator, MetricsSnapshot, RecordingChannel,
//! };
//!
//! let router = Arc::new(ChannelRouter::new());
//! let pager = RecordingChannel::new("pager", ChannelKind::Pager);
//! router.add_channel(Arc::new(pager.clone()));
//!
//! let manager = AlertManager::new().with_dispatcher(router);
//! manager
//!     .add_rule(
//!         AlertRule::builder("critical_error_rate", "Critical error rate")
//!             .condition(AlertCondition::new("error_rate", ComparisonOperator::GreaterThan, 0.10).unwrap())
//!             .severity(AlertSeverity::Critical)
//!             .cooldown(Duration::from_secs(300))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let result = manager.check_rules(&MetricsSnapshot::new().with("error_rate", 0.12));
//! assert_eq!(result.fired.len(), 1);
//! assert_eq!(pager.count(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod config;
pub mod error;
pub mod manager;
pub mod types;

pub use channels::{
    ChannelRouter, ChatChannel, DeliveryStats, DispatchReport, EmailChannel, LogChannel,
    Notification, NotificationChannel, NotificationDispatcher, NotificationResult, PagerChannel,
    RecordingChannel, WebhookChannel,
};
pub use config::AlertsConfig;
pub use error::{AlertError, Result};
pub use manager::{AlertManager, AlertStats, CheckResult, EscalationHandle};
pub use types::{
    Alert, AlertCondition, AlertRule, AlertRuleBuilder, AlertSeverity, ChannelKind,
    ComparisonOperator, EscalationPolicy, EscalationStep, MetricValue, MetricsSnapshot,
    RuleEvaluation, RulePredicate, MAX_NAME_LENGTH,
};
