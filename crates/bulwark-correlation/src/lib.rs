//! Noise reduction for Bulwark alerts.
//!
//! The [`CorrelationEngine`] sits between the rule engine and the
//! notification channels. For every alert it:
//!
//! - drops duplicates of a recent alert from the same rule,
//! - computes a [`PriorityScore`] from severity, business impact,
//!   frequency, correlation and user impact,
//! - groups it with related alerts into an [`AlertCorrelation`],
//! - and decides whether anyone should be notified.
//!
//! # Example
//!
//! ```rust
//! use bulwark_alerts::{Alert, AlertRule, AlertSeverity};
//! use bulwark_correlation::CorrelationEngine;
//! use chrono::Utc;
//!
//! let rule = AlertRule::builder("db_down", "Database down")
//!     .predicate(|_| true)
//!     .severity(AlertSeverity::Critical)
//!     .build()
//!     .unwrap();
//! let alert = Alert::from_rule(&rule, None, Utc::now());
//!
//! let engine = CorrelationEngine::new();
//! assert!(engine.process_alert(&alert).should_notify());
//! assert!(engine.process_alert(&alert).is_duplicate());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod patterns;
pub mod scoring;

pub use config::{CorrelationConfig, NotifyThresholds, ScoreWeights};
pub use engine::{
    AlertDecision, CleanupReport, CorrelationEngine, CorrelationStats, Decision, SuppressReason,
    CRITICAL_FLOOR,
};
pub use error::{CorrelationError, Result};
pub use patterns::{
    confidence, detect_cascade, detect_pattern, detect_service, detect_temporal,
    AlertCorrelation, CorrelationPattern, Detection, MemberRef, PatternType, SeenAlert,
};
pub use scoring::{
    business_impact_score, frequency_score, tag_similarity, user_impact_score, PriorityScore,
};
