//! The error classifier.
//!
//! [`ErrorClassifier`] turns a [`RawFailure`] plus an [`ErrorContext`] into a
//! [`Classification`]: the canonical record, a list of suggested actions, and
//! whether the failure should be reported and shown to the user.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::failure::RawFailure;
use crate::types::{CanonicalError, ErrorContext, ErrorSeverity, ErrorType, SuggestedAction};

/// Reports whether the client currently has connectivity.
///
/// Implemented by the network monitor; injected so the classifier does not
/// have to look it up at runtime.
pub trait ConnectivityStatus: Send + Sync + std::fmt::Debug {
    /// Returns true when the client is online.
    fn is_online(&self) -> bool;
}

/// Configuration for the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Components whose failures are always reported.
    pub critical_components: HashSet<String>,
    /// Features whose failures are always surfaced to the user.
    pub user_facing_features: HashSet<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            critical_components: ["payment", "auth", "analysis-engine"]
                .into_iter()
                .map(String::from)
                .collect(),
            user_facing_features: ["upload", "dashboard", "report", "checkout"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// The classifier's verdict on a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// The canonical error record.
    pub error: CanonicalError,
    /// Follow-ups to offer the user.
    pub actions: Vec<SuggestedAction>,
    /// Whether to forward the failure to an external tracker.
    pub should_report: bool,
    /// Whether the UI layer should show the failure.
    pub should_notify_user: bool,
}

/// Converts raw failures into canonical error records.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    config: ClassifierConfig,
    connectivity: Option<Arc<dyn ConnectivityStatus>>,
}

impl ErrorClassifier {
    /// Creates a classifier with default configuration and no connectivity
    /// source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier with custom configuration.
    #[must_use]
    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            config,
            connectivity: None,
        }
    }

    /// Attaches a connectivity source.
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Arc<dyn ConnectivityStatus>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classifies a failure.
    #[must_use]
    pub fn classify(&self, failure: &RawFailure, context: &ErrorContext) -> Classification {
        self.classify_at(failure, context, Utc::now())
    }

    /// Classifies a failure, resolving HTTP-date `retry-after` values against
    /// `now`.
    #[must_use]
    pub fn classify_at(
        &self,
        failure: &RawFailure,
        context: &ErrorContext,
        now: DateTime<Utc>,
    ) -> Classification {
        let (error_type, severity) = self.categorize(failure);

        let retry_after_ms = if error_type == ErrorType::RateLimit {
            match failure.retry_after_ms_at(now) {
                Ok(ms) => ms,
                Err(e) => {
                    warn!(error = %e, "ignoring unparseable retry-after header");
                    None
                }
            }
        } else {
            None
        };

        let retryable = failure.retryable.or_else(|| default_retryable(error_type));

        let error = CanonicalError::new(
            error_type,
            severity,
            developer_message(failure),
            user_message(error_type).to_string(),
            retryable,
        )
        .set_retry_after_ms(retry_after_ms)
        .set_status_code(failure.status)
        .set_context(context.to_map());

        let should_report = self.should_report(error_type, context);
        let should_notify_user = self.should_notify_user(severity, context);
        let actions = suggested_actions(error_type, severity, retryable);

        debug!(
            error_id = %error.id(),
            error_type = %error_type,
            severity = %severity,
            should_report,
            should_notify_user,
            "classified failure"
        );

        Classification {
            error,
            actions,
            should_report,
            should_notify_user,
        }
    }

    /// Applies the classification rules in priority order.
    fn categorize(&self, failure: &RawFailure) -> (ErrorType, ErrorSeverity) {
        if self.connectivity.as_ref().is_some_and(|c| !c.is_online()) {
            return (ErrorType::Connectivity, ErrorSeverity::Medium);
        }

        if let Some(status) = failure.status {
            return categorize_status(status);
        }

        if failure.looks_like_timeout() {
            return (ErrorType::Timeout, ErrorSeverity::Medium);
        }

        if failure.no_response {
            return (ErrorType::Network, ErrorSeverity::Medium);
        }

        if let Some(category) = failure.marker.as_deref().and_then(categorize_marker) {
            return category;
        }

        (ErrorType::Unknown, ErrorSeverity::Medium)
    }

    fn should_report(&self, error_type: ErrorType, context: &ErrorContext) -> bool {
        let critical_component = context
            .component
            .as_ref()
            .is_some_and(|c| self.config.critical_components.contains(c));
        if critical_component {
            return true;
        }

        match error_type {
            ErrorType::Validation
            | ErrorType::Client
            | ErrorType::Authentication
            | ErrorType::Authorization => false,
            ErrorType::Server | ErrorType::ServiceUnavailable | ErrorType::Unknown => true,
            _ => false,
        }
    }

    fn should_notify_user(&self, severity: ErrorSeverity, context: &ErrorContext) -> bool {
        severity != ErrorSeverity::Low
            || context
                .feature
                .as_ref()
                .is_some_and(|f| self.config.user_facing_features.contains(f))
    }
}

/// Maps a transport status code to a type and severity.
#[must_use]
pub fn categorize_status(status: u16) -> (ErrorType, ErrorSeverity) {
    match status {
        401 => (ErrorType::Authentication, ErrorSeverity::High),
        403 => (ErrorType::Authorization, ErrorSeverity::Medium),
        404 | 409 => (ErrorType::Client, ErrorSeverity::Low),
        408 | 504 => (ErrorType::Timeout, ErrorSeverity::Medium),
        422 => (ErrorType::Validation, ErrorSeverity::Low),
        429 => (ErrorType::RateLimit, ErrorSeverity::Medium),
        500 | 502 => (ErrorType::Server, ErrorSeverity::High),
        503 => (ErrorType::ServiceUnavailable, ErrorSeverity::High),
        400..=499 => (ErrorType::Client, ErrorSeverity::Low),
        500..=599 => (ErrorType::Server, ErrorSeverity::High),
        _ => (ErrorType::Unknown, ErrorSeverity::Medium),
    }
}

/// Maps an application marker (`AnalysisError`, `file_processing_error`, ...)
/// to a type and severity.
fn categorize_marker(marker: &str) -> Option<(ErrorType, ErrorSeverity)> {
    let lower = marker.trim().to_ascii_lowercase();
    let normalized = lower
        .strip_suffix("_error")
        .or_else(|| lower.strip_suffix("error"))
        .unwrap_or(&lower)
        .replace(['-', ' '], "_");

    match normalized.as_str() {
        "analysis" => Some((ErrorType::Analysis, ErrorSeverity::Medium)),
        "file_processing" | "fileprocessing" => {
            Some((ErrorType::FileProcessing, ErrorSeverity::Medium))
        }
        "google_drive" | "googledrive" | "provider" => {
            Some((ErrorType::Provider, ErrorSeverity::Medium))
        }
        "validation" => Some((ErrorType::Validation, ErrorSeverity::Low)),
        "session_expired" | "sessionexpired" => {
            Some((ErrorType::SessionExpired, ErrorSeverity::High))
        }
        _ => None,
    }
}

const fn default_retryable(error_type: ErrorType) -> Option<bool> {
    match error_type {
        ErrorType::Network
        | ErrorType::Timeout
        | ErrorType::Connectivity
        | ErrorType::Server
        | ErrorType::ServiceUnavailable
        | ErrorType::RateLimit => Some(true),
        ErrorType::Authentication
        | ErrorType::Authorization
        | ErrorType::SessionExpired
        | ErrorType::Validation
        | ErrorType::Client => Some(false),
        ErrorType::Analysis | ErrorType::FileProcessing | ErrorType::Provider | ErrorType::Unknown => {
            None
        }
    }
}

fn developer_message(failure: &RawFailure) -> String {
    match (&failure.status_text, failure.message.is_empty()) {
        (Some(text), true) => text.clone(),
        (_, true) => "unknown failure".to_string(),
        _ => failure.message.clone(),
    }
}

/// Returns the fixed user-facing message for an error type.
#[must_use]
pub const fn user_message(error_type: ErrorType) -> &'static str {
    match error_type {
        ErrorType::Network => "Unable to reach the server. Please check your connection.",
        ErrorType::Timeout => "The request took too long. Please try again.",
        ErrorType::Connectivity => "You appear to be offline. We'll retry when you're back online.",
        ErrorType::Authentication => "Your credentials are invalid. Please sign in again.",
        ErrorType::Authorization => "You don't have permission to do that.",
        ErrorType::SessionExpired => "Your session has expired. Please sign in again.",
        ErrorType::Validation => "Some of the information provided is invalid.",
        ErrorType::Client => "The request could not be completed.",
        ErrorType::Server => "Something went wrong on our side. Please try again later.",
        ErrorType::ServiceUnavailable => "The service is temporarily unavailable.",
        ErrorType::RateLimit => "Too many requests. Please wait a moment.",
        ErrorType::Analysis => "The analysis could not be completed.",
        ErrorType::FileProcessing => "The file could not be processed.",
        ErrorType::Provider => "An external service failed to respond correctly.",
        ErrorType::Unknown => "An unexpected error occurred.",
    }
}

fn suggested_actions(
    error_type: ErrorType,
    severity: ErrorSeverity,
    retryable: Option<bool>,
) -> Vec<SuggestedAction> {
    let mut actions = Vec::new();

    if retryable == Some(true) || error_type.is_domain() {
        actions.push(SuggestedAction::Retry);
    }

    match error_type {
        ErrorType::Authentication | ErrorType::SessionExpired => {
            actions.push(SuggestedAction::Login);
        }
        ErrorType::Connectivity | ErrorType::Network => actions.push(SuggestedAction::Refresh),
        ErrorType::Validation | ErrorType::Client | ErrorType::Authorization => {
            actions.push(SuggestedAction::Dismiss);
        }
        _ => {}
    }

    if severity >= ErrorSeverity::High || error_type == ErrorType::Unknown {
        actions.push(SuggestedAction::ContactSupport);
    }

    if actions.is_empty() {
        actions.push(SuggestedAction::Dismiss);
    }

    actions
}
