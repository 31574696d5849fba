//! Core types for failure classification.
//!
//! - [`ErrorType`]: the canonical category of a failure
//! - [`ErrorSeverity`]: how bad a failure is
//! - [`ErrorContext`]: where the failure happened
//! - [`CanonicalError`]: the normalized, immutable error record
//! - [`SuggestedAction`]: what the caller could do next

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClassifierError;

/// The canonical category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Transport failure with no response.
    Network,
    /// The request timed out or was aborted.
    Timeout,
    /// The client is offline.
    Connectivity,
    /// Credentials are missing or invalid.
    Authentication,
    /// Credentials are valid but lack permission.
    Authorization,
    /// The user session has expired.
    SessionExpired,
    /// Input was rejected.
    Validation,
    /// Other client-side request errors.
    Client,
    /// Server-side failure.
    Server,
    /// The service is temporarily unavailable.
    ServiceUnavailable,
    /// Too many requests.
    RateLimit,
    /// Analysis pipeline failure.
    Analysis,
    /// File ingestion or processing failure.
    FileProcessing,
    /// Failure inside an external provider integration.
    Provider,
    /// Anything else.
    Unknown,
}

impl ErrorType {
    /// All error types, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Network,
        Self::Timeout,
        Self::Connectivity,
        Self::Authentication,
        Self::Authorization,
        Self::SessionExpired,
        Self::Validation,
        Self::Client,
        Self::Server,
        Self::ServiceUnavailable,
        Self::RateLimit,
        Self::Analysis,
        Self::FileProcessing,
        Self::Provider,
        Self::Unknown,
    ];

    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Connectivity => "connectivity",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::SessionExpired => "session_expired",
            Self::Validation => "validation",
            Self::Client => "client",
            Self::Server => "server",
            Self::ServiceUnavailable => "service_unavailable",
            Self::RateLimit => "rate_limit",
            Self::Analysis => "analysis",
            Self::FileProcessing => "file_processing",
            Self::Provider => "provider",
            Self::Unknown => "unknown",
        }
    }

    /// Transient failures that clear up on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::Connectivity
                | Self::Server
                | Self::ServiceUnavailable
                | Self::RateLimit
        )
    }

    /// Failures that retrying can never fix without the user or a token
    /// changing something first.
    #[must_use]
    pub const fn is_never_retryable(&self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::Authorization | Self::Validation | Self::Client
        )
    }

    /// Domain errors, only recoverable through a fallback strategy.
    #[must_use]
    pub const fn is_domain(&self) -> bool {
        matches!(self, Self::Analysis | Self::FileProcessing | Self::Provider)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or(ClassifierError::UnknownErrorType {
                name: s.to_string(),
            })
    }
}

/// How bad a failure is.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Cosmetic or user-correctable.
    Low,
    /// Degrades a feature.
    #[default]
    Medium,
    /// Breaks a feature.
    High,
    /// Breaks the application.
    Critical,
}

impl ErrorSeverity {
    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A follow-up the caller may offer the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Try the operation again.
    Retry,
    /// Sign in again.
    Login,
    /// Reload the page or view.
    Refresh,
    /// Reach out to support.
    ContactSupport,
    /// Nothing to do, dismiss the message.
    Dismiss,
}

/// Where a failure happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The URL that was being accessed.
    pub url: Option<String>,
    /// The component that raised the failure.
    pub component: Option<String>,
    /// The user-level feature in use.
    pub feature: Option<String>,
    /// The current user.
    pub user_id: Option<String>,
    /// The current session.
    pub session_id: Option<String>,
    /// How many times this operation has already been retried.
    pub retry_count: u32,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the component.
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Sets the feature.
    #[must_use]
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Sets the user ID.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the session ID.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Flattens the context into a string map for the canonical record.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = self.metadata.clone();
        let fields = [
            ("url", &self.url),
            ("component", &self.component),
            ("feature", &self.feature),
            ("user_id", &self.user_id),
            ("session_id", &self.session_id),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                map.insert(key.to_string(), v.clone());
            }
        }
        map.insert("retry_count".to_string(), self.retry_count.to_string());
        map
    }
}

/// The normalized error record produced by the classifier.
///
/// Fields are private so a record cannot be changed once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalError {
    id: String,
    #[serde(rename = "type")]
    error_type: ErrorType,
    severity: ErrorSeverity,
    message: String,
    user_message: String,
    retryable: Option<bool>,
    retry_after_ms: Option<u64>,
    status_code: Option<u16>,
    context: HashMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl CanonicalError {
    /// Builds a new record. Only the classifier and tests call this.
    #[must_use]
    pub(crate) fn new(
        error_type: ErrorType,
        severity: ErrorSeverity,
        message: String,
        user_message: String,
        retryable: Option<bool>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            error_type,
            severity,
            message,
            user_message,
            retryable,
            retry_after_ms: None,
            status_code: None,
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) const fn set_retry_after_ms(mut self, ms: Option<u64>) -> Self {
        self.retry_after_ms = ms;
        self
    }

    pub(crate) const fn set_status_code(mut self, status: Option<u16>) -> Self {
        self.status_code = status;
        self
    }

    pub(crate) fn set_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = context;
        self
    }

    /// Unique identifier for this record.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The canonical category.
    #[must_use]
    pub const fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// The severity.
    #[must_use]
    pub const fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    /// Developer-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// User-facing message.
    #[must_use]
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Retryability: `Some(true)`, `Some(false)`, or `None` when the retry
    /// policy decides.
    #[must_use]
    pub const fn retryable(&self) -> Option<bool> {
        self.retryable
    }

    /// Server-requested wait before retrying, in milliseconds.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after_ms
    }

    /// Transport status code, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Flattened context at classification time.
    #[must_use]
    pub const fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// When the record was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl std::fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{}] {}", self.error_type, self.severity, self.message)
    }
}

impl std::error::Error for CanonicalError {}
