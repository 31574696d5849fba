//! Raw failure values handed to the classifier.
//!
//! A [`RawFailure`] is whatever the caller knows about a failure before it has
//! been classified. HTTP-shaped failures carry a status code, status text,
//! response body and the `retry-after` header value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// An unclassified failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFailure {
    /// Human-readable failure message.
    pub message: String,
    /// Transport status code, if a response was received.
    pub status: Option<u16>,
    /// Transport status text.
    pub status_text: Option<String>,
    /// Response body.
    pub data: Option<serde_json::Value>,
    /// Raw `retry-after` header value.
    pub retry_after: Option<String>,
    /// The request was aborted by an abort signal.
    pub aborted: bool,
    /// The request was sent but no response came back.
    pub no_response: bool,
    /// Application-level error marker (the error's name/type field).
    pub marker: Option<String>,
    /// Explicit retryability hint set by the code that raised the failure.
    pub retryable: Option<bool>,
}

impl RawFailure {
    /// Creates a failure with just a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Creates an HTTP failure with the given status.
    #[must_use]
    pub fn http(status: u16) -> Self {
        Self {
            message: format!("request failed with status {status}"),
            status: Some(status),
            ..Self::default()
        }
    }

    /// Creates a transport failure where no response arrived.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            no_response: true,
            ..Self::default()
        }
    }

    /// Creates an aborted-request failure.
    #[must_use]
    pub fn aborted() -> Self {
        Self {
            message: "request aborted".to_string(),
            aborted: true,
            ..Self::default()
        }
    }

    /// Creates an application failure carrying a marker such as
    /// `AnalysisError`.
    #[must_use]
    pub fn application(marker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            marker: Some(marker.into()),
            ..Self::default()
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the status text.
    #[must_use]
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the raw `retry-after` header value.
    #[must_use]
    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    /// Sets the explicit retryability hint.
    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Whether the failure looks like a timeout.
    #[must_use]
    pub fn looks_like_timeout(&self) -> bool {
        self.aborted || self.message.to_ascii_lowercase().contains("timeout")
    }

    /// Parses the `retry-after` header into milliseconds relative to `now`.
    ///
    /// Returns `Ok(None)` when no header is present.
    pub fn retry_after_ms_at(&self, now: DateTime<Utc>) -> Result<Option<u64>> {
        self.retry_after
            .as_deref()
            .map(|value| parse_retry_after(value, now))
            .transpose()
    }
}

impl std::fmt::Display for RawFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RawFailure {}

impl From<std::io::Error> for RawFailure {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let mut failure = Self::new(err.to_string());
        match err.kind() {
            ErrorKind::TimedOut => failure.aborted = true,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => failure.no_response = true,
            _ => {}
        }
        failure
    }
}

impl From<String> for RawFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RawFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Parses a `retry-after` header value into milliseconds.
///
/// Accepts delta-seconds (integer or fractional) or an HTTP date. Dates in
/// the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Result<u64> {
    let trimmed = value.trim();

    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(secs.saturating_mul(1000));
    }

    if let Ok(secs) = trimmed.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Ok(Duration::from_secs_f64(secs).as_millis() as u64);
        }
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(trimmed) {
        let delta = date.with_timezone(&Utc).signed_duration_since(now);
        return Ok(delta.num_milliseconds().max(0) as u64);
    }

    Err(ClassifierError::InvalidRetryAfter {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test_case("120", 120_000 ; "integer seconds")]
    #[test_case(" 5 ", 5_000 ; "padded seconds")]
    #[test_case("1.5", 1_500 ; "fractional seconds")]
    #[test_case("0", 0 ; "zero")]
    fn parse_delta_seconds(value: &str, expected: u64) {
        assert_eq!(parse_retry_after(value, Utc::now()).unwrap(), expected);
    }

    #[test]
    fn parse_http_date() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ms = parse_retry_after("Mon, 01 Jan 2024 12:00:30 +0000", now).unwrap();
        assert_eq!(ms, 30_000);
    }

    #[test]
    fn parse_http_date_in_past_is_zero() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ms = parse_retry_after("Mon, 01 Jan 2024 11:00:00 +0000", now).unwrap();
        assert_eq!(ms, 0);
    }

    #[test_case("soon" ; "word")]
    #[test_case("-3" ; "negative")]
    #[test_case("" ; "empty")]
    fn parse_invalid(value: &str) {
        assert!(matches!(
            parse_retry_after(value, Utc::now()),
            Err(ClassifierError::InvalidRetryAfter { .. })
        ));
    }

    #[test]
    fn timeout_detection() {
        assert!(RawFailure::aborted().looks_like_timeout());
        assert!(RawFailure::new("Gateway Timeout while fetching").looks_like_timeout());
        assert!(!RawFailure::new("connection refused").looks_like_timeout());
    }

    #[test]
    fn retry_after_absent_is_none() {
        assert_eq!(RawFailure::http(429).retry_after_ms_at(Utc::now()).unwrap(), None);
    }

    #[test]
    fn io_error_conversion() {
        let refused: RawFailure =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(refused.no_response);

        let timed_out: RawFailure =
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out").into();
        assert!(timed_out.aborted);
    }

    #[test]
    fn display_with_status() {
        let failure = RawFailure::http(503).with_message("unavailable");
        assert_eq!(failure.to_string(), "unavailable (status 503)");
    }
}
