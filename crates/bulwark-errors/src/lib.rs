//! Failure classification for Bulwark.
//!
//! `bulwark-errors` turns whatever a caller knows about a failure (an HTTP
//! status, a transport error, an application marker) into a
//! [`CanonicalError`] with a type, severity, retryability and a user-facing
//! message. Everything else in Bulwark (retry, recovery, logging) works on
//! canonical records only.
//!
//! # Example
//!
//! ```rust
//! use bulwark_errors::{ErrorClassifier, ErrorContext, ErrorType, RawFailure};
//!
//! let classifier = ErrorClassifier::new();
//! let failure = RawFailure::http(429).with_retry_after("3");
//! let classification = classifier.classify(&failure, &ErrorContext::new());
//!
//! assert_eq!(classification.error.error_type(), ErrorType::RateLimit);
//! assert_eq!(classification.error.retry_after_ms(), Some(3_000));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod classifier;
pub mod error;
pub mod failure;
pub mod types;

pub use classifier::{
    categorize_status, user_message, Classification, ClassifierConfig, ConnectivityStatus,
    ErrorClassifier,
};
pub use error::{ClassifierError, Result};
pub use failure::{parse_retry_after, RawFailure};
pub use types::{CanonicalError, ErrorContext, ErrorSeverity, ErrorType, SuggestedAction};
