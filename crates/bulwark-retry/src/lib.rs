//! Bounded retries with exponential backoff.
//!
//! [`RetryEngine`] runs an async operation, classifies each failure with
//! [`bulwark_errors::ErrorClassifier`], and retries only what the
//! classification allows. The delay before retry *n* is the server's
//! `retry-after` when present, otherwise `min(base * factor^(n-1), max)`
//! inflated by up to 50% jitter.
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark_errors::{ErrorContext, RawFailure};
//! use bulwark_retry::{RetryConfig, RetryEngine};
//!
//! # async fn run() -> bulwark_retry::Result<()> {
//! let engine = RetryEngine::default();
//! let value = engine
//!     .with_retry(
//!         || async { Ok::<_, RawFailure>(42) },
//!         &RetryConfig::default(),
//!         &ErrorContext::new().with_component("uploader"),
//!     )
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod engine;
pub mod error;

pub use config::{apply_jitter, calculate_backoff, RetryConfig, MAX_JITTER};
pub use engine::{
    boxed_operation, is_retry_eligible, BoxedOperation, RetryAttempt, RetryEngine, RetryObserver,
    RetryOutcome, TracingObserver,
};
pub use error::{Result, RetryError, RetryHistory};
