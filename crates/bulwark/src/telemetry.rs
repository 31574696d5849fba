//! Tracing subscriber setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{BulwarkError, Result};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.filter` when set. Output goes to stderr so
/// command output on stdout stays machine-readable.
///
/// # Errors
///
/// Fails if the filter directive is invalid or a subscriber is already
/// installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| BulwarkError::Telemetry(format!("invalid log filter: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| BulwarkError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_directive() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            filter: "bulwark=loud".to_string(),
            json: false,
        };
        assert!(matches!(
            init_tracing(&config),
            Err(BulwarkError::Telemetry(_))
        ));
    }
}
