//! Liveness probes and the background probe task.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::monitor::NetworkMonitor;

/// Checks whether the backend is reachable.
pub trait HealthProbe: Send + Sync + std::fmt::Debug {
    /// Runs one probe. Returns true when the backend answered.
    fn probe(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Probes a health endpoint with an HTTP `HEAD` request.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    /// Creates a probe for `url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The probed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            match self.client.head(&self.url).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!(url = %self.url, error = %e, "Health probe failed");
                    false
                }
            }
        })
    }
}

/// Handle for the background probe task.
#[derive(Debug)]
pub struct ProbeHandle {
    running: Arc<AtomicBool>,
}

impl ProbeHandle {
    /// Check if the probe task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the probe task. It exits at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Spawns a task that probes connectivity every `interval`.
///
/// The task holds only a weak reference to the monitor and exits once the
/// monitor is dropped or the handle is stopped.
pub(crate) fn start_probe_task(monitor: Weak<NetworkMonitor>, interval: Duration) -> ProbeHandle {
    let running = Arc::new(AtomicBool::new(true));
    let task_running = Arc::clone(&running);

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // First tick completes immediately.
        timer.tick().await;

        while task_running.load(Ordering::SeqCst) {
            timer.tick().await;

            if !task_running.load(Ordering::SeqCst) {
                break;
            }

            let Some(monitor) = monitor.upgrade() else {
                warn!("Network monitor dropped, stopping probe task");
                task_running.store(false, Ordering::SeqCst);
                break;
            };
            monitor.check_connectivity().await;
        }
    });

    ProbeHandle { running }
}
