//! Network monitor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};
use crate::queue::OperationQueue;

/// Configuration for [`NetworkMonitor`](crate::NetworkMonitor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Health endpoint probed with `HEAD`. No probing when unset.
    pub health_url: Option<String>,
    /// Interval between liveness probes.
    pub probe_interval_ms: u64,
    /// Timeout for a single probe.
    pub probe_timeout_ms: u64,
    /// Whether operations may be deferred while offline.
    pub enable_offline_queue: bool,
    /// Capacity of the offline queue.
    pub max_queue_size: usize,
    /// Pause between replayed operations.
    pub drain_delay_ms: u64,
    /// Connectivity assumed before the first signal or probe.
    pub initially_online: bool,
    /// Where the queue snapshot is written on shutdown.
    pub queue_snapshot_path: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            health_url: None,
            probe_interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            enable_offline_queue: true,
            max_queue_size: OperationQueue::DEFAULT_CAPACITY,
            drain_delay_ms: 100,
            initially_online: true,
            queue_snapshot_path: None,
        }
    }
}

impl NetworkConfig {
    /// Interval between liveness probes.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Timeout for a single probe.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Pause between replayed operations.
    #[must_use]
    pub const fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_ms == 0 {
            return Err(NetworkError::InvalidConfig {
                reason: "probe_interval_ms must be positive".to_string(),
            });
        }
        if self.probe_timeout_ms == 0 {
            return Err(NetworkError::InvalidConfig {
                reason: "probe_timeout_ms must be positive".to_string(),
            });
        }
        if self.max_queue_size == 0 {
            return Err(NetworkError::InvalidConfig {
                reason: "max_queue_size must be positive".to_string(),
            });
        }
        if let Some(url) = &self.health_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(NetworkError::InvalidConfig {
                    reason: format!("health_url must be http(s): {url}"),
                });
            }
        }
        Ok(())
    }
}
