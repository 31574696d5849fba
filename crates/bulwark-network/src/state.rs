//! Connectivity state and the events emitted when it changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::OperationPriority;

/// A snapshot of the monitor's connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    /// Whether the client is currently online.
    pub is_online: bool,
    /// When the client last came online.
    pub last_online_at: Option<DateTime<Utc>>,
    /// When the client last went offline.
    pub last_offline_at: Option<DateTime<Utc>>,
    /// When the last liveness probe ran.
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    /// Creates the initial state.
    #[must_use]
    pub fn new(is_online: bool) -> Self {
        let now = Utc::now();
        Self {
            is_online,
            last_online_at: is_online.then_some(now),
            last_offline_at: (!is_online).then_some(now),
            last_probe_at: None,
        }
    }
}

/// Events emitted by the network monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// Connectivity restored.
    Online {
        /// When the transition happened.
        at: DateTime<Utc>,
    },
    /// Connectivity lost.
    Offline {
        /// When the transition happened.
        at: DateTime<Utc>,
    },
    /// An operation was added to the offline queue.
    OperationQueued {
        /// The operation ID.
        id: String,
        /// Its priority.
        priority: OperationPriority,
    },
    /// An operation was evicted because the queue was full.
    OperationEvicted {
        /// The operation ID.
        id: String,
    },
    /// A queued operation was replayed successfully.
    OperationCompleted {
        /// The operation ID.
        id: String,
    },
    /// A queued operation failed during replay.
    OperationFailed {
        /// The operation ID.
        id: String,
        /// Failures so far, including this one.
        retry_count: u32,
        /// Whether the operation was dropped for good.
        dropped: bool,
    },
    /// A drain pass finished.
    QueueDrained {
        /// Operations that completed.
        completed: usize,
        /// Operations that failed (re-queued or dropped).
        failed: usize,
    },
}

impl NetworkEvent {
    /// Returns true for online/offline transitions.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::Online { .. } | Self::Offline { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_online_state() {
        let state = ConnectivityState::new(true);
        assert!(state.is_online);
        assert!(state.last_online_at.is_some());
        assert!(state.last_offline_at.is_none());
        assert!(state.last_probe_at.is_none());
    }

    #[test]
    fn initial_offline_state() {
        let state = ConnectivityState::new(false);
        assert!(!state.is_online);
        assert!(state.last_online_at.is_none());
        assert!(state.last_offline_at.is_some());
    }

    #[test]
    fn transition_events() {
        assert!(NetworkEvent::Online { at: Utc::now() }.is_transition());
        assert!(
            !NetworkEvent::OperationEvicted {
                id: "op".to_string()
            }
            .is_transition()
        );
    }
}
