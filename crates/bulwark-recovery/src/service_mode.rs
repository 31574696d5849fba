//! Provider failover and degraded operation modes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How much of the service is available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Full functionality.
    #[default]
    Normal,
    /// Reduced functionality on the current provider.
    Degraded,
    /// Canned or mock results only.
    Fallback,
}

impl ServiceMode {
    /// Returns the mode as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Degraded => "degraded",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
struct ModeState {
    mode: ServiceMode,
    current: usize,
}

/// Tracks the active provider and service mode.
#[derive(Debug)]
pub struct ServiceModeController {
    providers: Vec<String>,
    state: RwLock<ModeState>,
}

impl ServiceModeController {
    /// Creates a controller. The first provider is the primary.
    #[must_use]
    pub fn new(providers: Vec<String>) -> Self {
        Self {
            providers,
            state: RwLock::new(ModeState {
                mode: ServiceMode::Normal,
                current: 0,
            }),
        }
    }

    /// The active mode.
    #[must_use]
    pub fn mode(&self) -> ServiceMode {
        self.state.read().mode
    }

    /// The active provider, if any are configured.
    #[must_use]
    pub fn current_provider(&self) -> Option<String> {
        self.providers.get(self.state.read().current).cloned()
    }

    /// Switches to the next provider. Returns `None` when none are left.
    pub fn switch_to_next_provider(&self) -> Option<String> {
        let mut state = self.state.write();
        let next = state.current + 1;
        let provider = self.providers.get(next)?.clone();
        state.current = next;
        info!(provider = %provider, "Switched to alternate provider");
        Some(provider)
    }

    /// Enters degraded mode.
    pub fn enter_degraded(&self) {
        self.set_mode(ServiceMode::Degraded);
    }

    /// Enters fallback mode.
    pub fn enter_fallback(&self) {
        self.set_mode(ServiceMode::Fallback);
    }

    fn set_mode(&self, mode: ServiceMode) {
        let previous = std::mem::replace(&mut self.state.write().mode, mode);
        if previous != mode {
            warn!(from = %previous, to = %mode, "Service mode changed");
        }
    }

    /// Back to the primary provider in normal mode.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.mode = ServiceMode::Normal;
        state.current = 0;
        info!("Service mode reset to normal");
    }
}

impl Default for ServiceModeController {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_failover() {
        let controller = ServiceModeController::new(vec!["primary".into(), "backup".into()]);
        assert_eq!(controller.current_provider().as_deref(), Some("primary"));
        assert_eq!(controller.switch_to_next_provider().as_deref(), Some("backup"));
        assert_eq!(controller.switch_to_next_provider(), None);
        assert_eq!(controller.current_provider().as_deref(), Some("backup"));
    }

    #[test]
    fn modes_and_reset() {
        let controller = ServiceModeController::new(vec!["a".into(), "b".into()]);
        controller.switch_to_next_provider();
        controller.enter_degraded();
        assert_eq!(controller.mode(), ServiceMode::Degraded);
        controller.enter_fallback();
        assert_eq!(controller.mode(), ServiceMode::Fallback);

        controller.reset();
        assert_eq!(controller.mode(), ServiceMode::Normal);
        assert_eq!(controller.current_provider().as_deref(), Some("a"));
    }

    #[test]
    fn no_providers() {
        let controller = ServiceModeController::default();
        assert!(controller.current_provider().is_none());
        assert!(controller.switch_to_next_provider().is_none());
    }
}
