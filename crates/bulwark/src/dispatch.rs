//! Notification dispatch through the correlation engine.

use std::sync::Arc;

use bulwark_alerts::{Alert, ChannelKind, ChannelRouter, DispatchReport, NotificationDispatcher};
use bulwark_correlation::{CorrelationEngine, Decision, SuppressReason};
use tracing::{debug, info};

/// Asks the [`CorrelationEngine`] before handing an alert to the
/// [`ChannelRouter`].
///
/// Escalations of an alert that was already let through skip the engine;
/// they would otherwise be dropped as duplicates of the original.
#[derive(Debug, Clone)]
pub struct CorrelatingDispatcher {
    engine: Arc<CorrelationEngine>,
    router: Arc<ChannelRouter>,
}

impl CorrelatingDispatcher {
    /// Creates a dispatcher over `engine` and `router`.
    #[must_use]
    pub fn new(engine: Arc<CorrelationEngine>, router: Arc<ChannelRouter>) -> Self {
        Self { engine, router }
    }

    /// The correlation engine consulted for every new alert.
    #[must_use]
    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    /// The router that delivers notifications.
    #[must_use]
    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }
}

impl NotificationDispatcher for CorrelatingDispatcher {
    fn dispatch(&self, alert: &Alert, kinds: &[ChannelKind]) -> DispatchReport {
        if alert.escalation_level > 0 {
            return self.router.dispatch(alert, kinds);
        }

        // The alert's own timestamp keeps correlation on the caller's clock.
        let decision = self.engine.process_alert_at(alert, alert.timestamp);
        match &decision.decision {
            Decision::Notify => {
                if let Some(correlation) = &decision.correlation {
                    debug!(
                        alert_id = %alert.id,
                        pattern = %correlation.pattern,
                        confidence = correlation.confidence,
                        "notifying correlated alert"
                    );
                }
                self.router.dispatch(alert, kinds)
            }
            Decision::Suppress(SuppressReason::Duplicate { of }) => {
                debug!(alert_id = %alert.id, duplicate_of = %of, "notification dropped as duplicate");
                DispatchReport::suppressed()
            }
            Decision::Suppress(reason) => {
                info!(
                    alert_id = %alert.id,
                    rule_id = %alert.rule_id,
                    score = decision.priority.map(|p| p.total),
                    reason = ?reason,
                    "notification suppressed"
                );
                DispatchReport::suppressed()
            }
        }
    }
}
