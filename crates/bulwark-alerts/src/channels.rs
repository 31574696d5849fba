//! Notification channels for alert delivery.
//!
//! Channels are opaque sinks: each has a [`ChannelKind`] and receives a
//! [`Notification`]. A [`NotificationDispatcher`] decides which channels see
//! an alert; [`ChannelRouter`] is the default implementation and simply
//! forwards to every registered channel of the requested kinds.
//!
//! Delivery failures are logged and counted, never retried.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertSeverity, ChannelKind};

/// The payload handed to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The alert being announced.
    pub alert_id: String,
    /// Originating rule.
    pub rule_id: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity at the time of sending.
    pub severity: AlertSeverity,
    /// Alert tags.
    pub tags: BTreeMap<String, String>,
    /// Escalation level at the time of sending.
    pub escalation_level: u32,
    /// When the alert fired.
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Builds a notification for an alert.
    #[must_use]
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
            title: alert.title.clone(),
            message: alert.message.clone(),
            severity: alert.severity,
            tags: alert.tags.clone(),
            escalation_level: alert.escalation_level,
            timestamp: alert.timestamp,
        }
    }

    /// One-line summary, e.g. `[CRITICAL] Database down: connection refused`.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!(
            "[{}] {}: {}",
            self.severity.as_str().to_ascii_uppercase(),
            self.title,
            self.message
        );
        if self.escalation_level > 0 {
            line.push_str(&format!(" (escalation level {})", self.escalation_level));
        }
        line
    }
}

/// Result of sending through one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationResult {
    /// The channel name.
    pub channel: String,
    /// Whether delivery succeeded.
    pub success: bool,
    /// Optional detail.
    pub message: Option<String>,
    /// Optional HTTP status code.
    pub status_code: Option<u16>,
}

impl NotificationResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            success: true,
            message: None,
            status_code: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            success: false,
            message: Some(message.into()),
            status_code: None,
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }
}

/// A destination for alert notifications.
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Returns the name of this channel.
    fn name(&self) -> &str;

    /// Returns the logical kind of this channel.
    fn kind(&self) -> ChannelKind;

    /// Sends a notification through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    fn send(&self, notification: &Notification) -> Result<NotificationResult>;

    /// Returns whether this channel is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

fn disabled(name: &str) -> NotificationResult {
    debug!(channel = %name, "channel is disabled, skipping");
    NotificationResult::success(name).with_message("channel disabled, notification skipped")
}

/// Spawns an HTTP POST of `body` on the ambient tokio runtime.
///
/// The send itself is fire-and-forget: failures are logged when the request
/// completes. Outside a runtime the delivery fails immediately.
fn post_json(
    client: &reqwest::Client,
    channel: &str,
    url: &str,
    body: serde_json::Value,
) -> Result<NotificationResult> {
    let handle = tokio::runtime::Handle::try_current().map_err(|e| {
        AlertError::NotificationFailed {
            channel: channel.to_string(),
            reason: format!("no async runtime: {e}"),
        }
    })?;

    let request = client.post(url).json(&body);
    let channel_name = channel.to_string();
    let target = url.to_string();
    handle.spawn(async move {
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(channel = %channel_name, status = %response.status(), "webhook delivered");
            }
            Ok(response) => {
                warn!(
                    channel = %channel_name,
                    url = %target,
                    status = %response.status(),
                    "webhook rejected notification"
                );
            }
            Err(e) => {
                warn!(channel = %channel_name, url = %target, error = %e, "webhook delivery failed");
            }
        }
    });

    Ok(NotificationResult::success(channel).with_message("notification queued"))
}

/// Posts the notification JSON as-is to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    url: String,
    enabled: bool,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Creates a webhook channel.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            client: reqwest::Client::new(),
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.name()));
        }
        let body = serde_json::to_value(notification)?;
        post_json(&self.client, &self.name, &self.url, body)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Team chat channel.
///
/// With an incoming-webhook URL the summary line is posted as `{"text": ..}`;
/// without one it is logged.
#[derive(Debug, Clone)]
pub struct ChatChannel {
    name: String,
    webhook_url: Option<String>,
    enabled: bool,
    client: reqwest::Client,
}

impl ChatChannel {
    /// Creates a chat channel that logs messages.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            webhook_url: None,
            enabled: true,
            client: reqwest::Client::new(),
        }
    }

    /// Posts messages to an incoming-webhook URL.
    #[must_use]
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl NotificationChannel for ChatChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Chat
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.name()));
        }
        let text = notification.summary();
        match &self.webhook_url {
            Some(url) => post_json(
                &self.client,
                &self.name,
                url,
                serde_json::json!({ "text": text }),
            ),
            None => {
                info!(channel = %self.name, alert_id = %notification.alert_id, "{text}");
                Ok(NotificationResult::success(self.name()))
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Email channel.
///
/// Formats subject and body; handing the message to a mail transport is left
/// to the deployment, so the rendered message is logged.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    name: String,
    to: Vec<String>,
    from: String,
    enabled: bool,
}

impl EmailChannel {
    /// Creates a new email channel.
    #[must_use]
    pub fn new(name: impl Into<String>, to: Vec<String>, from: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            to,
            from: from.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the recipient addresses.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    /// Renders `(subject, body)` for a notification.
    #[must_use]
    pub fn render(notification: &Notification) -> (String, String) {
        let subject = format!(
            "[{}] {}",
            notification.severity.as_str().to_ascii_uppercase(),
            notification.title
        );
        let mut body = format!(
            "{}\n\nAlert: {}\nRule: {}\nFired at: {}\n",
            notification.message,
            notification.alert_id,
            notification.rule_id,
            notification.timestamp.to_rfc3339()
        );
        for (key, value) in &notification.tags {
            body.push_str(&format!("{key}: {value}\n"));
        }
        (subject, body)
    }
}

impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.name()));
        }
        if self.to.is_empty() {
            return Ok(NotificationResult::failure(self.name(), "no recipients configured"));
        }

        let (subject, body) = Self::render(notification);
        info!(
            channel = %self.name,
            to = ?self.to,
            from = %self.from,
            subject = %subject,
            "sending email notification"
        );
        debug!(body = %body, "email body");

        Ok(NotificationResult::success(self.name()))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// On-call pager channel.
///
/// Events carry the alert ID as dedup key so repeated escalations of one
/// alert collapse into a single incident on the paging side.
#[derive(Debug, Clone)]
pub struct PagerChannel {
    name: String,
    routing_key: String,
    endpoint: Option<String>,
    enabled: bool,
    client: reqwest::Client,
}

impl PagerChannel {
    /// Creates a pager channel that logs events.
    #[must_use]
    pub fn new(name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routing_key: routing_key.into(),
            endpoint: None,
            enabled: true,
            client: reqwest::Client::new(),
        }
    }

    /// Posts events to an events endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Event body for a notification.
    #[must_use]
    pub fn event(&self, notification: &Notification) -> serde_json::Value {
        serde_json::json!({
            "routing_key": self.routing_key,
            "dedup_key": notification.alert_id,
            "summary": notification.summary(),
            "severity": notification.severity,
            "custom_details": notification.tags,
        })
    }
}

impl NotificationChannel for PagerChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Pager
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        if !self.is_enabled() {
            return Ok(disabled(self.name()));
        }
        let event = self.event(notification);
        match &self.endpoint {
            Some(url) => post_json(&self.client, &self.name, url, event),
            None => {
                error!(channel = %self.name, event = %event, "page");
                Ok(NotificationResult::success(self.name()))
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// A channel that logs notifications for debugging.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
    kind: ChannelKind,
}

impl LogChannel {
    /// Creates a log channel standing in for `kind`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        match notification.severity {
            AlertSeverity::Info => info!(channel = %self.name, "{}", notification.summary()),
            AlertSeverity::Warning => warn!(channel = %self.name, "{}", notification.summary()),
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(channel = %self.name, "{}", notification.summary());
            }
        }
        Ok(NotificationResult::success(self.name()))
    }
}

/// Keeps every notification in memory. Useful in tests and dry runs.
#[derive(Debug, Clone)]
pub struct RecordingChannel {
    name: String,
    kind: ChannelKind,
    fail: bool,
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingChannel {
    /// Creates a recording channel of `kind`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fail: false,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes every send fail after recording.
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Everything received so far. Clones share the same buffer.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Number of notifications received.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        self.sent.lock().push(notification.clone());
        if self.fail {
            return Err(AlertError::NotificationFailed {
                channel: self.name.clone(),
                reason: "configured to fail".to_string(),
            });
        }
        Ok(NotificationResult::success(self.name()))
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Per-channel results.
    pub results: Vec<NotificationResult>,
    /// Channels that accepted the notification.
    pub delivered: usize,
    /// Channels that failed.
    pub failed: usize,
    /// The dispatcher chose not to notify at all.
    pub suppressed: bool,
}

impl DispatchReport {
    /// A report for a notification that was deliberately not sent.
    #[must_use]
    pub fn suppressed() -> Self {
        Self {
            suppressed: true,
            ..Self::default()
        }
    }
}

/// Decides where an alert notification goes.
pub trait NotificationDispatcher: Send + Sync {
    /// Notifies `kinds` about `alert`.
    fn dispatch(&self, alert: &Alert, kinds: &[ChannelKind]) -> DispatchReport;
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Successful channel deliveries.
    pub sent: u64,
    /// Failed channel deliveries.
    pub failed: u64,
}

/// Sends to every registered channel whose kind was requested.
///
/// Webhook channels receive every notification regardless of kind.
#[derive(Default)]
pub struct ChannelRouter {
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRouter")
            .field("channels", &self.channels.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ChannelRouter {
    /// Creates a router with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel.
    pub fn add_channel(&self, channel: Arc<dyn NotificationChannel>) {
        info!(channel = %channel.name(), kind = %channel.kind(), "added notification channel");
        self.channels.write().push(channel);
    }

    /// Removes a channel by name.
    pub fn remove_channel(&self, name: &str) -> bool {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| c.name() != name);
        before != channels.len()
    }

    /// Number of registered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Sends a prepared notification to the requested kinds.
    pub fn send(&self, notification: &Notification, kinds: &[ChannelKind]) -> DispatchReport {
        let targets: Vec<Arc<dyn NotificationChannel>> = self
            .channels
            .read()
            .iter()
            .filter(|c| c.kind() == ChannelKind::Webhook || kinds.contains(&c.kind()))
            .cloned()
            .collect();

        let mut report = DispatchReport::default();
        for channel in targets {
            if !channel.is_enabled() {
                continue;
            }
            let result = match channel.send(notification) {
                Ok(result) => result,
                Err(e) => NotificationResult::failure(channel.name(), e.to_string()),
            };
            if result.success {
                report.delivered += 1;
                self.sent.fetch_add(1, Ordering::Relaxed);
            } else {
                warn!(
                    channel = %result.channel,
                    alert_id = %notification.alert_id,
                    reason = ?result.message,
                    "notification delivery failed"
                );
                report.failed += 1;
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            report.results.push(result);
        }

        if report.results.is_empty() {
            debug!(alert_id = %notification.alert_id, kinds = ?kinds, "no channels for notification");
        }
        report
    }
}

impl NotificationDispatcher for ChannelRouter {
    fn dispatch(&self, alert: &Alert, kinds: &[ChannelKind]) -> DispatchReport {
        self.send(&Notification::from_alert(alert), kinds)
    }
}

impl<T: NotificationDispatcher + ?Sized> NotificationDispatcher for Arc<T> {
    fn dispatch(&self, alert: &Alert, kinds: &[ChannelKind]) -> DispatchReport {
        (**self).dispatch(alert, kinds)
    }
}
