//! Command implementations.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use bulwark::alerts::{ChannelKind, CheckResult, LogChannel};
use bulwark::errors::{Classification, ErrorClassifier};
use bulwark::{
    default_rules, AlertSeverity, Bulwark, BulwarkConfig, ErrorContext, MetricsSnapshot,
    RawFailure, SystemStats,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::ClassifyArgs;
use crate::output::{truncate, OutputFormat, TableDisplay};

// ============================================================================
// classify
// ============================================================================

/// Classifier verdict for display.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ClassificationView(pub Classification);

impl TableDisplay for ClassificationView {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let error = &self.0.error;
        let optional = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

        writeln!(writer, "Classification")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Type:             {}", error.error_type())?;
        writeln!(writer, "Severity:         {}", error.severity())?;
        writeln!(
            writer,
            "Retryable:        {}",
            optional(error.retryable().map(|r| r.to_string()))
        )?;
        writeln!(
            writer,
            "Retry after:      {}",
            optional(error.retry_after_ms().map(|ms| format!("{ms}ms")))
        )?;
        writeln!(writer, "Message:          {}", error.message())?;
        writeln!(writer, "User message:     {}", error.user_message())?;
        writeln!(writer, "Actions:          {:?}", self.0.actions)?;
        writeln!(writer, "Report:           {}", self.0.should_report)?;
        writeln!(writer, "Notify user:      {}", self.0.should_notify_user)?;
        Ok(())
    }
}

fn raw_failure(args: &ClassifyArgs) -> RawFailure {
    if let Some(marker) = &args.marker {
        return RawFailure::application(marker.clone(), args.message.clone());
    }
    let Some(status) = args.status else {
        return RawFailure::new(args.message.clone());
    };

    let mut failure = RawFailure::http(status);
    if !args.message.is_empty() {
        failure = failure.with_message(args.message.clone());
    }
    if let Some(retry_after) = &args.retry_after {
        failure = failure.with_retry_after(retry_after.clone());
    }
    failure
}

/// Classifies the described failure.
pub fn classify<W: Write>(
    out: &mut W,
    format: OutputFormat,
    config: &BulwarkConfig,
    args: &ClassifyArgs,
) -> anyhow::Result<()> {
    let mut context = ErrorContext::new();
    if let Some(component) = &args.component {
        context = context.with_component(component.clone());
    }
    if let Some(feature) = &args.feature {
        context = context.with_feature(feature.clone());
    }

    let classifier = ErrorClassifier::with_config(config.classifier.clone());
    let classification = classifier.classify(&raw_failure(args), &context);
    debug!(error_type = %classification.error.error_type(), "classified failure");

    format.write(out, &ClassificationView(classification))
}

// ============================================================================
// check
// ============================================================================

/// Outcome of one metrics check.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    /// What the rule engine did.
    pub check: CheckResult,
    /// Aggregate statistics afterwards.
    pub stats: SystemStats,
}

impl TableDisplay for CheckReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        if self.check.fired.is_empty() {
            writeln!(writer, "No alerts fired ({} rules evaluated)", self.check.rules_evaluated)?;
        } else {
            writeln!(
                writer,
                "{:<24}  {:<9}  {:>10}  MESSAGE",
                "RULE", "SEVERITY", "VALUE"
            )?;
            writeln!(writer, "{}", "─".repeat(80))?;
            for alert in &self.check.fired {
                let value = alert
                    .value
                    .map_or_else(|| "-".to_string(), |v| format!("{v}"));
                writeln!(
                    writer,
                    "{:<24}  {:<9}  {:>10}  {}",
                    truncate(&alert.rule_id, 24),
                    alert.severity,
                    value,
                    alert.message
                )?;
            }
        }

        writeln!(writer)?;
        writeln!(writer, "Rules evaluated:  {}", self.check.rules_evaluated)?;
        writeln!(writer, "Missing metrics:  {}", self.check.missing_metrics)?;
        writeln!(writer, "Notified:         {}", self.stats.notifications_sent)?;
        writeln!(writer, "Suppressed:       {}", self.stats.suppressed_alerts)?;
        writeln!(writer, "Correlated:       {}", self.stats.correlated_alerts)?;
        Ok(())
    }
}

fn read_metrics(metrics: &str) -> anyhow::Result<MetricsSnapshot> {
    let json = match metrics.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read metrics file '{path}'"))?,
        None => metrics.to_string(),
    };
    MetricsSnapshot::from_json(&json).context("metrics must be a JSON object")
}

/// Evaluates the configured rules once against `metrics`.
///
/// Notifications go to log channels so nothing leaves the machine.
pub fn check<W: Write>(
    out: &mut W,
    format: OutputFormat,
    config: BulwarkConfig,
    metrics: &str,
) -> anyhow::Result<()> {
    let snapshot = read_metrics(metrics)?;

    let mut builder = Bulwark::builder(config);
    for kind in [ChannelKind::Chat, ChannelKind::Email, ChannelKind::Pager] {
        builder = builder.channel(Arc::new(LogChannel::new(kind.as_str(), kind)));
    }
    let bulwark = builder.build()?;

    let check = bulwark.alerts().check_metrics(&snapshot);
    info!(
        metrics = snapshot.len(),
        fired = check.fired.len(),
        "metrics checked"
    );

    let report = CheckReport {
        check,
        stats: bulwark.alerts().stats(),
    };
    format.write(out, &report)?;
    bulwark.shutdown()?;
    Ok(())
}

// ============================================================================
// rules
// ============================================================================

/// One rule for display.
#[derive(Debug, Serialize)]
pub struct RuleInfo {
    /// Rule ID.
    pub id: String,
    /// Rule name.
    pub name: String,
    /// Condition, or `custom` for predicate rules.
    pub condition: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Cooldown in seconds.
    pub cooldown_secs: u64,
    /// Whether the rule escalates.
    pub escalates: bool,
}

/// Built-in rules for display.
#[derive(Debug, Serialize)]
pub struct RuleList {
    /// The rules.
    pub rules: Vec<RuleInfo>,
}

impl TableDisplay for RuleList {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(
            writer,
            "{:<24}  {:<32}  {:<9}  {:>8}  ESCALATES",
            "ID", "CONDITION", "SEVERITY", "COOLDOWN"
        )?;
        writeln!(writer, "{}", "─".repeat(96))?;
        for rule in &self.rules {
            writeln!(
                writer,
                "{:<24}  {:<32}  {:<9}  {:>7}s  {}",
                truncate(&rule.id, 24),
                truncate(&rule.condition, 32),
                rule.severity,
                rule.cooldown_secs,
                if rule.escalates { "yes" } else { "no" }
            )?;
        }
        writeln!(writer)?;
        writeln!(writer, "Total: {} rule(s)", self.rules.len())?;
        Ok(())
    }
}

/// Lists the built-in rule set.
pub fn rules<W: Write>(out: &mut W, format: OutputFormat) -> anyhow::Result<()> {
    let rules = default_rules()?
        .into_iter()
        .map(|rule| RuleInfo {
            condition: rule
                .condition
                .as_ref()
                .map_or_else(|| "custom".to_string(), ToString::to_string),
            severity: rule.severity,
            cooldown_secs: rule.cooldown().as_secs(),
            escalates: rule.escalation.is_some(),
            id: rule.id,
            name: rule.name,
        })
        .collect();
    format.write(out, &RuleList { rules })
}

// ============================================================================
// init-config
// ============================================================================

/// Writes the default configuration to `output`.
pub fn init_config<W: Write>(out: &mut W, output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite",
            output.display()
        );
    }

    let rendered = BulwarkConfig::default().to_toml()?;
    std::fs::write(output, rendered)
        .with_context(|| format!("failed to write {}", output.display()))?;

    writeln!(out, "Config written to {}", output.display())?;
    writeln!(out)?;
    writeln!(out, "Edit the file, then run:")?;
    writeln!(
        out,
        "  bulwark check --config {} --metrics '{{\"error_rate\": 0.02}}'",
        output.display()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;

    fn table() -> OutputFormat {
        OutputFormat::new(Format::Table)
    }

    fn json() -> OutputFormat {
        OutputFormat::new(Format::Json)
    }

    fn classify_args(status: Option<u16>, marker: Option<&str>) -> ClassifyArgs {
        ClassifyArgs {
            status,
            message: "request failed".to_string(),
            marker: marker.map(String::from),
            retry_after: None,
            component: None,
            feature: None,
        }
    }

    #[test]
    fn classify_http_status() {
        let mut buf = Vec::new();
        classify(
            &mut buf,
            json(),
            &BulwarkConfig::default(),
            &classify_args(Some(429), None),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["error"]["type"], "rate_limit");
    }

    #[test]
    fn classify_marker_table() {
        let mut buf = Vec::new();
        classify(
            &mut buf,
            table(),
            &BulwarkConfig::default(),
            &classify_args(None, Some("SESSION_EXPIRED")),
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Classification"));
        assert!(text.contains("session_expired"));
    }

    #[test]
    fn check_fires_default_rules() {
        let mut buf = Vec::new();
        check(
            &mut buf,
            json(),
            BulwarkConfig::default(),
            r#"{"error_rate": 0.12, "memory_usage": 0.5}"#,
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["check"]["fired"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["stats"]["total_alerts"], 2);
    }

    #[test]
    fn check_reads_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, r#"{"service_health": 0.9}"#).unwrap();

        let mut buf = Vec::new();
        check(
            &mut buf,
            table(),
            BulwarkConfig::default(),
            &format!("@{}", path.display()),
        )
        .unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("No alerts fired"));
    }

    #[test]
    fn check_rejects_bad_metrics() {
        let mut buf = Vec::new();
        let err = check(&mut buf, table(), BulwarkConfig::default(), "[1, 2]").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn rules_table_lists_all() {
        let mut buf = Vec::new();
        rules(&mut buf, table()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("critical_error_rate"));
        assert!(text.contains("Total: 7 rule(s)"));
    }

    #[test]
    fn init_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulwark.toml");

        let mut buf = Vec::new();
        init_config(&mut buf, &path, false).unwrap();
        let written = BulwarkConfig::from_file(&path).unwrap();
        assert_eq!(written, BulwarkConfig::default());

        assert!(init_config(&mut buf, &path, false).is_err());
        assert!(init_config(&mut buf, &path, true).is_ok());
    }
}
