//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Bulwark - failure classification, retries and alerting.
#[derive(Parser, Debug, Clone)]
#[command(name = "bulwark")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Emit logs as JSON lines.
    #[arg(long, env = "BULWARK_LOG_JSON")]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Classify a failure and show the canonical error.
    Classify(ClassifyArgs),

    /// Evaluate alert rules against a metrics snapshot.
    Check {
        /// Configuration file. Defaults apply when omitted.
        #[arg(short, long, env = "BULWARK_CONFIG")]
        config: Option<PathBuf>,

        /// Metrics as a JSON object, or `@path` to read it from a file.
        #[arg(short, long)]
        metrics: String,
    },

    /// List the built-in alert rules.
    Rules,

    /// Write a configuration file with every default spelled out.
    InitConfig {
        /// Path to write config.
        #[arg(short, long, default_value = "bulwark.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Arguments for `classify`.
#[derive(clap::Args, Debug, Clone)]
pub struct ClassifyArgs {
    /// HTTP status code of the failed response.
    #[arg(short, long)]
    pub status: Option<u16>,

    /// Failure message.
    #[arg(short, long, default_value = "")]
    pub message: String,

    /// Application error marker, such as `SESSION_EXPIRED`.
    #[arg(long, conflicts_with = "status")]
    pub marker: Option<String>,

    /// Raw `retry-after` header value.
    #[arg(long, requires = "status")]
    pub retry_after: Option<String>,

    /// Component the failure happened in.
    #[arg(long)]
    pub component: Option<String>,

    /// Feature the user was using.
    #[arg(long)]
    pub feature: Option<String>,
}
