//! Bulwark CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use bulwark::{BulwarkConfig, LoggingConfig};
use clap::Parser;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};
use output::OutputFormat;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        json: cli.log_json,
        ..LoggingConfig::default()
    };
    if let Err(e) = bulwark::init_tracing(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Classify(args) => {
            commands::classify(&mut stdout, format, &BulwarkConfig::default(), &args)?;
        }
        Commands::Check { config, metrics } => {
            let config = match config {
                Some(path) => BulwarkConfig::from_file(path)?,
                None => BulwarkConfig::default(),
            };
            commands::check(&mut stdout, format, config, &metrics)?;
        }
        Commands::Rules => commands::rules(&mut stdout, format)?,
        Commands::InitConfig { output, force } => {
            commands::init_config(&mut stdout, &output, force)?;
        }
    }
    Ok(())
}
