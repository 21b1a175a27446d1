pub mod cli;
pub mod config;
pub mod control;
pub mod daemon;
pub mod db;
pub mod extfilter;
pub mod models;
pub mod pipeline;
pub mod scanner;
pub mod workdir;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub fn run() -> ExitCode {
    let cli = cli::Cli::parse();

    let default_filter = if cli.debug {
        config::debug_log_filter()
    } else {
        config::default_log_filter()
    };
    // Logs go to stderr; stdout carries the `##` markers
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = match config::Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration rejected");
            return ExitCode::FAILURE;
        }
    };

    let daemon = cli.command.is_daemon();
    match cli::execute(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting with failure");
            if !daemon {
                println!("## failed: {e}");
            }
            ExitCode::FAILURE
        }
    }
}
