//! Sleuth - code search, lint and profiling pipeline
//!
//! Command line front end over the `sleuth` library.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sleuth::cli::{self, Cli};
use sleuth::config::Config;

fn init_logging(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(EnvFilter::from_default_env().add_directive(format!("sleuth={}", level).parse()?))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{} {:#}", "✗".red(), e);
                return ExitCode::from(2);
            }
        },
        None => Config::load(),
    };

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };
    if let Err(e) = init_logging(&level) {
        eprintln!("{} Invalid log level '{}': {}", "✗".red(), level, e);
        return ExitCode::from(2);
    }

    match cli::run(cli, config).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            ExitCode::from(cli::exit_code(&e) as u8)
        }
    }
}
