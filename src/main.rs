//! netfence: filtering resolver and proxy router for sandboxed agents
//!
//! This is the main entry point for the netfence binary. It handles CLI
//! argument parsing and diagnostic logging setup, then hands off to the
//! subcommand handlers.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: goes to the configured sink (file, stdout, syslog),
//!   never through the diagnostic logger
//! - **Diagnostic logging**: `tracing` to stderr, text or JSON
//! - **Command output** (`check`, `query`, `resolv-conf`): stdout

use anyhow::{Context, Result};
use clap::Parser;
use netfence::cli::{Cli, LogFormat};
use netfence::cli_handler::handle_command;
use netfence::config::ConfigLoader;
use std::process::ExitCode;
use tracing::debug;

fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    // Peek at the configured log level; load errors are reported by the command itself
    let config_level = ConfigLoader::new()
        .load(cli.config.as_deref())
        .ok()
        .and_then(|c| c.general.log_level);
    init_tracing(cli.verbose, cli.log_format, config_level.as_deref())?;

    debug!("Parsed CLI arguments: {:?}", cli);

    handle_command(&cli)
}

/// Initialize the tracing subscriber for diagnostic logging.
///
/// This is separate from the audit log. Diagnostics always go to stderr.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, else `general.log_level`, else warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, format: LogFormat, config_level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(config_level.unwrap_or("warn")))
            .unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
    .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
