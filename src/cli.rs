//! Command-line interface definitions for netfence.
//!
//! Uses clap's derive API for type-safe argument parsing.

use crate::config::{Config, ResolverConfig, TlsConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Filtering DNS resolver and proxy router for sandboxed agents.
///
/// netfence answers DNS only for allowlisted domains, mapping each to a
/// proxy address inside an isolated subnet, and relays connections on those
/// addresses to the real upstream services.
#[derive(Parser, Debug)]
#[command(name = "netfence")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Diagnostic log format on stderr.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

/// Diagnostic log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Subcommands for netfence.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the resolver, health endpoint and proxy routes.
    Serve {
        /// Override `resolver.listen`.
        #[arg(long = "listen", value_name = "ADDR")]
        listen: Option<SocketAddr>,

        /// Override `resolver.health_listen`.
        #[arg(long = "health-listen", value_name = "ADDR")]
        health_listen: Option<SocketAddr>,

        /// Override `tls.ca_cert_out`.
        #[arg(long = "ca-cert-out", value_name = "PATH")]
        ca_cert_out: Option<PathBuf>,
    },

    /// Validate configuration and print the allowlist and route table.
    Check,

    /// Send one query to a resolver and report the outcome.
    ///
    /// Exit status is 0 for an answer with addresses, 1 for NXDOMAIN or
    /// NODATA, and 2 when the resolver could not be reached.
    Query {
        /// Name to look up.
        name: String,

        /// Record type (A, AAAA, MX, TXT, ... or TYPEn).
        #[arg(short = 't', long = "type", default_value = "A")]
        qtype: String,

        /// Resolver to ask; defaults to the configured listen address.
        #[arg(short = 's', long = "server", value_name = "ADDR")]
        server: Option<SocketAddr>,

        /// Use TCP instead of UDP.
        #[arg(long = "tcp")]
        tcp: bool,

        /// Give up after this many milliseconds.
        #[arg(long = "timeout-ms", default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Print the resolv.conf the sandboxed agent should use.
    ResolvConf,
}

impl Cli {
    /// Configuration overlay built from command-line flags.
    ///
    /// Merged last, on top of every config file.
    pub fn overrides(&self) -> Config {
        match &self.command {
            Commands::Serve {
                listen,
                health_listen,
                ca_cert_out,
            } => Config {
                resolver: ResolverConfig {
                    listen: *listen,
                    health_listen: *health_listen,
                    ..Default::default()
                },
                tls: TlsConfig {
                    ca_cert_out: ca_cert_out.clone(),
                },
                ..Default::default()
            },
            _ => Config::default(),
        }
    }
}
