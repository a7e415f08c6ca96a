//! Configuration error types.

use crate::allowlist::AllowlistError;
use crate::isolation::IsolationError;
use crate::proxy::ProxyError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
///
/// Every variant is fatal: the process refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// No configuration file exists in any searched location.
    #[error("No configuration found (searched: {})", display_paths(.searched))]
    NotFound {
        /// Locations that were tried.
        searched: Vec<PathBuf>,
    },

    /// A configuration value is invalid.
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue {
        /// The field name that has an invalid value.
        field: String,
        /// Description of why the value is invalid.
        message: String,
    },

    /// An allowlist entry is malformed or duplicated.
    #[error(transparent)]
    Allowlist(#[from] AllowlistError),

    /// The hosts-style allowlist file is malformed.
    #[error("In allowlist file {path}: {source}")]
    AllowlistFile {
        /// Path to the file.
        path: PathBuf,
        /// What was wrong with it.
        source: AllowlistError,
    },

    /// A service upstream could not be resolved to a socket address.
    #[error("Cannot resolve upstream '{upstream}' of service '{service}': {message}")]
    UnresolvableUpstream {
        /// Service name.
        service: String,
        /// Upstream as written.
        upstream: String,
        /// Resolver error.
        message: String,
    },

    /// The route set is inconsistent.
    #[error("Invalid proxy routes: {0}")]
    Routes(#[from] ProxyError),

    /// Addresses violate the isolation contract.
    #[error(transparent)]
    Isolation(#[from] IsolationError),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
