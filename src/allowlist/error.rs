//! Allowlist error types.

use std::net::IpAddr;
use thiserror::Error;

/// Errors raised while building an allowlist.
///
/// All of these are fatal at startup; they surface to the operator as
/// [`crate::config::ConfigError`].
#[derive(Debug, Error)]
pub enum AllowlistError {
    /// A domain is empty or contains characters that cannot appear in a DNS name.
    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain {
        /// The domain as written in the source.
        domain: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The same normalized domain appears more than once.
    #[error("Duplicate allowlist domain '{domain}' (mapped to {first} and {second})")]
    DuplicateDomain {
        /// Normalized domain.
        domain: String,
        /// Address from the first occurrence.
        first: IpAddr,
        /// Address from the conflicting occurrence.
        second: IpAddr,
    },

    /// A proxy address does not parse as an IPv4 or IPv6 address.
    #[error("Invalid proxy address '{address}' for domain '{domain}'")]
    InvalidAddress {
        /// Domain the address belongs to.
        domain: String,
        /// The unparsable address.
        address: String,
    },

    /// A line in a hosts-style allowlist file could not be parsed.
    #[error("Hosts allowlist line {line_num}: {message}")]
    HostsParse {
        /// Line number (1-indexed).
        line_num: usize,
        /// Description of the problem.
        message: String,
    },
}
