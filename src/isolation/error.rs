//! Isolation contract error types.

use std::net::IpAddr;
use thiserror::Error;

/// Errors raised while checking addresses against the isolation contract.
#[derive(Debug, Error)]
pub enum IsolationError {
    /// The subnet is not valid CIDR notation.
    #[error("Invalid subnet '{subnet}': {reason}")]
    InvalidSubnet {
        /// The subnet as written.
        subnet: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A resolver or proxy address lies outside the isolated subnet.
    #[error("{role} address {address} is outside subnet {subnet}")]
    OutsideSubnet {
        /// What the address is used for.
        role: String,
        /// The offending address.
        address: IpAddr,
        /// The configured subnet.
        subnet: String,
    },

    /// The resolver shares its address with a proxy.
    #[error("Resolver address {0} is also a proxy address")]
    ResolverIsProxy(IpAddr),
}
