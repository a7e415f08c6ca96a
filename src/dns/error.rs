//! DNS error types.

use super::wire::WireError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from the resolver's listeners, health endpoint and stub client.
#[derive(Debug, Error)]
pub enum DnsError {
    /// A socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No answer within the deadline.
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// A received message did not decode.
    #[error("Malformed DNS message: {0}")]
    Wire(#[from] WireError),

    /// A response arrived that does not answer our query.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl DnsError {
    /// Whether this is a transport-level failure (no DNS answer at all),
    /// as opposed to a DNS-level answer such as NXDOMAIN.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DnsError::Io(_) | DnsError::Timeout(_) | DnsError::Bind { .. }
        )
    }
}
