//! Error types for proxy operations.
//!
//! - Startup errors (binding, route table construction, CA setup)
//! - Per-connection errors (TLS handshake, upstream connect), which are
//!   logged by the connection task and never reach the accept loop

use std::net::SocketAddr;
use thiserror::Error;

use super::ca::CaError;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error on an established socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A listen address could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Two routes claim the same listen address or name.
    #[error("Duplicate route: {0}")]
    DuplicateRoute(String),

    /// TLS error during handshake or configuration.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Certificate generation failed.
    #[error("Certificate generation failed: {0}")]
    CertGeneration(#[from] CaError),

    /// An operation exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: SocketAddr,
        /// Error message.
        message: String,
    },
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}
