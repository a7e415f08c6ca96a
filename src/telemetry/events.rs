//! Audit event types for structured logging.
//!
//! Every record is one JSON object with an `event` tag in snake_case and a
//! `ts` field added at write time.

use crate::proxy::CloseReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};

/// Audit events.
///
/// `DnsQuery` is the resolution audit trail: exactly one per answered query.
/// The rest record service lifecycle and proxy connection outcomes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The service finished binding its listeners.
    ServiceStart {
        /// Crate version.
        version: String,
        /// Process ID.
        pid: u32,
        /// Number of allowlisted domains.
        domains: usize,
        /// Number of proxy routes.
        routes: usize,
    },

    /// The service is shutting down.
    ServiceStop {
        /// What triggered the shutdown.
        reason: String,
    },

    /// A new allowlist replaced the old one.
    AllowlistReload {
        /// Domains in the table before the swap.
        previous_domains: usize,
        /// Domains in the table after the swap.
        domains: usize,
    },

    /// A reload was refused; the previous allowlist stays active.
    ReloadRejected {
        /// Why the reload was refused.
        reason: String,
    },

    /// One DNS resolution decision.
    DnsQuery {
        /// Query name as received (case preserved).
        query_name: String,
        /// Record type mnemonic, e.g. `A` or `MX`.
        query_type: String,
        /// Address the query came from.
        client: SocketAddr,
        /// Allow or block.
        decision: Decision,
        /// Proxy address the name maps to; present iff allowed.
        #[serde(skip_serializing_if = "Option::is_none")]
        resolved_address: Option<IpAddr>,
    },

    /// A packet that could not be decoded as a query.
    DnsMalformed {
        /// Address the packet came from.
        client: SocketAddr,
        /// Packet size in bytes.
        size: usize,
        /// Decoder error.
        reason: String,
    },

    /// A proxied connection reached its upstream.
    ProxyConnect {
        /// Connection ID, shared by all events for this connection.
        conn_id: String,
        /// Route name.
        service: String,
        /// Agent-side peer.
        client: SocketAddr,
        /// Upstream socket.
        upstream: SocketAddr,
    },

    /// A connection was refused before relaying.
    ProxyReject {
        /// Connection ID.
        conn_id: String,
        /// Route name.
        service: String,
        /// Agent-side peer.
        client: SocketAddr,
        /// Why it was refused.
        reason: RejectReason,
        /// SNI presented by the client, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        sni: Option<String>,
    },

    /// The upstream could not be reached.
    UpstreamFailure {
        /// Connection ID.
        conn_id: String,
        /// Route name.
        service: String,
        /// Upstream socket.
        upstream: SocketAddr,
        /// Error description.
        error: String,
    },

    /// A relay finished.
    RelayClosed {
        /// Connection ID.
        conn_id: String,
        /// Route name.
        service: String,
        /// Bytes copied from the agent to the upstream.
        bytes_up: u64,
        /// Bytes copied from the upstream to the agent.
        bytes_down: u64,
        /// What ended the relay.
        close: CloseReason,
        /// Relay lifetime.
        duration_ms: u64,
    },
}

/// Outcome of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The name is allowlisted.
    Allow,
    /// The name is not allowlisted (answered NXDOMAIN).
    Block,
}

/// Why a proxied connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// SNI names a host outside the route's expected set.
    SniMismatch,
    /// The ClientHello carried no SNI.
    MissingSni,
    /// The TLS handshake failed or timed out.
    HandshakeFailed,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The event, flattened next to the timestamp.
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with the current time.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
