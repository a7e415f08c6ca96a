//! Resolver engine: one decision per query.
//!
//! # Per-query flow
//!
//! ```text
//! Receive -> Decode -> Normalize -> Lookup -> Allowed | Blocked -> Audit -> Respond
//! ```
//!
//! - Allowed, A/AAAA: the proxy address if its family matches, else NODATA.
//! - Allowed, ANY: the proxy address and nothing else.
//! - Allowed, HTTPS/SVCB: always NODATA, since their address hints would
//!   name the real service.
//! - Allowed, other types: NODATA, or relayed to the upstream resolver when
//!   [`NonAddressPolicy::Forward`] is configured. SERVFAIL if that fails or
//!   if the upstream answer carries any address-bearing record.
//! - Blocked: NXDOMAIN, indistinguishable from a name that does not exist.
//! - Undecodable: FORMERR (NOTIMP for non-QUERY opcodes), or silence when
//!   there is no ID to echo.
//!
//! The engine keeps no per-query state between calls. The only shared state
//! is the allowlist snapshot and the audit logger.

use super::wire::{
    MAX_UDP_PAYLOAD, Query, RecordType, ResponseCode, WireError, build_response, error_response,
    parse_query, response_record_types,
};
use crate::allowlist::SharedAllowlist;
use crate::telemetry::{AuditEvent, AuditLogger, Decision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// What to do with non-address queries for allowlisted names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonAddressPolicy {
    /// Answer with an empty NOERROR.
    #[default]
    Nodata,
    /// Relay the query to the upstream resolver.
    Forward,
}

/// Resolver tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// TTL on A/AAAA answers.
    pub ttl: u32,
    /// Non-address query handling.
    pub non_address: NonAddressPolicy,
    /// Upstream resolver for [`NonAddressPolicy::Forward`].
    pub upstream: Option<SocketAddr>,
    /// Bound on a forwarded exchange.
    pub query_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            ttl: 30,
            non_address: NonAddressPolicy::Nodata,
            upstream: None,
            query_timeout: Duration::from_millis(2000),
        }
    }
}

/// One incoming question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    /// Name as received.
    pub query_name: String,
    /// Requested type.
    pub query_type: RecordType,
    /// Sender.
    pub client: SocketAddr,
    /// Receive time.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of an allowlist lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionDecision {
    /// Listed; resolves to `address`.
    Allowed {
        /// Proxy address for the name.
        address: IpAddr,
    },
    /// Not listed.
    Blocked,
}

impl ResolutionDecision {
    /// Whether the name is allowlisted.
    pub fn allowed(&self) -> bool {
        matches!(self, ResolutionDecision::Allowed { .. })
    }

    /// The proxy address; present iff allowed.
    pub fn resolved_address(&self) -> Option<IpAddr> {
        match self {
            ResolutionDecision::Allowed { address } => Some(*address),
            ResolutionDecision::Blocked => None,
        }
    }
}

/// Filtering resolver.
#[derive(Debug)]
pub struct ResolverEngine {
    allowlist: Arc<SharedAllowlist>,
    audit: Arc<AuditLogger>,
    settings: ResolverSettings,
}

impl ResolverEngine {
    /// Create an engine over `allowlist`, auditing to `audit`.
    pub fn new(
        allowlist: Arc<SharedAllowlist>,
        audit: Arc<AuditLogger>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            allowlist,
            audit,
            settings,
        }
    }

    /// The live allowlist.
    pub fn allowlist(&self) -> &Arc<SharedAllowlist> {
        &self.allowlist
    }

    /// Engine settings.
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Decide a request against the current allowlist snapshot.
    pub fn decide(&self, request: &ResolutionRequest) -> ResolutionDecision {
        match self.allowlist.snapshot().lookup(&request.query_name) {
            Some(entry) => ResolutionDecision::Allowed {
                address: entry.proxy_address,
            },
            None => ResolutionDecision::Blocked,
        }
    }

    /// Handle one raw query packet.
    ///
    /// Returns the response to send, or `None` when the packet does not
    /// deserve one.
    pub async fn handle_packet(&self, packet: &[u8], client: SocketAddr) -> Option<Vec<u8>> {
        let query = match parse_query(packet) {
            Ok(query) => query,
            Err(e) => return self.reject_malformed(packet, client, e),
        };

        let request = ResolutionRequest {
            query_name: query.question.name.clone(),
            query_type: query.question.qtype,
            client,
            timestamp: Utc::now(),
        };
        let decision = self.decide(&request);
        trace!(
            "{} {} from {} at {}: {:?}",
            request.query_type, request.query_name, client, request.timestamp, decision
        );

        self.audit.log(AuditEvent::DnsQuery {
            query_name: request.query_name.clone(),
            query_type: request.query_type.to_string(),
            client,
            decision: if decision.allowed() {
                Decision::Allow
            } else {
                Decision::Block
            },
            resolved_address: decision.resolved_address(),
        });

        let response = match decision {
            ResolutionDecision::Blocked => {
                debug!("Blocked {} {}", request.query_type, request.query_name);
                build_response(&query, ResponseCode::NxDomain, &[], self.settings.ttl)
            }
            ResolutionDecision::Allowed { address } => {
                self.answer_allowed(packet, &query, address).await
            }
        };
        Some(response)
    }

    async fn answer_allowed(&self, packet: &[u8], query: &Query, address: IpAddr) -> Vec<u8> {
        let question = &query.question;
        let ttl = self.settings.ttl;

        if !question.is_internet() {
            return build_response(query, ResponseCode::NoError, &[], ttl);
        }

        match question.qtype {
            RecordType::A if address.is_ipv4() => {
                build_response(query, ResponseCode::NoError, &[address], ttl)
            }
            RecordType::Aaaa if address.is_ipv6() => {
                build_response(query, ResponseCode::NoError, &[address], ttl)
            }
            RecordType::A | RecordType::Aaaa => {
                build_response(query, ResponseCode::NoError, &[], ttl)
            }
            RecordType::ANY => build_response(query, ResponseCode::NoError, &[address], ttl),
            qtype if qtype.carries_addresses() => {
                build_response(query, ResponseCode::NoError, &[], ttl)
            }
            RecordType::Other(_) => match self.settings.non_address {
                NonAddressPolicy::Nodata => build_response(query, ResponseCode::NoError, &[], ttl),
                NonAddressPolicy::Forward => self.forward(packet, query).await,
            },
        }
    }

    async fn forward(&self, packet: &[u8], query: &Query) -> Vec<u8> {
        let servfail = || build_response(query, ResponseCode::ServFail, &[], self.settings.ttl);

        let Some(upstream) = self.settings.upstream else {
            warn!("Forwarding enabled without an upstream resolver");
            return servfail();
        };

        match timeout(
            self.settings.query_timeout,
            exchange_udp(packet, upstream, query.id()),
        )
        .await
        {
            Ok(Ok(response)) => match response_record_types(&response) {
                Ok(types) if !types.iter().any(|t| t.carries_addresses()) => response,
                Ok(_) => {
                    warn!(
                        "Upstream answer for {} carries address records, dropping it",
                        query.question.name
                    );
                    servfail()
                }
                Err(e) => {
                    warn!("Undecodable upstream answer for {}: {}", query.question.name, e);
                    servfail()
                }
            },
            Ok(Err(e)) => {
                warn!("Forward of {} to {} failed: {}", query.question.name, upstream, e);
                servfail()
            }
            Err(_) => {
                warn!(
                    "Forward of {} to {} timed out",
                    query.question.name, upstream
                );
                servfail()
            }
        }
    }

    fn reject_malformed(
        &self,
        packet: &[u8],
        client: SocketAddr,
        error: WireError,
    ) -> Option<Vec<u8>> {
        debug!("Malformed query from {}: {}", client, error);
        self.audit.log(AuditEvent::DnsMalformed {
            client,
            size: packet.len(),
            reason: error.to_string(),
        });

        let rcode = match error {
            WireError::UnsupportedOpcode(_) => ResponseCode::NotImp,
            WireError::NotAQuery => return None,
            _ => ResponseCode::FormErr,
        };
        error_response(packet, rcode)
    }
}

/// Send `packet` to `upstream` and wait for the response carrying `id`.
async fn exchange_udp(packet: &[u8], upstream: SocketAddr, id: u16) -> std::io::Result<Vec<u8>> {
    let bind: SocketAddr = if upstream.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(upstream).await?;
    socket.send(packet).await?;

    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    loop {
        let n = socket.recv(&mut buf).await?;
        if n >= 4 && u16::from_be_bytes([buf[0], buf[1]]) == id && buf[2] & 0x80 != 0 {
            buf.truncate(n);
            return Ok(buf);
        }
        trace!("Ignoring stray upstream datagram ({} bytes)", n);
    }
}
