//! Stub resolver client.
//!
//! Used by the `query` subcommand and the tests. The point of it is to keep
//! two failure modes apart: a DNS answer (NXDOMAIN, NODATA) comes back as
//! `Ok(QueryOutcome)`, while an unreachable or silent resolver is an `Err`
//! for which [`DnsError::is_transport`] holds.

use super::error::DnsError;
use super::wire::{MAX_UDP_PAYLOAD, RecordType, ResponseCode, build_query, parse_response};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::trace;
use uuid::Uuid;

/// What a resolver answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Response code.
    pub rcode: ResponseCode,
    /// A/AAAA addresses in the answer section.
    pub addresses: Vec<IpAddr>,
    /// TTLs matching `addresses`.
    pub ttls: Vec<u32>,
    /// Answer records of any type.
    pub answer_count: usize,
    /// AA bit.
    pub authoritative: bool,
}

impl QueryOutcome {
    /// NXDOMAIN.
    pub fn is_nxdomain(&self) -> bool {
        self.rcode == ResponseCode::NxDomain
    }

    /// NOERROR with no answers.
    pub fn is_nodata(&self) -> bool {
        self.rcode == ResponseCode::NoError && self.answer_count == 0
    }
}

/// Client for one resolver address.
#[derive(Debug, Clone)]
pub struct DnsClient {
    server: SocketAddr,
    timeout: Duration,
}

impl DnsClient {
    /// Client for `server` with a per-query deadline.
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    /// Query over UDP.
    pub async fn query(&self, name: &str, qtype: RecordType) -> Result<QueryOutcome, DnsError> {
        let id = random_id();
        let packet = build_query(id, name, qtype);

        let response = timeout(self.timeout, self.exchange_udp(&packet, id))
            .await
            .map_err(|_| DnsError::Timeout(self.timeout))??;
        outcome(&response, id)
    }

    /// Query over TCP.
    pub async fn query_tcp(
        &self,
        name: &str,
        qtype: RecordType,
    ) -> Result<QueryOutcome, DnsError> {
        let id = random_id();
        let packet = build_query(id, name, qtype);

        let response = timeout(self.timeout, self.exchange_tcp(&packet))
            .await
            .map_err(|_| DnsError::Timeout(self.timeout))??;
        outcome(&response, id)
    }

    async fn exchange_udp(&self, packet: &[u8], id: u16) -> Result<Vec<u8>, DnsError> {
        let bind: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.server).await?;
        socket.send(packet).await?;

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let n = socket.recv(&mut buf).await?;
            if n >= 2 && u16::from_be_bytes([buf[0], buf[1]]) == id {
                buf.truncate(n);
                return Ok(buf);
            }
            trace!("Ignoring datagram with foreign ID");
        }
    }

    async fn exchange_tcp(&self, packet: &[u8]) -> Result<Vec<u8>, DnsError> {
        let mut stream = TcpStream::connect(self.server).await?;
        let len = u16::try_from(packet.len())
            .map_err(|_| DnsError::UnexpectedResponse("query too large".into()))?;

        let mut framed = Vec::with_capacity(packet.len() + 2);
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(packet);
        stream.write_all(&framed).await?;

        let len = stream.read_u16().await? as usize;
        let mut response = vec![0u8; len];
        stream.read_exact(&mut response).await?;
        Ok(response)
    }
}

fn random_id() -> u16 {
    let bytes = Uuid::new_v4().into_bytes();
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn outcome(response: &[u8], id: u16) -> Result<QueryOutcome, DnsError> {
    let parsed = parse_response(response)?;
    if parsed.header.id != id {
        return Err(DnsError::UnexpectedResponse(format!(
            "ID {} does not match query {}",
            parsed.header.id, id
        )));
    }
    if !parsed.header.is_response() {
        return Err(DnsError::UnexpectedResponse("QR bit not set".into()));
    }

    Ok(QueryOutcome {
        rcode: parsed.header.rcode(),
        addresses: parsed.addresses,
        ttls: parsed.ttls,
        answer_count: parsed.answer_count,
        authoritative: parsed.header.authoritative(),
    })
}
