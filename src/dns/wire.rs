//! Minimal DNS message codec.
//!
//! Only what a filtering resolver needs is implemented: parsing a single
//! question out of a query, and building responses that carry A/AAAA
//! answers or a bare response code. The client side (building a query and
//! reading A/AAAA answers back) is here too so the stub client and the
//! tests share one implementation.
//!
//! Every read is bounds-checked. Compression pointers must point backwards
//! and are followed a bounded number of times. A violation is a
//! [`WireError`], never a panic.

use bytes::{Buf, BufMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Largest UDP payload we read or produce.
pub const MAX_UDP_PAYLOAD: usize = 4096;

const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_HOPS: usize = 16;

const CLASS_IN: u16 = 1;
const CLASS_ANY: u16 = 255;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const OPCODE_MASK: u16 = 0x7800;
const RCODE_MASK: u16 = 0x000F;

/// Errors produced while decoding a DNS message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The message ended before a complete field could be read.
    #[error("message truncated")]
    Truncated,

    /// The QR bit is set on something that should be a query.
    #[error("packet is a response, not a query")]
    NotAQuery,

    /// The opcode is not a standard query.
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(u8),

    /// Queries must carry exactly one question.
    #[error("expected exactly one question, got {0}")]
    QuestionCount(u16),

    /// A label exceeds 63 octets or uses a reserved label type.
    #[error("invalid label")]
    InvalidLabel,

    /// The decoded name exceeds 255 octets.
    #[error("name too long")]
    NameTooLong,

    /// A compression pointer points forward or loops.
    #[error("invalid compression pointer")]
    BadPointer,
}

/// DNS record types this resolver distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// IPv4 address.
    A,
    /// IPv6 address.
    Aaaa,
    /// Any other type, kept as its numeric code.
    Other(u16),
}

impl RecordType {
    /// SVCB (RFC 9460).
    pub const SVCB: RecordType = RecordType::Other(64);
    /// HTTPS (RFC 9460).
    pub const HTTPS: RecordType = RecordType::Other(65);
    /// ANY, which includes the address records of a name.
    pub const ANY: RecordType = RecordType::Other(255);

    /// Numeric type code.
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Aaaa => 28,
            RecordType::Other(code) => code,
        }
    }

    /// Whether this type asks for an address.
    pub fn is_address(self) -> bool {
        matches!(self, RecordType::A | RecordType::Aaaa)
    }

    /// Whether records of this type can carry an IP address in their data,
    /// either as the record itself or as `ipv4hint`/`ipv6hint` parameters.
    pub fn carries_addresses(self) -> bool {
        self.is_address() || self == RecordType::SVCB || self == RecordType::HTTPS
    }

    /// Parse a mnemonic such as `A`, `AAAA`, `MX` or `TYPE65`.
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        let code = match upper.as_str() {
            "A" => 1,
            "NS" => 2,
            "CNAME" => 5,
            "SOA" => 6,
            "PTR" => 12,
            "MX" => 15,
            "TXT" => 16,
            "AAAA" => 28,
            "SRV" => 33,
            "SVCB" => 64,
            "HTTPS" => 65,
            "ANY" => 255,
            other => other.strip_prefix("TYPE")?.parse().ok()?,
        };
        Some(Self::from(code))
    }
}

impl From<u16> for RecordType {
    fn from(code: u16) -> Self {
        match code {
            1 => RecordType::A,
            28 => RecordType::Aaaa,
            other => RecordType::Other(other),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => f.write_str("A"),
            RecordType::Aaaa => f.write_str("AAAA"),
            RecordType::Other(2) => f.write_str("NS"),
            RecordType::Other(5) => f.write_str("CNAME"),
            RecordType::Other(6) => f.write_str("SOA"),
            RecordType::Other(12) => f.write_str("PTR"),
            RecordType::Other(15) => f.write_str("MX"),
            RecordType::Other(16) => f.write_str("TXT"),
            RecordType::Other(33) => f.write_str("SRV"),
            RecordType::Other(64) => f.write_str("SVCB"),
            RecordType::Other(65) => f.write_str("HTTPS"),
            RecordType::Other(255) => f.write_str("ANY"),
            RecordType::Other(code) => write!(f, "TYPE{}", code),
        }
    }
}

/// Response codes used by this resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Success (also used for NODATA).
    NoError,
    /// The query could not be parsed.
    FormErr,
    /// Upstream failure while forwarding.
    ServFail,
    /// The name does not exist (or is not allowlisted).
    NxDomain,
    /// Opcode not implemented.
    NotImp,
    /// Refused.
    Refused,
    /// Any other code.
    Other(u8),
}

impl ResponseCode {
    /// Numeric RCODE.
    pub fn code(self) -> u8 {
        match self {
            ResponseCode::NoError => 0,
            ResponseCode::FormErr => 1,
            ResponseCode::ServFail => 2,
            ResponseCode::NxDomain => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Other(code) => code,
        }
    }
}

impl From<u8> for ResponseCode {
    fn from(code: u8) -> Self {
        match code {
            0 => ResponseCode::NoError,
            1 => ResponseCode::FormErr,
            2 => ResponseCode::ServFail,
            3 => ResponseCode::NxDomain,
            4 => ResponseCode::NotImp,
            5 => ResponseCode::Refused,
            other => ResponseCode::Other(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::NoError => f.write_str("NOERROR"),
            ResponseCode::FormErr => f.write_str("FORMERR"),
            ResponseCode::ServFail => f.write_str("SERVFAIL"),
            ResponseCode::NxDomain => f.write_str("NXDOMAIN"),
            ResponseCode::NotImp => f.write_str("NOTIMP"),
            ResponseCode::Refused => f.write_str("REFUSED"),
            ResponseCode::Other(code) => write!(f, "RCODE{}", code),
        }
    }
}

/// Fixed header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Transaction ID.
    pub id: u16,
    /// Raw flags word.
    pub flags: u16,
    /// Question count.
    pub qdcount: u16,
    /// Answer count.
    pub ancount: u16,
    /// Authority count.
    pub nscount: u16,
    /// Additional count.
    pub arcount: u16,
}

impl Header {
    fn read(packet: &[u8]) -> Result<Self, WireError> {
        if packet.len() < HEADER_LEN {
            return Err(WireError::Truncated);
        }
        let mut buf = &packet[..HEADER_LEN];
        Ok(Self {
            id: buf.get_u16(),
            flags: buf.get_u16(),
            qdcount: buf.get_u16(),
            ancount: buf.get_u16(),
            nscount: buf.get_u16(),
            arcount: buf.get_u16(),
        })
    }

    /// Whether the QR (response) bit is set.
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    /// The 4-bit opcode.
    pub fn opcode(&self) -> u8 {
        ((self.flags & OPCODE_MASK) >> 11) as u8
    }

    /// Whether recursion was requested.
    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }

    /// Whether the AA bit is set.
    pub fn authoritative(&self) -> bool {
        self.flags & FLAG_AA != 0
    }

    /// Whether the TC bit is set.
    pub fn truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    /// The response code.
    pub fn rcode(&self) -> ResponseCode {
        ResponseCode::from((self.flags & RCODE_MASK) as u8)
    }
}

/// The single question of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Name in presentation form, as sent (case preserved, no trailing dot).
    pub name: String,
    /// Requested record type.
    pub qtype: RecordType,
    /// Requested class.
    pub qclass: u16,
}

impl Question {
    /// Whether the class is IN (or ANY).
    pub fn is_internet(&self) -> bool {
        self.qclass == CLASS_IN || self.qclass == CLASS_ANY
    }
}

/// A decoded query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Header of the query.
    pub header: Header,
    /// Its only question.
    pub question: Question,
    /// Wire bytes of the question section (echoed back in responses).
    question_wire: Vec<u8>,
}

impl Query {
    /// Transaction ID.
    pub fn id(&self) -> u16 {
        self.header.id
    }
}

/// Decode a query packet.
///
/// Only the header and the question are decoded; anything after the
/// question (EDNS OPT records and the like) is ignored.
pub fn parse_query(packet: &[u8]) -> Result<Query, WireError> {
    let header = Header::read(packet)?;

    if header.is_response() {
        return Err(WireError::NotAQuery);
    }
    if header.opcode() != 0 {
        return Err(WireError::UnsupportedOpcode(header.opcode()));
    }
    if header.qdcount != 1 {
        return Err(WireError::QuestionCount(header.qdcount));
    }

    let (name, after_name) = read_name(packet, HEADER_LEN)?;
    if packet.len() < after_name + 4 {
        return Err(WireError::Truncated);
    }
    let mut buf = &packet[after_name..after_name + 4];
    let qtype = RecordType::from(buf.get_u16());
    let qclass = buf.get_u16();

    Ok(Query {
        header,
        question: Question {
            name,
            qtype,
            qclass,
        },
        question_wire: packet[HEADER_LEN..after_name + 4].to_vec(),
    })
}

/// Read a possibly compressed name starting at `offset`.
///
/// Returns the presentation-form name and the offset just past the name in
/// the original (uncompressed) position. Bytes that are not printable ASCII,
/// and dots inside labels, are escaped as `\DDD` so they can never collide
/// with a listed domain.
fn read_name(packet: &[u8], offset: usize) -> Result<(String, usize), WireError> {
    let mut name = String::new();
    let mut wire_len = 0usize;
    let mut pos = offset;
    let mut end: Option<usize> = None;
    let mut hops = 0usize;

    loop {
        let len = *packet.get(pos).ok_or(WireError::Truncated)? as usize;

        match len & 0xC0 {
            0x00 => {}
            0xC0 => {
                let low = *packet.get(pos + 1).ok_or(WireError::Truncated)? as usize;
                let target = ((len & 0x3F) << 8) | low;
                hops += 1;
                if target >= pos || hops > MAX_POINTER_HOPS {
                    return Err(WireError::BadPointer);
                }
                end.get_or_insert(pos + 2);
                pos = target;
                continue;
            }
            _ => return Err(WireError::InvalidLabel),
        }

        if len == 0 {
            let end = end.unwrap_or(pos + 1);
            return Ok((name, end));
        }
        if len > MAX_LABEL_LEN {
            return Err(WireError::InvalidLabel);
        }

        let label = packet
            .get(pos + 1..pos + 1 + len)
            .ok_or(WireError::Truncated)?;
        wire_len += len + 1;
        if wire_len + 1 > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }

        if !name.is_empty() {
            name.push('.');
        }
        for &b in label {
            if b.is_ascii_graphic() && b != b'.' && b != b'\\' {
                name.push(b as char);
            } else {
                name.push_str(&format!("\\{:03}", b));
            }
        }

        pos += len + 1;
    }
}

/// Encode a presentation-form name into wire labels.
fn write_name(out: &mut Vec<u8>, name: &str) {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    for label in trimmed.split('.').filter(|l| !l.is_empty()) {
        let bytes = label.as_bytes();
        let len = bytes.len().min(MAX_LABEL_LEN);
        out.put_u8(len as u8);
        out.put_slice(&bytes[..len]);
    }
    out.put_u8(0);
}

/// Build a response to `query`.
///
/// `answers` are emitted as A/AAAA records owned by the question name (via
/// a compression pointer to offset 12). The caller decides which addresses
/// fit the question type; an empty slice with `NoError` is NODATA.
pub fn build_response(query: &Query, rcode: ResponseCode, answers: &[IpAddr], ttl: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + query.question_wire.len() + answers.len() * 28);

    let flags = FLAG_QR
        | FLAG_AA
        | (query.header.flags & (OPCODE_MASK | FLAG_RD))
        | u16::from(rcode.code() & 0x0F);

    out.put_u16(query.id());
    out.put_u16(flags);
    out.put_u16(1);
    out.put_u16(answers.len() as u16);
    out.put_u16(0);
    out.put_u16(0);
    out.put_slice(&query.question_wire);

    for address in answers {
        out.put_u16(0xC000 | HEADER_LEN as u16);
        match address {
            IpAddr::V4(v4) => {
                out.put_u16(RecordType::A.code());
                out.put_u16(CLASS_IN);
                out.put_u32(ttl);
                out.put_u16(4);
                out.put_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                out.put_u16(RecordType::Aaaa.code());
                out.put_u16(CLASS_IN);
                out.put_u32(ttl);
                out.put_u16(16);
                out.put_slice(&v6.octets());
            }
        }
    }

    out
}

/// Build a header-only error response for a packet that could not be parsed
/// as a query.
///
/// The transaction ID, opcode and RD bit are echoed when present. Returns
/// `None` when there is nothing sensible to answer: fewer than two bytes
/// (no ID to echo) or a packet that is itself a response, which is dropped
/// so two resolvers cannot bounce errors at each other.
pub fn error_response(packet: &[u8], rcode: ResponseCode) -> Option<Vec<u8>> {
    if packet.len() < 2 {
        return None;
    }
    let id = u16::from_be_bytes([packet[0], packet[1]]);
    let request_flags = match packet.get(2..4) {
        Some(bytes) => u16::from_be_bytes([bytes[0], bytes[1]]),
        None => 0,
    };
    if request_flags & FLAG_QR != 0 {
        return None;
    }

    let flags = FLAG_QR | (request_flags & (OPCODE_MASK | FLAG_RD)) | u16::from(rcode.code() & 0x0F);

    let mut out = Vec::with_capacity(HEADER_LEN);
    out.put_u16(id);
    out.put_u16(flags);
    out.put_u16(0);
    out.put_u16(0);
    out.put_u16(0);
    out.put_u16(0);
    Some(out)
}

/// Build a standard recursive-desired query for `name`.
pub fn build_query(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    out.put_u16(id);
    out.put_u16(FLAG_RD);
    out.put_u16(1);
    out.put_u16(0);
    out.put_u16(0);
    out.put_u16(0);
    write_name(&mut out, name);
    out.put_u16(qtype.code());
    out.put_u16(CLASS_IN);
    out
}

/// A decoded response, reduced to what the stub client reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response header.
    pub header: Header,
    /// Echoed question, if any.
    pub question: Option<Question>,
    /// A and AAAA records from the answer section.
    pub addresses: Vec<IpAddr>,
    /// TTLs matching `addresses`.
    pub ttls: Vec<u32>,
    /// Total number of answer records, including non-address ones.
    pub answer_count: usize,
}

/// Decode a response packet.
pub fn parse_response(packet: &[u8]) -> Result<Response, WireError> {
    let header = Header::read(packet)?;
    let mut pos = HEADER_LEN;

    let mut question = None;
    for _ in 0..header.qdcount {
        let (name, after) = read_name(packet, pos)?;
        let mut fixed = packet.get(after..after + 4).ok_or(WireError::Truncated)?;
        let qtype = RecordType::from(fixed.get_u16());
        let qclass = fixed.get_u16();
        question.get_or_insert(Question {
            name,
            qtype,
            qclass,
        });
        pos = after + 4;
    }

    let mut addresses = Vec::new();
    let mut ttls = Vec::new();
    for _ in 0..header.ancount {
        let (_, after) = read_name(packet, pos)?;
        let mut fixed = packet.get(after..after + 10).ok_or(WireError::Truncated)?;
        let rtype = RecordType::from(fixed.get_u16());
        let _class = fixed.get_u16();
        let ttl = fixed.get_u32();
        let rdlen = fixed.get_u16() as usize;
        let rdata = packet
            .get(after + 10..after + 10 + rdlen)
            .ok_or(WireError::Truncated)?;

        match (rtype, rdlen) {
            (RecordType::A, 4) => {
                addresses.push(IpAddr::V4(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3])));
                ttls.push(ttl);
            }
            (RecordType::Aaaa, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                addresses.push(IpAddr::V6(Ipv6Addr::from(octets)));
                ttls.push(ttl);
            }
            _ => {}
        }
        pos = after + 10 + rdlen;
    }

    Ok(Response {
        header,
        question,
        addresses,
        ttls,
        answer_count: header.ancount as usize,
    })
}

/// Types of every resource record in a response: answer, authority and
/// additional sections, in wire order.
pub fn response_record_types(packet: &[u8]) -> Result<Vec<RecordType>, WireError> {
    let header = Header::read(packet)?;
    let mut pos = HEADER_LEN;

    for _ in 0..header.qdcount {
        let (_, after) = read_name(packet, pos)?;
        if packet.len() < after + 4 {
            return Err(WireError::Truncated);
        }
        pos = after + 4;
    }

    let records = usize::from(header.ancount)
        + usize::from(header.nscount)
        + usize::from(header.arcount);
    let mut types = Vec::with_capacity(records);
    for _ in 0..records {
        let (_, after) = read_name(packet, pos)?;
        let mut fixed = packet.get(after..after + 10).ok_or(WireError::Truncated)?;
        types.push(RecordType::from(fixed.get_u16()));
        fixed.advance(6);
        let rdlen = fixed.get_u16() as usize;
        if packet.len() < after + 10 + rdlen {
            return Err(WireError::Truncated);
        }
        pos = after + 10 + rdlen;
    }

    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_built_query() {
        let packet = build_query(0x1234, "GitHub.com.", RecordType::A);
        let query = parse_query(&packet).unwrap();

        assert_eq!(query.id(), 0x1234);
        assert_eq!(query.question.name, "GitHub.com");
        assert_eq!(query.question.qtype, RecordType::A);
        assert!(query.question.is_internet());
        assert!(query.header.recursion_desired());
    }

    #[test]
    fn test_a_response_layout() {
        let query = parse_query(&build_query(7, "github.com", RecordType::A)).unwrap();
        let packet = build_response(
            &query,
            ResponseCode::NoError,
            &["10.100.1.10".parse().unwrap()],
            30,
        );

        let response = parse_response(&packet).unwrap();
        assert_eq!(response.header.id, 7);
        assert!(response.header.is_response());
        assert!(response.header.authoritative());
        assert!(response.header.recursion_desired());
        assert!(!response.header.truncated());
        assert_eq!(response.header.rcode(), ResponseCode::NoError);
        assert_eq!(response.addresses, vec!["10.100.1.10".parse::<IpAddr>().unwrap()]);
        assert_eq!(response.ttls, vec![30]);
        assert_eq!(response.question.unwrap().name, "github.com");
    }

    #[test]
    fn test_aaaa_response() {
        let query = parse_query(&build_query(9, "github.com", RecordType::Aaaa)).unwrap();
        let address: IpAddr = "fd00::10".parse().unwrap();
        let packet = build_response(&query, ResponseCode::NoError, &[address], 30);

        let response = parse_response(&packet).unwrap();
        assert_eq!(response.addresses, vec![address]);
    }

    #[test]
    fn test_nxdomain_and_nodata() {
        let query = parse_query(&build_query(1, "google.com", RecordType::A)).unwrap();

        let nx = parse_response(&build_response(&query, ResponseCode::NxDomain, &[], 30)).unwrap();
        assert_eq!(nx.header.rcode(), ResponseCode::NxDomain);
        assert_eq!(nx.answer_count, 0);

        let nodata =
            parse_response(&build_response(&query, ResponseCode::NoError, &[], 30)).unwrap();
        assert_eq!(nodata.header.rcode(), ResponseCode::NoError);
        assert_eq!(nodata.answer_count, 0);
    }

    #[test]
    fn test_truncated_packets() {
        assert_eq!(parse_query(&[]), Err(WireError::Truncated));
        assert_eq!(parse_query(&[0; 11]), Err(WireError::Truncated));

        let packet = build_query(1, "github.com", RecordType::A);
        assert_eq!(
            parse_query(&packet[..packet.len() - 2]),
            Err(WireError::Truncated)
        );
    }

    #[test]
    fn test_response_rejected_as_query() {
        let query = parse_query(&build_query(1, "github.com", RecordType::A)).unwrap();
        let response = build_response(&query, ResponseCode::NoError, &[], 30);
        assert_eq!(parse_query(&response), Err(WireError::NotAQuery));
    }

    #[test]
    fn test_question_count_enforced() {
        let mut packet = build_query(1, "github.com", RecordType::A);
        packet[5] = 2;
        assert_eq!(parse_query(&packet), Err(WireError::QuestionCount(2)));
        packet[5] = 0;
        assert_eq!(parse_query(&packet), Err(WireError::QuestionCount(0)));
    }

    #[test]
    fn test_non_query_opcode() {
        let mut packet = build_query(1, "github.com", RecordType::A);
        // opcode 2 (STATUS)
        packet[2] |= 0x10;
        assert_eq!(parse_query(&packet), Err(WireError::UnsupportedOpcode(2)));
    }

    #[test]
    fn test_compression_pointer_loop() {
        let mut packet = build_query(1, "x", RecordType::A);
        // Replace the name with a pointer to itself.
        packet.truncate(HEADER_LEN);
        packet.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
        assert_eq!(parse_query(&packet), Err(WireError::BadPointer));
    }

    #[test]
    fn test_reserved_label_type() {
        let mut packet = build_query(1, "x", RecordType::A);
        packet[HEADER_LEN] = 0x41;
        assert_eq!(parse_query(&packet), Err(WireError::InvalidLabel));
    }

    #[test]
    fn test_escaped_label_bytes() {
        let mut packet = Vec::new();
        packet.extend_from_slice(&[0, 1, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
        // label "a.b" containing a literal dot, then "com"
        packet.extend_from_slice(&[3, b'a', b'.', b'b', 3, b'c', b'o', b'm', 0, 0, 1, 0, 1]);
        let query = parse_query(&packet).unwrap();
        assert_eq!(query.question.name, "a\\046b.com");
    }

    #[test]
    fn test_error_response_echoes_id() {
        let packet = [0xAB, 0xCD, 0x01, 0x00, 0xFF];
        let response = error_response(&packet, ResponseCode::FormErr).unwrap();
        let header = Header::read(&response).unwrap();
        assert_eq!(header.id, 0xABCD);
        assert!(header.is_response());
        assert!(header.recursion_desired());
        assert_eq!(header.rcode(), ResponseCode::FormErr);
    }

    #[test]
    fn test_error_response_drops_unanswerable() {
        assert!(error_response(&[0x01], ResponseCode::FormErr).is_none());
        // QR bit set: never answer a response.
        assert!(error_response(&[0, 1, 0x80, 0], ResponseCode::FormErr).is_none());
    }

    #[test]
    fn test_record_type_mnemonics() {
        assert_eq!(RecordType::from_mnemonic("a"), Some(RecordType::A));
        assert_eq!(RecordType::from_mnemonic("AAAA"), Some(RecordType::Aaaa));
        assert_eq!(RecordType::from_mnemonic("mx"), Some(RecordType::Other(15)));
        assert_eq!(RecordType::from_mnemonic("TYPE99"), Some(RecordType::Other(99)));
        assert_eq!(RecordType::from_mnemonic("bogus"), None);
        assert_eq!(RecordType::Other(16).to_string(), "TXT");
        assert_eq!(RecordType::Other(99).to_string(), "TYPE99");
        assert_eq!(RecordType::from_mnemonic("svcb"), Some(RecordType::SVCB));
        assert_eq!(RecordType::ANY.to_string(), "ANY");
    }

    #[test]
    fn test_address_carrying_types() {
        assert!(RecordType::A.carries_addresses());
        assert!(RecordType::Aaaa.carries_addresses());
        assert!(RecordType::HTTPS.carries_addresses());
        assert!(RecordType::SVCB.carries_addresses());
        assert!(!RecordType::ANY.carries_addresses());
        assert!(!RecordType::Other(15).carries_addresses());
    }

    #[test]
    fn test_response_record_types_walks_all_sections() {
        let query = parse_query(&build_query(3, "github.com", RecordType::A)).unwrap();
        let mut packet = build_response(
            &query,
            ResponseCode::NoError,
            &["10.100.1.10".parse().unwrap(), "fd00::10".parse().unwrap()],
            30,
        );
        assert_eq!(
            response_record_types(&packet).unwrap(),
            vec![RecordType::A, RecordType::Aaaa]
        );

        // Move the AAAA record into the additional section.
        packet[7] = 1;
        packet[11] = 1;
        assert_eq!(
            response_record_types(&packet).unwrap(),
            vec![RecordType::A, RecordType::Aaaa]
        );

        // Claim a record that is not there.
        packet[9] = 1;
        assert_eq!(response_record_types(&packet), Err(WireError::Truncated));
    }
}
