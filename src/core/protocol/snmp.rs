// src/core/protocol/snmp.rs

//! SNMP v1/v2c message encoding (BER) and a small UDP request client.
//!
//! Only the community-based message format is implemented. Every request is
//! one datagram; responses are matched on request id and stale datagrams are
//! discarded.

use crate::core::errors::UniconError;
use serde_json::{Value, json};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

// Universal and application tags.
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

const MAX_DATAGRAM: usize = 65_507;
/// Upper bound on GETNEXT/GETBULK round trips for one walk.
const MAX_WALK_REQUESTS: usize = 10_000;

/// Protocol versions with a community string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    fn wire(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }

    fn from_wire(v: i64) -> Result<Self, UniconError> {
        match v {
            0 => Ok(SnmpVersion::V1),
            1 => Ok(SnmpVersion::V2c),
            other => Err(UniconError::Protocol(format!(
                "unsupported SNMP message version {other}"
            ))),
        }
    }
}

/// An object identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Appends one arc, e.g. a table row index.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }
}

impl FromStr for Oid {
    type Err = UniconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(UniconError::params("empty OID"));
        }
        let arcs = trimmed
            .split('.')
            .map(|arc| {
                arc.parse::<u32>()
                    .map_err(|_| UniconError::params(format!("invalid OID '{s}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if arcs.len() < 2 || arcs[0] > 2 {
            return Err(UniconError::params(format!("invalid OID '{s}'")));
        }
        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

/// A typed variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// True for the v2c per-varbind exception markers.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SnmpValue::Integer(_) => "Integer",
            SnmpValue::OctetString(_) => "OctetString",
            SnmpValue::Null => "Null",
            SnmpValue::ObjectId(_) => "ObjectIdentifier",
            SnmpValue::IpAddress(_) => "IpAddress",
            SnmpValue::Counter32(_) => "Counter32",
            SnmpValue::Gauge32(_) => "Gauge32",
            SnmpValue::TimeTicks(_) => "TimeTicks",
            SnmpValue::Opaque(_) => "Opaque",
            SnmpValue::Counter64(_) => "Counter64",
            SnmpValue::NoSuchObject => "NoSuchObject",
            SnmpValue::NoSuchInstance => "NoSuchInstance",
            SnmpValue::EndOfMibView => "EndOfMibView",
        }
    }

    /// The caller-facing value: octet strings as text, numbers as numbers,
    /// exceptions as `null`.
    pub fn to_json(&self) -> Value {
        match self {
            SnmpValue::Integer(i) => json!(i),
            SnmpValue::OctetString(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => json!(s),
                Err(_) => json!(hex::encode(bytes)),
            },
            SnmpValue::Opaque(bytes) => json!(hex::encode(bytes)),
            SnmpValue::ObjectId(oid) => json!(oid.to_string()),
            SnmpValue::IpAddress(ip) => json!(format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => json!(v),
            SnmpValue::Counter64(v) => json!(v),
            SnmpValue::Null
            | SnmpValue::NoSuchObject
            | SnmpValue::NoSuchInstance
            | SnmpValue::EndOfMibView => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn null(oid: Oid) -> Self {
        Self {
            oid,
            value: SnmpValue::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Get,
    GetNext,
    Response,
    Set,
    GetBulk,
}

impl PduType {
    fn tag(self) -> u8 {
        match self {
            PduType::Get => 0xA0,
            PduType::GetNext => 0xA1,
            PduType::Response => 0xA2,
            PduType::Set => 0xA3,
            PduType::GetBulk => 0xA5,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, UniconError> {
        match tag {
            0xA0 => Ok(PduType::Get),
            0xA1 => Ok(PduType::GetNext),
            0xA2 => Ok(PduType::Response),
            0xA3 => Ok(PduType::Set),
            0xA5 => Ok(PduType::GetBulk),
            other => Err(UniconError::Protocol(format!(
                "unsupported SNMP PDU type 0x{other:02X}"
            ))),
        }
    }
}

/// A PDU. For GETBULK the two status fields carry non-repeaters and
/// max-repetitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    pub fn new(pdu_type: PduType, request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }
}

/// A community-based message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: SnmpVersion,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

/// The symbolic name of an error-status value.
pub fn error_status_name(status: i64) -> &'static str {
    match status {
        0 => "noError",
        1 => "tooBig",
        2 => "noSuchName",
        3 => "badValue",
        4 => "readOnly",
        5 => "genErr",
        6 => "noAccess",
        7 => "wrongType",
        8 => "wrongLength",
        9 => "wrongEncoding",
        10 => "wrongValue",
        11 => "noCreation",
        12 => "inconsistentValue",
        13 => "resourceUnavailable",
        14 => "commitFailed",
        15 => "undoFailed",
        16 => "authorizationError",
        17 => "notWritable",
        18 => "inconsistentName",
        _ => "unknownError",
    }
}

// --- Encoding ------------------------------------------------------------

fn put_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn put_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    put_length(out, content.len());
    out.extend_from_slice(content);
}

fn signed_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Drop redundant sign-extension bytes.
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

fn unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    let mut content = bytes[skip..].to_vec();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    content
}

fn oid_content(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let mut out = Vec::with_capacity(arcs.len() + 1);
    let mut push_base128 = |mut v: u32, out: &mut Vec<u8>| {
        let mut tmp = [0u8; 5];
        let mut i = tmp.len();
        loop {
            i -= 1;
            tmp[i] = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                break;
            }
        }
        let last = tmp.len() - 1;
        for (j, b) in tmp.iter().enumerate().skip(i) {
            out.push(if j == last { *b } else { *b | 0x80 });
        }
    };
    push_base128(arcs[0] * 40 + arcs[1], &mut out);
    for arc in &arcs[2..] {
        push_base128(*arc, &mut out);
    }
    out
}

fn encode_value(out: &mut Vec<u8>, value: &SnmpValue) {
    match value {
        SnmpValue::Integer(i) => put_tlv(out, TAG_INTEGER, &signed_content(*i)),
        SnmpValue::OctetString(b) => put_tlv(out, TAG_OCTET_STRING, b),
        SnmpValue::Null => put_tlv(out, TAG_NULL, &[]),
        SnmpValue::ObjectId(oid) => put_tlv(out, TAG_OID, &oid_content(oid)),
        SnmpValue::IpAddress(ip) => put_tlv(out, TAG_IP_ADDRESS, ip),
        SnmpValue::Counter32(v) => put_tlv(out, TAG_COUNTER32, &unsigned_content(*v as u64)),
        SnmpValue::Gauge32(v) => put_tlv(out, TAG_GAUGE32, &unsigned_content(*v as u64)),
        SnmpValue::TimeTicks(v) => put_tlv(out, TAG_TIMETICKS, &unsigned_content(*v as u64)),
        SnmpValue::Opaque(b) => put_tlv(out, TAG_OPAQUE, b),
        SnmpValue::Counter64(v) => put_tlv(out, TAG_COUNTER64, &unsigned_content(*v)),
        SnmpValue::NoSuchObject => put_tlv(out, TAG_NO_SUCH_OBJECT, &[]),
        SnmpValue::NoSuchInstance => put_tlv(out, TAG_NO_SUCH_INSTANCE, &[]),
        SnmpValue::EndOfMibView => put_tlv(out, TAG_END_OF_MIB_VIEW, &[]),
    }
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut varbinds = Vec::new();
        for vb in &self.pdu.varbinds {
            let mut entry = Vec::new();
            put_tlv(&mut entry, TAG_OID, &oid_content(&vb.oid));
            encode_value(&mut entry, &vb.value);
            put_tlv(&mut varbinds, TAG_SEQUENCE, &entry);
        }

        let mut pdu = Vec::new();
        put_tlv(&mut pdu, TAG_INTEGER, &signed_content(self.pdu.request_id as i64));
        put_tlv(&mut pdu, TAG_INTEGER, &signed_content(self.pdu.error_status));
        put_tlv(&mut pdu, TAG_INTEGER, &signed_content(self.pdu.error_index));
        put_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

        let mut body = Vec::new();
        put_tlv(&mut body, TAG_INTEGER, &signed_content(self.version.wire()));
        put_tlv(&mut body, TAG_OCTET_STRING, &self.community);
        put_tlv(&mut body, self.pdu.pdu_type.tag(), &pdu);

        let mut out = Vec::with_capacity(body.len() + 4);
        put_tlv(&mut out, TAG_SEQUENCE, &body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Message, UniconError> {
        let mut input = bytes;
        let mut body = expect_tlv(&mut input, TAG_SEQUENCE)?;
        let version = SnmpVersion::from_wire(parse_signed(expect_tlv(&mut body, TAG_INTEGER)?)?)?;
        let community = expect_tlv(&mut body, TAG_OCTET_STRING)?.to_vec();
        let (tag, mut pdu_body) = read_tlv(&mut body)?;
        let pdu_type = PduType::from_tag(tag)?;

        let request_id = parse_signed(expect_tlv(&mut pdu_body, TAG_INTEGER)?)? as i32;
        let error_status = parse_signed(expect_tlv(&mut pdu_body, TAG_INTEGER)?)?;
        let error_index = parse_signed(expect_tlv(&mut pdu_body, TAG_INTEGER)?)?;
        let mut list = expect_tlv(&mut pdu_body, TAG_SEQUENCE)?;

        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut entry = expect_tlv(&mut list, TAG_SEQUENCE)?;
            let oid = parse_oid(expect_tlv(&mut entry, TAG_OID)?)?;
            let (tag, content) = read_tlv(&mut entry)?;
            varbinds.push(VarBind {
                oid,
                value: decode_value(tag, content)?,
            });
        }

        Ok(Message {
            version,
            community,
            pdu: Pdu {
                pdu_type,
                request_id,
                error_status,
                error_index,
                varbinds,
            },
        })
    }
}

// --- Decoding ------------------------------------------------------------

fn truncated() -> UniconError {
    UniconError::Protocol("truncated SNMP message".into())
}

fn read_tlv<'a>(input: &mut &'a [u8]) -> Result<(u8, &'a [u8]), UniconError> {
    let bytes = *input;
    if bytes.len() < 2 {
        return Err(truncated());
    }
    let tag = bytes[0];
    let first = bytes[1];
    let mut offset = 2;
    let len = if first & 0x80 == 0 {
        first as usize
    } else {
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 || bytes.len() < offset + count {
            return Err(UniconError::Protocol("invalid BER length".into()));
        }
        let mut len = 0usize;
        for b in &bytes[offset..offset + count] {
            len = (len << 8) | *b as usize;
        }
        offset += count;
        len
    };
    if bytes.len() < offset + len {
        return Err(truncated());
    }
    let content = &bytes[offset..offset + len];
    *input = &bytes[offset + len..];
    Ok((tag, content))
}

fn expect_tlv<'a>(input: &mut &'a [u8], expected: u8) -> Result<&'a [u8], UniconError> {
    let (tag, content) = read_tlv(input)?;
    if tag != expected {
        return Err(UniconError::Protocol(format!(
            "expected BER tag 0x{expected:02X}, found 0x{tag:02X}"
        )));
    }
    Ok(content)
}

fn parse_signed(content: &[u8]) -> Result<i64, UniconError> {
    if content.is_empty() || content.len() > 8 {
        return Err(UniconError::Protocol("invalid INTEGER length".into()));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

fn parse_unsigned(content: &[u8]) -> Result<u64, UniconError> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.len() > 8 {
        return Err(UniconError::Protocol("unsigned value too long".into()));
    }
    Ok(content.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn parse_oid(content: &[u8]) -> Result<Oid, UniconError> {
    if content.is_empty() {
        return Err(UniconError::Protocol("empty OID".into()));
    }
    let mut subids = Vec::new();
    let mut current: u64 = 0;
    for b in content {
        current = (current << 7) | (*b & 0x7F) as u64;
        if current > u32::MAX as u64 {
            return Err(UniconError::Protocol("OID arc overflow".into()));
        }
        if b & 0x80 == 0 {
            subids.push(current as u32);
            current = 0;
        }
    }
    let first = subids[0];
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut arcs = vec![a, b];
    arcs.extend_from_slice(&subids[1..]);
    Ok(Oid(arcs))
}

fn decode_value(tag: u8, content: &[u8]) -> Result<SnmpValue, UniconError> {
    Ok(match tag {
        TAG_INTEGER => SnmpValue::Integer(parse_signed(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => SnmpValue::ObjectId(parse_oid(content)?),
        TAG_IP_ADDRESS => {
            let ip: [u8; 4] = content
                .try_into()
                .map_err(|_| UniconError::Protocol("IpAddress must be 4 bytes".into()))?;
            SnmpValue::IpAddress(ip)
        }
        TAG_COUNTER32 => SnmpValue::Counter32(parse_unsigned(content)? as u32),
        TAG_GAUGE32 => SnmpValue::Gauge32(parse_unsigned(content)? as u32),
        TAG_TIMETICKS => SnmpValue::TimeTicks(parse_unsigned(content)? as u32),
        TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        TAG_COUNTER64 => SnmpValue::Counter64(parse_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => {
            return Err(UniconError::Protocol(format!(
                "unsupported SNMP value type 0x{other:02X}"
            )));
        }
    })
}

// --- Client --------------------------------------------------------------

/// Agent address and session options.
#[derive(Debug, Clone)]
pub struct SnmpTarget {
    pub host: String,
    pub port: u16,
    pub version: SnmpVersion,
    pub community: String,
    pub timeout: Duration,
    pub retries: u32,
}

/// A request/response session with one agent.
#[derive(Debug)]
pub struct SnmpClient {
    socket: UdpSocket,
    peer: SocketAddr,
    target: SnmpTarget,
    next_request_id: i32,
}

impl SnmpClient {
    /// Resolves the agent and binds a local socket. No traffic is sent.
    pub async fn open(target: SnmpTarget) -> Result<Self, UniconError> {
        let peer = tokio::net::lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|e| UniconError::transport(format!("getaddrinfo ENOTFOUND {}: {e}", target.host)))?
            .next()
            .ok_or_else(|| {
                UniconError::transport(format!("getaddrinfo ENOTFOUND {}", target.host))
            })?;
        let bind: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self {
            socket,
            peer,
            target,
            next_request_id: rand::random::<i32>().wrapping_abs().max(1),
        })
    }

    pub fn version(&self) -> SnmpVersion {
        self.target.version
    }

    fn request_id(&mut self) -> i32 {
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        self.next_request_id
    }

    /// Sends `pdu` and waits for the matching response, retrying on timeout.
    pub async fn request(&mut self, pdu_type: PduType, mut pdu: Pdu) -> Result<Pdu, UniconError> {
        pdu.pdu_type = pdu_type;
        pdu.request_id = self.request_id();
        let message = Message {
            version: self.target.version,
            community: self.target.community.as_bytes().to_vec(),
            pdu,
        };
        let datagram = message.encode();
        let request_id = message.pdu.request_id;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        for attempt in 0..=self.target.retries {
            if attempt > 0 {
                debug!("SNMP request {} retry {}", request_id, attempt);
            }
            self.socket.send_to(&datagram, self.peer).await?;
            let deadline = tokio::time::Instant::now() + self.target.timeout;
            loop {
                let recv = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await;
                let (len, from) = match recv {
                    Err(_) => break,
                    Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                        return Err(UniconError::transport(format!(
                            "connect ECONNREFUSED {}",
                            self.peer
                        )));
                    }
                    Ok(result) => result?,
                };
                if from.ip() != self.peer.ip() {
                    continue;
                }
                let response = match Message::decode(&buf[..len]) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Discarding undecodable SNMP datagram: {}", e);
                        continue;
                    }
                };
                if response.pdu.request_id != request_id
                    || response.pdu.pdu_type != PduType::Response
                {
                    continue;
                }
                return check_status(response.pdu);
            }
        }
        Err(UniconError::Timeout(format!(
            "SNMP request timed out after {} ms ({} attempts) to {}",
            self.target.timeout.as_millis(),
            self.target.retries + 1,
            self.peer
        )))
    }

    pub async fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, UniconError> {
        let varbinds = oids.iter().cloned().map(VarBind::null).collect();
        let pdu = self.request(PduType::Get, Pdu::new(PduType::Get, 0, varbinds)).await?;
        Ok(pdu.varbinds)
    }

    pub async fn get_next(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, UniconError> {
        let varbinds = oids.iter().cloned().map(VarBind::null).collect();
        let pdu = self
            .request(PduType::GetNext, Pdu::new(PduType::GetNext, 0, varbinds))
            .await?;
        Ok(pdu.varbinds)
    }

    pub async fn get_bulk(
        &mut self,
        oids: &[Oid],
        non_repeaters: i64,
        max_repetitions: i64,
    ) -> Result<Vec<VarBind>, UniconError> {
        let mut pdu = Pdu::new(
            PduType::GetBulk,
            0,
            oids.iter().cloned().map(VarBind::null).collect(),
        );
        pdu.error_status = non_repeaters;
        pdu.error_index = max_repetitions;
        Ok(self.request(PduType::GetBulk, pdu).await?.varbinds)
    }

    pub async fn set(&mut self, varbinds: Vec<VarBind>) -> Result<Vec<VarBind>, UniconError> {
        let pdu = self.request(PduType::Set, Pdu::new(PduType::Set, 0, varbinds)).await?;
        Ok(pdu.varbinds)
    }

    /// Walks the subtree under `base`, GETBULK for v2c and GETNEXT for v1.
    pub async fn walk(&mut self, base: &Oid, max_repetitions: i64) -> Result<Vec<VarBind>, UniconError> {
        let mut rows = Vec::new();
        let mut cursor = base.clone();
        for _ in 0..MAX_WALK_REQUESTS {
            let batch = match self.target.version {
                SnmpVersion::V2c => self.get_bulk(&[cursor.clone()], 0, max_repetitions).await?,
                SnmpVersion::V1 => match self.get_next(&[cursor.clone()]).await {
                    Ok(batch) => batch,
                    // v1 agents signal the end of the MIB with noSuchName.
                    Err(UniconError::Remote { detail, .. })
                        if detail.get("errorStatus") == Some(&json!(2)) =>
                    {
                        return Ok(rows);
                    }
                    Err(e) => return Err(e),
                },
            };
            if batch.is_empty() {
                return Ok(rows);
            }
            for vb in batch {
                if vb.value == SnmpValue::EndOfMibView || !vb.oid.starts_with(base) {
                    return Ok(rows);
                }
                if vb.oid <= cursor {
                    return Err(UniconError::Protocol(format!(
                        "agent returned non-increasing OID {} after {}",
                        vb.oid, cursor
                    )));
                }
                cursor = vb.oid.clone();
                rows.push(vb);
            }
        }
        Ok(rows)
    }
}

fn check_status(pdu: Pdu) -> Result<Pdu, UniconError> {
    if pdu.error_status == 0 {
        return Ok(pdu);
    }
    let name = error_status_name(pdu.error_status);
    let failed_oid = usize::try_from(pdu.error_index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| pdu.varbinds.get(i))
        .map(|vb| vb.oid.to_string());
    Err(UniconError::Remote {
        message: match &failed_oid {
            Some(oid) => format!("SNMP error {name} ({}) at {oid}", pdu.error_status),
            None => format!("SNMP error {name} ({})", pdu.error_status),
        },
        detail: json!({
            "errorStatus": pdu.error_status,
            "errorName": name,
            "errorIndex": pdu.error_index,
            "oid": failed_oid,
        }),
    })
}
