//! Wire-level types shared by the decoder, the record table and the response builder.

use std::fmt;

pub const HEADER_LEN: usize = 12;
/// Largest datagram accepted from the network (RFC 1035 UDP limit).
pub const MAX_PACK_LEN: usize = 512;
pub const DEFAULT_TTL: u32 = 120;
pub const CLASS_IN: u16 = 1;
pub const MAX_LABEL_LEN: usize = 63;
/// Largest encoded name, length octets and terminator included.
pub const MAX_NAME_LEN: usize = 255;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const MASK_OPCODE: u16 = 0x7800;
const MASK_Z: u16 = 0x0070;
const MASK_RCODE: u16 = 0x000F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RecordType {
    A = 1,
    Ptr = 12,
}

impl RecordType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(RecordType::A),
            12 => Some(RecordType::Ptr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Ptr => "PTR",
        }
    }
}

/// Response codes this server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Rcode {
    NoError = 0,
    FormErr = 1,
    NxDomain = 3,
    NotImp = 4,
}

impl Rcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rcode::NoError => "NOERROR",
            Rcode::FormErr => "FORMERR",
            Rcode::NxDomain => "NXDOMAIN",
            Rcode::NotImp => "NOTIMP",
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
}

impl HeaderFlags {
    pub fn from_u16(raw: u16) -> Self {
        Self {
            qr: raw & FLAG_QR != 0,
            opcode: ((raw & MASK_OPCODE) >> 11) as u8,
            aa: raw & FLAG_AA != 0,
            tc: raw & FLAG_TC != 0,
            rd: raw & FLAG_RD != 0,
            ra: raw & FLAG_RA != 0,
            z: ((raw & MASK_Z) >> 4) as u8,
            rcode: (raw & MASK_RCODE) as u8,
        }
    }

    pub fn to_u16(&self) -> u16 {
        let mut raw = 0u16;
        if self.qr { raw |= FLAG_QR; }
        raw |= (u16::from(self.opcode) << 11) & MASK_OPCODE;
        if self.aa { raw |= FLAG_AA; }
        if self.tc { raw |= FLAG_TC; }
        if self.rd { raw |= FLAG_RD; }
        if self.ra { raw |= FLAG_RA; }
        raw |= (u16::from(self.z) << 4) & MASK_Z;
        raw |= u16::from(self.rcode) & MASK_RCODE;
        raw
    }
}

/// The fixed 12-byte message header. All fields are big-endian on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: HeaderFlags,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl DnsHeader {
    /// Returns `None` when fewer than [`HEADER_LEN`] bytes are available.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < HEADER_LEN {
            return None;
        }
        let be16 = |at: usize| u16::from_be_bytes([packet[at], packet[at + 1]]);
        Some(Self {
            id: be16(0),
            flags: HeaderFlags::from_u16(be16(2)),
            question_count: be16(4),
            answer_count: be16(6),
            authority_count: be16(8),
            additional_count: be16(10),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.id.to_be_bytes());
        out[2..4].copy_from_slice(&self.flags.to_u16().to_be_bytes());
        out[4..6].copy_from_slice(&self.question_count.to_be_bytes());
        out[6..8].copy_from_slice(&self.answer_count.to_be_bytes());
        out[8..10].copy_from_slice(&self.authority_count.to_be_bytes());
        out[10..12].copy_from_slice(&self.additional_count.to_be_bytes());
        out
    }
}

/// Validated query handed from the decoder to the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDescriptor<'a> {
    pub header: DnsHeader,
    /// Label-encoded name including the terminating zero octet.
    pub name: &'a [u8],
    pub record_type: RecordType,
    pub class: u16,
    /// Offset one past the question's class field.
    pub question_end: usize,
}

/// RDATA produced by a successful table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer<'a> {
    /// Address octets in network order.
    Address([u8; 4]),
    /// Label-encoded host name including its terminator.
    Name(&'a [u8]),
}

impl Answer<'_> {
    pub fn rdata(&self) -> &[u8] {
        match self {
            Answer::Address(octets) => octets,
            Answer::Name(name) => name,
        }
    }
}

/// Why a datagram produced no response at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoQuestions,
    ResponsePacket,
    TruncatedQuestion,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NoQuestions => "no_questions",
            DropReason::ResponsePacket => "response_packet",
            DropReason::TruncatedQuestion => "truncated_question",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoQuestions => f.write_str("packet has 0 queries"),
            DropReason::ResponsePacket => f.write_str("response packet"),
            DropReason::TruncatedQuestion => f.write_str("question section truncated"),
        }
    }
}

/// Final outcome for one datagram, consumed by the response builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition<'a> {
    Drop(DropReason),
    FormatError,
    NotImplemented,
    NameError,
    Success(Answer<'a>),
}

impl Disposition<'_> {
    /// RCODE written into the response, `None` for a drop.
    pub fn rcode(&self) -> Option<Rcode> {
        match self {
            Disposition::Drop(_) => None,
            Disposition::FormatError => Some(Rcode::FormErr),
            Disposition::NotImplemented => Some(Rcode::NotImp),
            Disposition::NameError => Some(Rcode::NxDomain),
            Disposition::Success(_) => Some(Rcode::NoError),
        }
    }
}
