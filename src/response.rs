//! Frames the response in a copy of the inbound datagram.
//!
//! The question section is never re-encoded: the header is rewritten in place
//! and the answer's NAME/TYPE/CLASS are appended from the question bytes that
//! already sit in the same buffer.

use crate::types::{DnsHeader, Disposition, Rcode, HEADER_LEN, MAX_NAME_LEN, MAX_PACK_LEN};
use std::ops::Range;
use thiserror::Error;

/// Echoed question twice, TTL, RDLENGTH and the largest possible RDATA.
pub const RESPONSE_CAPACITY: usize = 2 * MAX_PACK_LEN + 4 + 2 + MAX_NAME_LEN + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("response would grow to {needed} bytes, capacity is {capacity}")]
    Capacity { needed: usize, capacity: usize },
    #[error("question ends at {question_end} but the packet has {len} bytes")]
    QuestionOutOfBounds { question_end: usize, len: usize },
    #[error("rdata of {0} bytes does not fit RDLENGTH")]
    RdataTooLong(usize),
}

/// Growable output buffer with a fixed upper bound and checked appends.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl ResponseBuffer {
    /// Starts from `packet[..question_end]`, discarding anything after the question.
    pub fn from_query(packet: &[u8], question_end: usize) -> Result<Self, ResponseError> {
        Self::with_capacity(packet, question_end, RESPONSE_CAPACITY)
    }

    pub fn with_capacity(packet: &[u8], question_end: usize, capacity: usize) -> Result<Self, ResponseError> {
        if question_end < HEADER_LEN || question_end > packet.len() {
            return Err(ResponseError::QuestionOutOfBounds { question_end, len: packet.len() });
        }
        let mut buf = Vec::with_capacity(capacity.max(question_end));
        buf.extend_from_slice(&packet[..question_end]);
        let mut out = Self { buf, capacity };
        out.check_room(0)?;
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn check_room(&self, extra: usize) -> Result<(), ResponseError> {
        let needed = self.buf.len() + extra;
        if needed > self.capacity {
            return Err(ResponseError::Capacity { needed, capacity: self.capacity });
        }
        Ok(())
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), ResponseError> {
        self.check_room(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn append_u16(&mut self, value: u16) -> Result<(), ResponseError> {
        self.append(&value.to_be_bytes())
    }

    pub fn append_u32(&mut self, value: u32) -> Result<(), ResponseError> {
        self.append(&value.to_be_bytes())
    }

    /// Appends a copy of bytes already written to the buffer.
    pub fn append_from_within(&mut self, range: Range<usize>) -> Result<(), ResponseError> {
        if range.start > range.end || range.end > self.buf.len() {
            return Err(ResponseError::QuestionOutOfBounds { question_end: range.end, len: self.buf.len() });
        }
        self.check_room(range.len())?;
        self.buf.extend_from_within(range);
        Ok(())
    }

    pub fn header(&self) -> DnsHeader {
        // from_query guarantees at least HEADER_LEN bytes
        DnsHeader::parse(&self.buf).unwrap_or_default()
    }

    pub fn write_header(&mut self, header: &DnsHeader) {
        self.buf[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    }
}

/// Frames the response for `disposition`. Returns `Ok(None)` for a drop.
///
/// ID, opcode, RD, TC and Z are kept from the query. QR is set, RCODE is
/// replaced, the question count is forced to 1 and the authority and
/// additional counts to 0.
pub fn build_response(
    packet: &[u8],
    question_end: usize,
    disposition: &Disposition<'_>,
    ttl: u32,
) -> Result<Option<Vec<u8>>, ResponseError> {
    let Some(rcode) = disposition.rcode() else {
        return Ok(None);
    };
    let mut out = ResponseBuffer::from_query(packet, question_end)?;

    let mut header = out.header();
    header.flags.qr = true;
    header.flags.aa = matches!(rcode, Rcode::NoError | Rcode::NxDomain);
    header.flags.rcode = rcode as u8;
    header.question_count = 1;
    header.answer_count = 0;
    header.authority_count = 0;
    header.additional_count = 0;

    if let Disposition::Success(answer) = disposition {
        let rdata = answer.rdata();
        let rdlength = u16::try_from(rdata.len()).map_err(|_| ResponseError::RdataTooLong(rdata.len()))?;
        header.answer_count = 1;
        out.append_from_within(HEADER_LEN..question_end)?;
        out.append_u32(ttl)?;
        out.append_u16(rdlength)?;
        out.append(rdata)?;
    }

    out.write_header(&header);
    Ok(Some(out.into_bytes()))
}
