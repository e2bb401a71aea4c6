//! RFC 1035 label encoding for names stored in the record table, plus the
//! helpers the decoder uses to check and print names taken off the wire.

use crate::types::{MAX_LABEL_LEN, MAX_NAME_LEN};
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("empty label")]
    EmptyLabel,
    #[error("label of {0} octets exceeds 63")]
    LabelTooLong(usize),
    #[error("encoded name of {0} octets exceeds 255")]
    NameTooLong(usize),
    #[error("label at offset {0} runs past the end of the name")]
    Overrun(usize),
    #[error("name is not terminated by a zero octet")]
    Unterminated,
}

/// Encodes `www.example.com` as `\x03www\x07example\x03com\x00`.
///
/// A single trailing dot is accepted. Empty labels and labels longer than 63
/// octets are rejected rather than producing an ambiguous length octet.
pub fn encode_dotted(name: &str) -> Result<Vec<u8>, LabelError> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut out = Vec::with_capacity(name.len() + 2);
    push_labels(&mut out, name.split('.'))?;
    out.push(0);
    if out.len() > MAX_NAME_LEN {
        return Err(LabelError::NameTooLong(out.len()));
    }
    Ok(out)
}

/// Encodes the reversed-octet form of `addr` used to match PTR queries:
/// `1.2.3.4` becomes the labels `4.3.2.1`.
///
/// The result carries neither the `in-addr.arpa` suffix nor a terminator, so it
/// is meant to be compared as a prefix of the query name.
pub fn encode_reversed_ip(addr: Ipv4Addr) -> Vec<u8> {
    let [a, b, c, d] = addr.octets();
    let quads = [d, c, b, a].map(|octet| octet.to_string());
    let mut out = Vec::with_capacity(16);
    // decimal octets are never empty nor longer than three characters
    for quad in &quads {
        out.push(quad.len() as u8);
        out.extend_from_slice(quad.as_bytes());
    }
    out
}

fn push_labels<'a>(out: &mut Vec<u8>, labels: impl Iterator<Item = &'a str>) -> Result<(), LabelError> {
    for label in labels {
        if label.is_empty() {
            return Err(LabelError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(LabelError::LabelTooLong(label.len()));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    Ok(())
}

/// Iterates over the labels of an encoded name, stopping at the terminator.
pub struct Labels<'a> {
    name: &'a [u8],
    pos: usize,
    done: bool,
}

pub fn labels(name: &[u8]) -> Labels<'_> {
    Labels { name, pos: 0, done: false }
}

impl<'a> Iterator for Labels<'a> {
    type Item = Result<&'a [u8], LabelError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(&len) = self.name.get(self.pos) else {
            self.done = true;
            return Some(Err(LabelError::Unterminated));
        };
        let len = len as usize;
        if len == 0 {
            self.done = true;
            return None;
        }
        if len > MAX_LABEL_LEN {
            self.done = true;
            return Some(Err(LabelError::LabelTooLong(len)));
        }
        let start = self.pos + 1;
        let end = start + len;
        if end > self.name.len() {
            self.done = true;
            return Some(Err(LabelError::Overrun(self.pos)));
        }
        self.pos = end;
        Some(Ok(&self.name[start..end]))
    }
}

/// Checks that `name` is a sequence of labels of at most 63 octets that ends
/// exactly with its zero terminator.
pub fn validate_wire_name(name: &[u8]) -> Result<(), LabelError> {
    let mut consumed = 0;
    for label in labels(name) {
        consumed += label?.len() + 1;
    }
    if consumed + 1 != name.len() {
        return Err(LabelError::Overrun(consumed));
    }
    Ok(())
}

/// Renders an encoded name as dotted text for diagnostics.
pub fn to_dotted(name: &[u8]) -> String {
    let mut out = String::new();
    for label in labels(name) {
        if !out.is_empty() {
            out.push('.');
        }
        match label {
            Ok(label) => out.push_str(&String::from_utf8_lossy(label)),
            Err(_) => {
                out.push_str("<malformed>");
                break;
            }
        }
    }
    if out.is_empty() {
        out.push('.');
    }
    out
}
