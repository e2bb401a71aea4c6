//! Turns an inbound datagram into a validated query or a rejection.
//!
//! The decoder only reads the packet. Its result tells the caller whether to
//! stay silent, answer with an error code, or go on to the record table.

use crate::label;
use crate::types::{DnsHeader, DropReason, QueryDescriptor, Rcode, RecordType, CLASS_IN, HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// Send nothing back.
    Drop(DropReason),
    /// Echo the question with the given RCODE and no answer.
    Reject { question_end: usize, rcode: Rcode },
    /// Well-formed A or PTR query ready for lookup.
    Query(QueryDescriptor<'a>),
}

/// `packet` is expected to be between 12 and 512 bytes; shorter input is
/// dropped as a truncated question.
pub fn decode(packet: &[u8]) -> Decoded<'_> {
    let Some(header) = DnsHeader::parse(packet) else {
        return Decoded::Drop(DropReason::TruncatedQuestion);
    };
    if header.question_count == 0 {
        return Decoded::Drop(DropReason::NoQuestions);
    }
    if header.flags.qr {
        return Decoded::Drop(DropReason::ResponsePacket);
    }

    // the name runs up to the first zero octet after the header
    let Some(nul) = packet[HEADER_LEN..].iter().position(|&b| b == 0) else {
        return Decoded::Drop(DropReason::TruncatedQuestion);
    };
    let name_end = HEADER_LEN + nul + 1;
    let question_end = name_end + 4;
    let Some(props) = packet.get(name_end..question_end) else {
        return Decoded::Drop(DropReason::TruncatedQuestion);
    };
    // type and class sit at an arbitrary offset, compose them byte by byte
    let qtype = u16::from_be_bytes([props[0], props[1]]);
    let class = u16::from_be_bytes([props[2], props[3]]);

    let Some(record_type) = RecordType::from_u16(qtype) else {
        return Decoded::Reject { question_end, rcode: Rcode::NotImp };
    };
    if class != CLASS_IN || header.flags.opcode != 0 {
        return Decoded::Reject { question_end, rcode: Rcode::NotImp };
    }

    let name = &packet[HEADER_LEN..name_end];
    if let Err(e) = label::validate_wire_name(name) {
        tracing::debug!("malformed query name: {}", e);
        return Decoded::Reject { question_end, rcode: Rcode::FormErr };
    }

    Decoded::Query(QueryDescriptor { header, name, record_type, class, question_end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::encode_dotted;

    fn build_query(flags: u16, qdcount: u16, name: &[u8], qtype: u16, class: u16) -> Vec<u8> {
        let mut packet = vec![0xAB, 0xCD];
        packet.extend_from_slice(&flags.to_be_bytes());
        packet.extend_from_slice(&qdcount.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        packet.extend_from_slice(name);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&class.to_be_bytes());
        packet
    }

    #[test]
    fn test_decode_a_query() {
        let name = encode_dotted("www.example.com").unwrap();
        let packet = build_query(0x0100, 1, &name, 1, 1);
        match decode(&packet) {
            Decoded::Query(query) => {
                assert_eq!(query.header.id, 0xABCD);
                assert!(query.header.flags.rd);
                assert_eq!(query.name, name.as_slice());
                assert_eq!(query.record_type, RecordType::A);
                assert_eq!(query.class, CLASS_IN);
                assert_eq!(query.question_end, packet.len());
            }
            other => panic!("Expected query, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_ptr_query() {
        let name = encode_dotted("5.0.0.10.in-addr.arpa").unwrap();
        let packet = build_query(0, 1, &name, 12, 1);
        assert!(matches!(decode(&packet), Decoded::Query(q) if q.record_type == RecordType::Ptr));
    }

    #[test]
    fn test_zero_questions_dropped() {
        let packet = build_query(0, 0, &encode_dotted("a.b").unwrap(), 1, 1);
        assert_eq!(decode(&packet), Decoded::Drop(DropReason::NoQuestions));
    }

    #[test]
    fn test_response_packets_dropped() {
        let name = encode_dotted("www.example.com").unwrap();
        for flags in [0x8000, 0x8180, 0x8403, 0xFFFF] {
            let packet = build_query(flags, 1, &name, 1, 1);
            assert_eq!(decode(&packet), Decoded::Drop(DropReason::ResponsePacket));
        }
    }

    #[test]
    fn test_truncated_question_dropped() {
        let mut packet = build_query(0, 1, &encode_dotted("a.b").unwrap(), 1, 1);
        packet.truncate(packet.len() - 1);
        assert_eq!(decode(&packet), Decoded::Drop(DropReason::TruncatedQuestion));

        let mut no_terminator = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        no_terminator.extend_from_slice(&[3, b'a', b'b', b'c']);
        assert_eq!(decode(&no_terminator), Decoded::Drop(DropReason::TruncatedQuestion));
    }

    #[test]
    fn test_unsupported_type_class_opcode() {
        let name = encode_dotted("www.example.com").unwrap();
        let expected_end = HEADER_LEN + name.len() + 4;
        let not_imp = Decoded::Reject { question_end: expected_end, rcode: Rcode::NotImp };

        // MX
        assert_eq!(decode(&build_query(0, 1, &name, 15, 1)), not_imp);
        // CHAOS class
        assert_eq!(decode(&build_query(0, 1, &name, 1, 3)), not_imp);
        // opcode 2 (STATUS)
        assert_eq!(decode(&build_query(0x1000, 1, &name, 1, 1)), not_imp);
    }

    #[test]
    fn test_malformed_name_is_format_error() {
        // a compression pointer in the question name
        let name = [0xC0, 0x0C, 0];
        let packet = build_query(0, 1, &name, 1, 1);
        assert_eq!(
            decode(&packet),
            Decoded::Reject { question_end: HEADER_LEN + 3 + 4, rcode: Rcode::FormErr }
        );
    }

    #[test]
    fn test_trailing_sections_ignored() {
        let name = encode_dotted("www.example.com").unwrap();
        let mut packet = build_query(0, 1, &name, 1, 1);
        let question_end = packet.len();
        packet.extend_from_slice(&[0, 0, 41, 0x10, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(decode(&packet), Decoded::Query(q) if q.question_end == question_end));
    }
}
