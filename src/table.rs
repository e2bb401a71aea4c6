//! The ordered name/address table answering A and PTR lookups.

use crate::label::{self, LabelError};
use crate::types::{Answer, RecordType};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    name: Vec<u8>,
    address: Ipv4Addr,
    reversed_name: Vec<u8>,
}

impl ResourceRecord {
    pub fn new(name: &str, address: Ipv4Addr) -> Result<Self, LabelError> {
        Ok(Self {
            name: label::encode_dotted(name)?,
            address,
            reversed_name: label::encode_reversed_ip(address),
        })
    }

    /// Label-encoded host name, terminator included.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Reversed-octet labels without suffix or terminator.
    pub fn reversed_name(&self) -> &[u8] {
        &self.reversed_name
    }

    /// True when the first label is the single character `*`.
    pub fn is_wildcard(&self) -> bool {
        self.name.starts_with(&[1, b'*'])
    }

    fn matches(&self, record_type: RecordType, query_name: &[u8]) -> bool {
        if self.is_wildcard() {
            return true;
        }
        match record_type {
            RecordType::A => self.name.eq_ignore_ascii_case(query_name),
            // the in-addr.arpa suffix of the query is assumed, not checked
            RecordType::Ptr => query_name.starts_with(&self.reversed_name),
        }
    }

    fn answer(&self, record_type: RecordType) -> Answer<'_> {
        match record_type {
            RecordType::A => Answer::Address(self.address.octets()),
            RecordType::Ptr => Answer::Name(&self.name),
        }
    }
}

/// Records in file order. The first entry matching a query wins, wildcards
/// included, so an early `*` shadows every later entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTable {
    records: Vec<ResourceRecord>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ResourceRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.iter()
    }

    /// `query_name` is the label-encoded name from the question, terminator
    /// included. Returns `None` when nothing matches.
    pub fn lookup(&self, record_type: RecordType, query_name: &[u8]) -> Option<Answer<'_>> {
        self.records
            .iter()
            .find(|record| record.matches(record_type, query_name))
            .map(|record| record.answer(record_type))
    }
}

impl FromIterator<ResourceRecord> for RecordTable {
    fn from_iter<I: IntoIterator<Item = ResourceRecord>>(iter: I) -> Self {
        Self { records: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::encode_dotted;

    fn record(name: &str, addr: [u8; 4]) -> ResourceRecord {
        ResourceRecord::new(name, Ipv4Addr::from(addr)).unwrap()
    }

    fn ptr_query(reversed: &str) -> Vec<u8> {
        encode_dotted(&format!("{reversed}.in-addr.arpa")).unwrap()
    }

    #[test]
    fn test_a_lookup_exact_names() {
        let table: RecordTable = [
            record("www.example.com", [10, 0, 0, 5]),
            record("mail.example.com", [10, 0, 0, 6]),
        ]
        .into_iter()
        .collect();

        let answer = table.lookup(RecordType::A, &encode_dotted("mail.example.com").unwrap());
        assert_eq!(answer, Some(Answer::Address([10, 0, 0, 6])));
        let answer = table.lookup(RecordType::A, &encode_dotted("www.example.com").unwrap());
        assert_eq!(answer, Some(Answer::Address([10, 0, 0, 5])));
    }

    #[test]
    fn test_a_lookup_is_case_insensitive() {
        let table: RecordTable = [record("WWW.Example.com", [1, 2, 3, 4])].into_iter().collect();
        let answer = table.lookup(RecordType::A, &encode_dotted("www.EXAMPLE.COM").unwrap());
        assert_eq!(answer, Some(Answer::Address([1, 2, 3, 4])));
    }

    #[test]
    fn test_a_lookup_miss() {
        let table: RecordTable = [record("www.example.com", [10, 0, 0, 5])].into_iter().collect();
        assert_eq!(table.lookup(RecordType::A, &encode_dotted("missing.example.com").unwrap()), None);
        // a suffix of a stored name is not a match
        assert_eq!(table.lookup(RecordType::A, &encode_dotted("example.com").unwrap()), None);
    }

    #[test]
    fn test_ptr_lookup_by_reversed_prefix() {
        let table: RecordTable = [
            record("www.example.com", [10, 0, 0, 5]),
            record("db.example.com", [10, 0, 0, 50]),
        ]
        .into_iter()
        .collect();

        let www = encode_dotted("www.example.com").unwrap();
        let db = encode_dotted("db.example.com").unwrap();
        assert_eq!(table.lookup(RecordType::Ptr, &ptr_query("5.0.0.10")), Some(Answer::Name(&www)));
        assert_eq!(table.lookup(RecordType::Ptr, &ptr_query("50.0.0.10")), Some(Answer::Name(&db)));
        assert_eq!(table.lookup(RecordType::Ptr, &ptr_query("6.0.0.10")), None);
    }

    #[test]
    fn test_wildcard_answers_unmatched_queries() {
        let table: RecordTable = [
            record("www.example.com", [10, 0, 0, 5]),
            record("*", [127, 0, 0, 1]),
        ]
        .into_iter()
        .collect();

        let answer = table.lookup(RecordType::A, &encode_dotted("www.example.com").unwrap());
        assert_eq!(answer, Some(Answer::Address([10, 0, 0, 5])));
        let answer = table.lookup(RecordType::A, &encode_dotted("anything.test").unwrap());
        assert_eq!(answer, Some(Answer::Address([127, 0, 0, 1])));
        let answer = table.lookup(RecordType::Ptr, &ptr_query("9.9.9.9"));
        assert_eq!(answer, Some(Answer::Name(&[1, b'*', 0])));
    }

    #[test]
    fn test_file_order_beats_specificity() {
        let table: RecordTable = [
            record("*", [127, 0, 0, 1]),
            record("www.example.com", [10, 0, 0, 5]),
        ]
        .into_iter()
        .collect();

        let answer = table.lookup(RecordType::A, &encode_dotted("www.example.com").unwrap());
        assert_eq!(answer, Some(Answer::Address([127, 0, 0, 1])));
    }

    #[test]
    fn test_first_of_duplicate_names_wins() {
        let table: RecordTable = [
            record("dup.example.com", [10, 0, 0, 1]),
            record("dup.example.com", [10, 0, 0, 2]),
        ]
        .into_iter()
        .collect();
        let answer = table.lookup(RecordType::A, &encode_dotted("dup.example.com").unwrap());
        assert_eq!(answer, Some(Answer::Address([10, 0, 0, 1])));
    }

    #[test]
    fn test_wildcard_first_label() {
        assert!(record("*", [1, 1, 1, 1]).is_wildcard());
        assert!(record("*.example.com", [1, 1, 1, 1]).is_wildcard());
        assert!(!record("a*.example.com", [1, 1, 1, 1]).is_wildcard());
        assert!(!record("**", [1, 1, 1, 1]).is_wildcard());
    }

    #[test]
    fn test_empty_table() {
        let table = RecordTable::new();
        assert!(table.is_empty());
        assert_eq!(table.lookup(RecordType::A, &[0]), None);
    }
}
