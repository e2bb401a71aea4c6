//! Runtime settings and the record file reader.
//!
//! The record file holds one `<hostname-or-*> <dotted-ipv4>` pair per line.
//! `#` starts a comment anywhere on a line. Lines that cannot be turned into a
//! record are skipped with a warning and the rest of the file still loads.

use crate::table::{RecordTable, ResourceRecord};
use crate::types::DEFAULT_TTL;
use std::net::Ipv4Addr;

/// Values threaded into the reader and the server instead of global flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// TTL written into every answer record, in seconds.
    pub ttl: u32,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL, verbose: false }
    }
}

pub fn parse_table(content: &str, settings: &Settings) -> RecordTable {
    let mut table = RecordTable::new();
    for (idx, line) in content.lines().enumerate() {
        let lineno = idx + 1;
        let tokens = tokenize(line);
        match tokens.as_slice() {
            [] => continue,
            [name, addr] => {
                let Ok(ip) = addr.parse::<Ipv4Addr>() else {
                    tracing::warn!("error at line {}, skipping", lineno);
                    continue;
                };
                match ResourceRecord::new(name, ip) {
                    Ok(record) => {
                        if settings.verbose {
                            tracing::info!("name:{}, ip:{}", name, ip);
                        }
                        table.push(record);
                    }
                    Err(e) => tracing::warn!("error at line {}: bad name '{}' ({}), skipping", lineno, name, e),
                }
            }
            _ => tracing::warn!("error at line {}: expected 2 fields, found {}, skipping", lineno, tokens.len()),
        }
    }
    table
}

fn tokenize(line: &str) -> Vec<&str> {
    let content = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    content
        .split([' ', '\t', '\r'])
        .filter(|token| !token.is_empty())
        .collect()
}
