//! dnsd - a small DNS server answering A and PTR queries from a static table

pub mod config;
pub mod decoder;
pub mod dns_server;
pub mod label;
#[cfg(target_os = "linux")]
pub mod pktinfo;
pub mod response;
pub mod service;
pub mod table;
pub mod types;
