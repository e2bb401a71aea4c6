//! Background services running alongside the UDP listener.

pub mod metrics;
pub mod reload;
