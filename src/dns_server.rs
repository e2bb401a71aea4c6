use crate::config::Settings;
use crate::decoder::{self, Decoded};
use crate::label;
use crate::response;
use crate::service::metrics;
use crate::table::RecordTable;
use crate::types::{Disposition, Rcode, HEADER_LEN, MAX_PACK_LEN};
use anyhow::{Context, Result};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::watch;

#[cfg(target_os = "linux")]
use crate::pktinfo;
#[cfg(target_os = "linux")]
use socket2::{Domain, Protocol, Socket, Type};
#[cfg(target_os = "linux")]
use tokio::io::{unix::AsyncFd, Interest};

/// Decodes one datagram, looks it up and frames the reply.
///
/// Returns `None` when nothing must be sent back.
pub fn process_packet(table: &RecordTable, settings: &Settings, packet: &[u8]) -> Option<Vec<u8>> {
    let started = Instant::now();

    let (question_end, qtype, disposition) = match decoder::decode(packet) {
        Decoded::Drop(reason) => {
            tracing::warn!("{}, ignored", reason);
            metrics::DNS_DROPPED_TOTAL.with_label_values(&[reason.as_str()]).inc();
            return None;
        }
        Decoded::Reject { question_end, rcode } => {
            let disposition = match rcode {
                Rcode::FormErr => Disposition::FormatError,
                _ => Disposition::NotImplemented,
            };
            (question_end, "OTHER", disposition)
        }
        Decoded::Query(query) => {
            let name = label::to_dotted(query.name);
            tracing::info!("{} {}", query.record_type.as_str(), name);
            let disposition = match table.lookup(query.record_type, query.name) {
                Some(answer) => {
                    if settings.verbose {
                        tracing::info!("    |-- matched {} for {}", query.record_type.as_str(), name);
                    }
                    Disposition::Success(answer)
                }
                None => Disposition::NameError,
            };
            (query.question_end, query.record_type.as_str(), disposition)
        }
    };
    metrics::DNS_REQUESTS_TOTAL.with_label_values(&[qtype]).inc();
    metrics::DNS_REQUEST_SIZE.observe(packet.len() as f64);

    match response::build_response(packet, question_end, &disposition, settings.ttl) {
        Ok(Some(resp)) => {
            let rcode = disposition.rcode().map(|r| r.as_str()).unwrap_or("NONE");
            metrics::DNS_RESPONSES_TOTAL.with_label_values(&[rcode]).inc();
            metrics::DNS_RESPONSE_SIZE.observe(resp.len() as f64);
            metrics::DNS_REQUEST_DURATION.observe(started.elapsed().as_secs_f64());
            Some(resp)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::error!("Failed to frame response: {}", e);
            None
        }
    }
}

/// The listening socket. IPv4 sockets on Linux carry `IP_PKTINFO` so replies
/// leave from the address the query was sent to; everything else is a plain
/// tokio socket.
enum Transport {
    #[cfg(target_os = "linux")]
    Pktinfo(AsyncFd<std::net::UdpSocket>),
    Plain(UdpSocket),
}

impl Transport {
    async fn bind(addr: SocketAddr) -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            if addr.is_ipv4() {
                return Self::bind_pktinfo(addr);
            }
        }
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind UDP {}", addr))?;
        Ok(Transport::Plain(socket))
    }

    #[cfg(target_os = "linux")]
    fn bind_pktinfo(addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .with_context(|| format!("Failed to create UDP socket for {}", addr))?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("Failed to bind UDP {}", addr))?;
        socket.set_nonblocking(true)?;

        if let Err(e) = pktinfo::enable_pktinfo(&socket) {
            tracing::warn!("IP_PKTINFO unavailable on {} ({}), replies use the kernel's source address", addr, e);
            return Ok(Transport::Plain(UdpSocket::from_std(socket.into())?));
        }
        let socket: std::net::UdpSocket = socket.into();
        Ok(Transport::Pktinfo(AsyncFd::with_interest(socket, Interest::READABLE | Interest::WRITABLE)?))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            #[cfg(target_os = "linux")]
            Transport::Pktinfo(socket) => socket.get_ref().local_addr(),
            Transport::Plain(socket) => socket.local_addr(),
        }
    }

    /// Returns the datagram length, the peer, and the local address the
    /// datagram was sent to when known.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr, Option<IpAddr>)> {
        match self {
            #[cfg(target_os = "linux")]
            Transport::Pktinfo(socket) => loop {
                let mut guard = socket.readable().await?;
                match guard.try_io(|inner| pktinfo::try_recv_with_pktinfo(inner.get_ref(), buf)) {
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Ok(result) => return result,
                    Err(_would_block) => continue,
                }
            },
            Transport::Plain(socket) => {
                let (size, src) = socket.recv_from(buf).await?;
                Ok((size, src, None))
            }
        }
    }

    async fn send(&self, buf: &[u8], to: SocketAddr, local: Option<IpAddr>) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Transport::Pktinfo(socket) => loop {
                let mut guard = socket.writable().await?;
                match guard.try_io(|inner| pktinfo::try_send_with_src_ip(inner.get_ref(), buf, to, local)) {
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Ok(result) => return result,
                    Err(_would_block) => continue,
                }
            },
            Transport::Plain(socket) => {
                let _ = local;
                socket.send_to(buf, to).await.map(|_| ())
            }
        }
    }
}

/// Single-socket UDP server. Datagrams are handled one at a time, in order.
pub struct DnsServer {
    transport: Transport,
    settings: Settings,
}

impl DnsServer {
    pub async fn bind(addr: SocketAddr, settings: Settings) -> Result<Self> {
        let transport = Transport::bind(addr).await?;
        Ok(Self { transport, settings })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Serves until `shutdown` flips or its sender goes away.
    ///
    /// A fresh table snapshot is taken for every datagram so that a reload
    /// published on `table` is picked up whole, never half-built.
    pub async fn run(
        &self,
        table: watch::Receiver<Arc<RecordTable>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        // one spare byte so an oversized datagram shows up as MAX_PACK_LEN + 1
        let mut buf = vec![0u8; MAX_PACK_LEN + 1];
        loop {
            let (size, src, local) = tokio::select! {
                res = self.transport.recv(&mut buf) => match res {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("UDP receive failed: {}", e);
                        continue;
                    }
                },
                _ = shutdown.changed() => {
                    tracing::info!("Stopping UDP listener on {}", self.local_addr()?);
                    return Ok(());
                }
            };

            if !(HEADER_LEN..=MAX_PACK_LEN).contains(&size) {
                tracing::warn!("packet size {} from {}, ignored", size, src);
                metrics::DNS_DROPPED_TOTAL.with_label_values(&["bad_size"]).inc();
                continue;
            }
            if self.settings.verbose {
                match local {
                    Some(local) => tracing::info!("Got UDP packet from {} to {}", src, local),
                    None => tracing::info!("Got UDP packet from {}", src),
                }
            }

            let snapshot = table.borrow().clone();
            let Some(resp) = process_packet(&snapshot, &self.settings, &buf[..size]) else {
                continue;
            };
            // answer from the address the query was sent to
            if let Err(e) = self.transport.send(&resp, src, local).await {
                tracing::warn!("Failed to send {} bytes to {}: {}", resp.len(), src, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::encode_dotted;
    use crate::table::ResourceRecord;
    use crate::types::DnsHeader;
    use std::net::Ipv4Addr;

    fn table() -> RecordTable {
        [ResourceRecord::new("www.example.com", Ipv4Addr::new(10, 0, 0, 5)).unwrap()]
            .into_iter()
            .collect()
    }

    fn query(flags: u16, name: &str, qtype: u16) -> Vec<u8> {
        let mut packet = vec![0x55, 0xAA];
        packet.extend_from_slice(&flags.to_be_bytes());
        packet.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
        packet.extend_from_slice(&encode_dotted(name).unwrap());
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&[0, 1]);
        packet
    }

    #[test]
    fn test_a_query_answered() {
        let packet = query(0x0100, "www.example.com", 1);
        let resp = process_packet(&table(), &Settings::default(), &packet).unwrap();
        let header = DnsHeader::parse(&resp).unwrap();
        assert_eq!(header.id, 0x55AA);
        assert_eq!(header.flags.rcode, 0);
        assert!(header.flags.aa);
        assert_eq!(header.answer_count, 1);
        assert_eq!(&resp[resp.len() - 10..], &[0, 0, 0, 120, 0, 4, 10, 0, 0, 5]);
    }

    #[test]
    fn test_ptr_query_answered() {
        let packet = query(0, "5.0.0.10.in-addr.arpa", 12);
        let resp = process_packet(&table(), &Settings::default(), &packet).unwrap();
        let name = encode_dotted("www.example.com").unwrap();
        assert_eq!(DnsHeader::parse(&resp).unwrap().flags.rcode, 0);
        assert!(resp.ends_with(&name));
        let rdlength_at = resp.len() - name.len() - 2;
        assert_eq!(
            u16::from_be_bytes([resp[rdlength_at], resp[rdlength_at + 1]]) as usize,
            name.len()
        );
    }

    #[test]
    fn test_missing_name_is_nxdomain() {
        let packet = query(0, "missing.example.com", 1);
        let resp = process_packet(&table(), &Settings::default(), &packet).unwrap();
        let header = DnsHeader::parse(&resp).unwrap();
        assert_eq!(header.flags.rcode, 3);
        assert!(header.flags.aa);
        assert_eq!(header.answer_count, 0);
        assert_eq!(resp.len(), packet.len());
    }

    #[test]
    fn test_mx_query_not_implemented() {
        let packet = query(0, "www.example.com", 15);
        let resp = process_packet(&table(), &Settings::default(), &packet).unwrap();
        let header = DnsHeader::parse(&resp).unwrap();
        assert_eq!(header.flags.rcode, 4);
        assert_eq!(header.answer_count, 0);
        assert_eq!(&resp[HEADER_LEN..], &packet[HEADER_LEN..]);
    }

    #[test]
    fn test_response_packet_yields_nothing() {
        let packet = query(0x8180, "www.example.com", 1);
        assert_eq!(process_packet(&table(), &Settings::default(), &packet), None);
    }

    #[test]
    fn test_configured_ttl_used() {
        let packet = query(0, "www.example.com", 1);
        let settings = Settings { ttl: 86400, verbose: true };
        let resp = process_packet(&table(), &settings, &packet).unwrap();
        let ttl_at = resp.len() - 10;
        assert_eq!(&resp[ttl_at..ttl_at + 4], &86400u32.to_be_bytes());
    }
}
