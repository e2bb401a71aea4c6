use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

lazy_static! {
    pub static ref DNS_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dnsd_requests_total",
        "Counter of DNS queries answered, by query type.",
        &["type"]
    ).unwrap();

    pub static ref DNS_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dnsd_responses_total",
        "Counter of response status codes.",
        &["rcode"]
    ).unwrap();

    pub static ref DNS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dnsd_dropped_total",
        "Counter of datagrams ignored without a response.",
        &["reason"]
    ).unwrap();

    pub static ref DNS_REQUEST_DURATION: Histogram = register_histogram!(
        "dnsd_request_duration_seconds",
        "Histogram of the time (in seconds) each request took to decode, look up and frame.",
        vec![0.000_001, 0.000_005, 0.00001, 0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.005, 0.01]
    ).unwrap();

    pub static ref DNS_REQUEST_SIZE: Histogram = register_histogram!(
        "dnsd_request_size_bytes",
        "Size of the request datagram in bytes.",
        vec![0.0, 32.0, 64.0, 100.0, 200.0, 300.0, 400.0, 512.0]
    ).unwrap();

    pub static ref DNS_RESPONSE_SIZE: Histogram = register_histogram!(
        "dnsd_response_size_bytes",
        "Size of the returned response in bytes.",
        vec![0.0, 32.0, 64.0, 100.0, 200.0, 300.0, 400.0, 512.0, 1023.0]
    ).unwrap();

    pub static ref RECORDS_LOADED: IntGauge = register_int_gauge!(
        "dnsd_records_loaded",
        "Number of records in the table currently being served."
    ).unwrap();

    pub static ref RELOAD_VERSION_INFO: GaugeVec = register_gauge_vec!(
        "dnsd_reload_version_info",
        "Record the hash value of the record file during reload.",
        &["hash", "value"]
    ).unwrap();

    pub static ref RELOAD_FAILED_TOTAL: IntCounter = register_int_counter!(
        "dnsd_reload_failed_total",
        "Counter of the number of failed reload attempts."
    ).unwrap();

    pub static ref BUILD_INFO: GaugeVec = register_gauge_vec!(
        "dnsd_build_info",
        "A metric with a constant '1' value labeled by the version dnsd was built from.",
        &["version"]
    ).unwrap();
}

pub fn set_build_info() {
    BUILD_INFO.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);
}

/// Text exposition of every registered metric.
pub fn render() -> Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer).context("Failed to encode metrics")?;
    Ok(buffer)
}

/// Binds the metrics listener and serves `GET` requests in the background.
pub async fn serve(addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
    let bound = listener.local_addr()?;
    tracing::info!("[metrics] Successfully bound metrics listener on {}", bound);

    let handle = tokio::spawn(async move {
        while let Ok((mut stream, peer)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let Ok(Ok(n)) = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await else {
                    return;
                };
                if n == 0 || !buf.starts_with(b"GET ") {
                    return;
                }
                let body = match render() {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!("[metrics] {} for {}", e, peer);
                        return;
                    }
                };
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let mut response = header.into_bytes();
                response.extend_from_slice(&body);

                let _ = tokio::time::timeout(Duration::from_secs(2), stream.write_all(&response)).await;
                let _ = stream.flush().await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Ok((bound, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_build_info() {
        set_build_info();
        let text = String::from_utf8(render().unwrap()).unwrap();
        assert!(text.contains("dnsd_build_info"));
        assert!(text.contains(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_serve_answers_get() {
        DNS_DROPPED_TOTAL.with_label_values(&["bad_size"]).inc();
        let (addr, handle) = serve("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();

        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("dnsd_dropped_total"));
        handle.abort();
    }
}
