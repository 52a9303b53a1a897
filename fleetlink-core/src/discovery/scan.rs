//! Stage A: interface wildcard expansion and per-host network probing.
//!
//! Grounded in `hlapi/DeviceManager.py`'s subnet-walk discovery loop; the
//! dual TCP/HTTP accept-if-either-succeeds probe mirrors the connection
//! probing in `huginn-proxy-lib::proxy::dialer`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

/// Expand a wildcard interface expression (`"10.0.0.*"`) into concrete
/// IPv4 host addresses, 1..254. Non-wildcard expressions (literal hosts,
/// or IPv6 addresses, which this pipeline never subnet-expands) pass
/// through unchanged.
pub fn expand_wildcard(expr: &str) -> Vec<String> {
    match expr.strip_suffix(".*") {
        Some(prefix) => (1..=254u8).map(|host| format!("{prefix}.{host}")).collect(),
        None => vec![expr.to_string()],
    }
}

/// Probe one host with a TCP connect to the BFP port and an HTTP
/// `POST /userid` to the HFP port, concurrently. The host is accepted if
/// either succeeds within `timeout`.
pub async fn probe_host(ip: &str, bfp_port: u16, hfp_port: u16, timeout: Duration, client: &reqwest::Client) -> bool {
    let tcp = probe_tcp(ip, bfp_port, timeout);
    let http = probe_http(ip, hfp_port, timeout, client);
    let (tcp_ok, http_ok) = tokio::join!(tcp, http);
    tcp_ok || http_ok
}

async fn probe_tcp(ip: &str, port: u16, timeout: Duration) -> bool {
    let Ok(addr) = format!("{ip}:{port}").parse::<SocketAddr>() else {
        return false;
    };
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

async fn probe_http(ip: &str, port: u16, timeout: Duration, client: &reqwest::Client) -> bool {
    let url = format!("http://{ip}:{port}/userid");
    client.post(&url).timeout(timeout).send().await.is_ok()
}
