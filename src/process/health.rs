//! TCP reachability probing for service health ports.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

/// Probe `127.0.0.1:<port>`, bounded by `timeout`.
///
/// Reachability alone signals liveness; no handshake is attempted. Every
/// failure mode (refused, timed out, unroutable) collapses to `false`.
pub async fn probe_port(port: u16, timeout: Duration) -> bool {
    probe_addr(SocketAddr::from(([127, 0, 0, 1], port)), timeout).await
}

async fn probe_addr(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
