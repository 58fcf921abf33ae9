//! UDP socket setup.
//!
//! One socket bound to an ephemeral local port and connected to the
//! device, so `send`/`recv` only ever talk to that peer.

use std::net::SocketAddr;

use tokio::net::{lookup_host, UdpSocket};

use crate::error::{AtemError, Result};

/// Conventional device control port.
pub const DEFAULT_PORT: u16 = 9910;

/// Resolve `address` to one socket address.
///
/// Accepts `host`, `host:port` or a literal IP (v6 in brackets when a port
/// is given). A bare host uses `default_port`.
pub async fn resolve_address(address: &str, default_port: u16) -> Result<SocketAddr> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AtemError::Connect("empty address".to_string()));
    }

    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = address.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let query = if has_port(address) {
        address.to_string()
    } else {
        format!("{}:{}", address, default_port)
    };

    let resolved = lookup_host(&query)
        .await
        .map_err(|e| AtemError::Connect(format!("cannot resolve {}: {}", address, e)))?
        .next()
        .ok_or_else(|| AtemError::Connect(format!("no addresses for {}", address)));
    resolved
}

fn has_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Bind a local socket and connect it to `peer`.
pub async fn open_socket(bind_address: &str, peer: SocketAddr) -> Result<UdpSocket> {
    let local: SocketAddr = bind_address
        .parse()
        .map_err(|e| AtemError::Connect(format!("bad bind address {}: {}", bind_address, e)))?;

    // Match the peer's address family when binding to the wildcard.
    let local = match (local, peer) {
        (SocketAddr::V4(l), SocketAddr::V6(_)) if l.ip().is_unspecified() => {
            SocketAddr::new(std::net::Ipv6Addr::UNSPECIFIED.into(), l.port())
        }
        _ => local,
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(peer).await?;
    tracing::debug!(
        "Socket {} connected to {}",
        socket.local_addr()?,
        peer
    );
    Ok(socket)
}
