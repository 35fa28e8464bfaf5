//! Listen address helpers for netwatch.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 60300;

/// Default bind address (all IPv4 interfaces).
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Environment variable to override the port.
pub const PORT_ENV_VAR: &str = "NETWATCH_PORT";

/// Get the port to use.
///
/// Checks the `NETWATCH_PORT` environment variable first, falling back to
/// [`DEFAULT_PORT`] when it is unset or not a valid port number.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(PORT_ENV_VAR)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Loopback address a local subscriber connects to.
#[must_use]
pub fn local_server_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), get_port())
}
