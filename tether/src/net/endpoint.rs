//! Network endpoint types.
//!
//! [`Endpoint`] is a resolved socket address; [`HostPort`] is the unresolved
//! `host:port` pair callers hand to a connection. Resolution is deferred to
//! the background thread that needs the address so constructing a connection
//! never blocks on name lookup.

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// A resolved network endpoint (IP address + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Creates an endpoint bound to all IPv4 interfaces on the given port.
    #[must_use]
    pub const fn any(port: u16) -> Self {
        Self(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Creates a localhost endpoint on the given port.
    #[must_use]
    pub const fn localhost(port: u16) -> Self {
        Self(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
    }

    /// Returns the IP address.
    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        ep.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// An unresolved `host:port` target.
///
/// The host may be a literal address or a name; it is looked up each time
/// [`HostPort::resolve`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    /// Creates a new target.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port part.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the target, preferring an IPv4 result when the name has both.
    ///
    /// # Errors
    ///
    /// Returns the lookup error, or `NotFound` if the name resolved to nothing.
    pub fn resolve(&self) -> io::Result<Endpoint> {
        let mut fallback = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            if addr.is_ipv4() {
                return Ok(Endpoint(addr));
            }
            fallback.get_or_insert(addr);
        }
        fallback.map(Endpoint).ok_or_else(|| {
            io::Error::new(
                ErrorKind::NotFound,
                format!("no address found for {}", self),
            )
        })
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_any() {
        let ep = Endpoint::any(9000);
        assert_eq!(ep.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(ep.port(), 9000);
    }

    #[test]
    fn endpoint_display() {
        let ep = Endpoint::localhost(8080);
        assert_eq!(format!("{ep}"), "127.0.0.1:8080");
    }

    #[test]
    fn resolve_literal_address() {
        let target = HostPort::new("127.0.0.1", 4000);
        let ep = target.resolve().unwrap();
        assert_eq!(ep, Endpoint::localhost(4000));
    }

    #[test]
    fn resolve_localhost_name() {
        let ep = HostPort::new("localhost", 4001).resolve().unwrap();
        assert!(ep.ip().is_loopback());
        assert_eq!(ep.port(), 4001);
    }

    #[test]
    fn resolve_invalid_name_fails() {
        let target = HostPort::new("no such host.invalid", 1);
        assert!(target.resolve().is_err());
    }

    #[test]
    fn host_port_display() {
        assert_eq!(HostPort::new("example.org", 7).to_string(), "example.org:7");
    }
}
