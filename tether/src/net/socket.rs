//! Datagram socket wrapper for mio-based I/O.
//!
//! [`DatagramSocket`] wraps [`mio::net::UdpSocket`] so it can be registered
//! with a [`Poll`] by the receive thread and shared behind an `Arc` with the
//! send workers. Sends and receives take `&self`; the kernel serializes
//! concurrent datagram sends on one socket.
//!
//! [`Poll`]: mio::Poll

use std::io::{self, ErrorKind};

use mio::event::Source;
use mio::net::UdpSocket as MioUdpSocket;
use mio::{Interest, Registry, Token};

use super::Endpoint;

/// A non-blocking UDP socket.
#[derive(Debug)]
pub struct DatagramSocket {
    inner: MioUdpSocket,
}

impl DatagramSocket {
    /// Binds a new socket to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound (e.g., address in use).
    pub fn bind(endpoint: Endpoint) -> io::Result<Self> {
        let inner = MioUdpSocket::bind(endpoint.into())?;
        Ok(Self { inner })
    }

    /// Returns the local address this socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.inner.local_addr().map(Endpoint::from)
    }

    /// Sends `buf` as one datagram to `dest`.
    ///
    /// A `WouldBlock` from the kernel is surfaced as an error; callers treat
    /// it like any other failed send.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the send buffer is full.
    pub fn send_to(&self, buf: &[u8], dest: Endpoint) -> io::Result<usize> {
        self.inner.send_to(buf, dest.into())
    }

    /// Receives one datagram, returning `Ok(None)` instead of `WouldBlock`.
    ///
    /// `Interrupted` is also folded into `Ok(None)` so the caller simply
    /// polls again.
    ///
    /// # Errors
    ///
    /// Returns any other I/O error.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Endpoint)>> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, Endpoint::from(addr)))),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl Source for DatagramSocket {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}
