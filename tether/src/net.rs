//! Network primitives shared by the TCP and UDP connections.
//!
//! mio-based; the TCP stream is used directly from mio while the datagram
//! socket gets a thin wrapper so it can be shared between threads.

pub mod endpoint;
pub mod socket;

pub use endpoint::{Endpoint, HostPort};
pub use socket::DatagramSocket;
