//! Client-side TCP and UDP connection primitives.
//!
//! - [`tcp::TcpConnection`]: non-blocking TCP client on a `mio` readiness
//!   loop, with a single-slot last-write-wins outbound mailbox.
//! - [`udp::UdpConnection`]: datagram channel with a receive thread, a send
//!   worker pool and a heartbeat timer that detects peer silence.
//!
//! Both are started by construction and torn down when the handle is
//! dropped. Failures after construction never surface as `Err`; they reach
//! the caller through the configured callbacks and the log.

pub mod net;
pub mod runtime;
pub mod sync;
pub mod tcp;
mod trace;
pub mod udp;

pub use trace::init_tracing;
