//! Non-blocking TCP client driven by a readiness loop.
//!
//! # Architecture
//!
//! ```text
//!  caller thread                         tether-tcp thread
//!  ─────────────                         ─────────────────
//!  TcpConnection::send(bytes)
//!     │  post → Mailbox (1 slot)  ─────▶  take on write-ready
//!     │  Waker::wake()            ─────▶  Poll::poll returns
//!     ▼                                      │
//!  returns immediately                       ├─ connect-ready → Connected
//!                                            ├─ read-ready    → on_message(bytes)
//!                                            ├─ write-ready   → flush mailbox
//!                                            └─ EOF / error   → on_error, Closed
//! ```
//!
//! The loop thread owns the socket and the [`mio::Poll`]; nothing else
//! touches them. The caller side shares only the mailbox, the waker, a
//! state cell and a shutdown flag.
//!
//! # Mailbox semantics
//!
//! Outbound data goes through a single-slot [`Mailbox`]: a `send` that
//! arrives before the previous payload was picked up replaces it. This is
//! last-write-wins, not a queue. A payload already being written
//! is always finished, across as many write-ready events as it takes.
//!
//! # Liveness
//!
//! There is no read/write timeout and no keep-alive on TCP; only the connect
//! handshake is bounded. A peer that stalls without closing goes unnoticed.

mod config;
mod event_loop;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use mio::{Poll, Waker};

use crate::net::HostPort;
use crate::sync::Mailbox;
use crate::trace::{debug, info, warn};

pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_BUFFER, ErrorCallback, MessageCallback, TcpConfig,
};
use event_loop::{EventLoop, WAKER};

/// Lifecycle of a [`TcpConnection`].
///
/// ```text
/// Connecting ──connect-ready──▶ Connected ──EOF / error / close──▶ Closed
///      └──────────refused / timeout / close──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake in progress (or not yet started by the loop thread).
    Connecting = 0,
    /// Handshake finished; reads and writes flow.
    Connected = 1,
    /// Terminal. The socket and poll instance are gone.
    Closed = 2,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Connected,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Error starting a connection.
///
/// Only local resource failures are reported here; network failures are
/// delivered through the error callback.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    /// The poll instance or its waker could not be created.
    #[error("failed to create poll instance: {0}")]
    Poll(std::io::Error),
    /// The event loop thread could not be spawned.
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(std::io::Error),
}

/// State shared between the handle and the loop thread.
pub(crate) struct Shared {
    state: AtomicU8,
    shutdown: AtomicBool,
    mailbox: Mailbox<Vec<u8>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            shutdown: AtomicBool::new(false),
            mailbox: Mailbox::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn mailbox(&self) -> &Mailbox<Vec<u8>> {
        &self.mailbox
    }
}

/// Handle to a running TCP connection.
///
/// Dropping the handle closes the connection and joins the loop thread.
pub struct TcpConnection {
    target: HostPort,
    shared: Arc<Shared>,
    waker: Arc<Waker>,
    handle: Option<JoinHandle<()>>,
}

impl TcpConnection {
    /// Starts connecting to the configured target.
    ///
    /// Returns as soon as the loop thread is spawned. Name resolution, socket
    /// creation and the handshake all happen on that thread; their failures
    /// are logged and reported through the error callback.
    ///
    /// # Errors
    ///
    /// Returns [`TcpError`] if the poll instance, waker or thread cannot be
    /// created.
    pub fn connect(config: TcpConfig) -> Result<Self, TcpError> {
        let poll = Poll::new().map_err(TcpError::Poll)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER).map_err(TcpError::Poll)?);
        let shared = Arc::new(Shared::new());
        let target = config.target.clone();

        info!(target = %target, "tcp connection starting");

        let event_loop = EventLoop::new(poll, config, Arc::clone(&shared));
        let handle = thread::Builder::new()
            .name("tether-tcp".into())
            .spawn(move || {
                debug!("event loop thread started");
                event_loop.run();
                debug!("event loop thread exiting");
            })
            .map_err(TcpError::Spawn)?;

        Ok(Self {
            target,
            shared,
            waker,
            handle: Some(handle),
        })
    }

    /// Queues `bytes` as the next outbound payload.
    ///
    /// Replaces a payload that has not started writing yet. Returns `false`
    /// (and logs) if the connection is closed or closing; `true` only means
    /// the payload was handed to the loop, not that it was delivered.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> bool {
        if self.shared.shutdown_requested() || self.shared.state() == ConnectionState::Closed {
            warn!(target = %self.target, "send on closed connection, dropping payload");
            return false;
        }
        let bytes = bytes.into();
        let _len = bytes.len();
        if let Some(_superseded) = self.shared.mailbox().post(bytes) {
            debug!(
                dropped = _superseded.len(),
                len = _len,
                "pending payload superseded before it was written"
            );
        }
        if let Err(_e) = self.waker.wake() {
            warn!(error = %_e, "failed to wake event loop");
            return false;
        }
        true
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns `true` once the connection has reached [`ConnectionState::Closed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Returns the target this connection was configured for.
    #[must_use]
    pub fn target(&self) -> &HostPort {
        &self.target
    }

    /// Closes the connection and waits for the loop thread to exit.
    ///
    /// Idempotent. The error callback is not invoked for an owner-requested
    /// close.
    pub fn close(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(_e) = self.waker.wake() {
            warn!(error = %_e, "failed to wake event loop for close");
        }
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            warn!("event loop thread panicked");
        }
        // The loop normally publishes Closed itself; this covers a panic.
        self.shared.set_state(ConnectionState::Closed);
        info!(target = %self.target, "tcp connection closed");
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Closed);
    }

    #[test]
    fn shared_starts_connecting_with_empty_mailbox() {
        let shared = Shared::new();
        assert_eq!(shared.state(), ConnectionState::Connecting);
        assert!(!shared.shutdown_requested());
        assert!(shared.mailbox().is_empty());
    }

    #[test]
    fn connection_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TcpConnection>();
    }
}
