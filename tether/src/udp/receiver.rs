//! UDP receive thread.
//!
//! Blocks in `Poll::poll` on the socket and the waker. Each readable event
//! drains the socket: every datagram from the peer stamps the liveness
//! clock, non-empty ones are handed to the message callback as text. The
//! first receive error stops the whole connection; there is no reconnect.
//!
//! Datagrams that came from this socket itself (a peer configured as our own
//! address and port) are still delivered but do not count as liveness, or a
//! looped-back heartbeat probe would keep a silent link "alive" forever.

use std::io::ErrorKind;
use std::sync::Arc;

use mio::{Events, Poll, Token};

use crate::net::{DatagramSocket, Endpoint};
use crate::trace::{debug, error, trace, warn};

use super::Shared;
use super::config::TextCallback;

/// Token for the datagram socket.
pub(super) const SOCKET: Token = Token(0);
/// Token for the stop waker.
pub(super) const WAKER: Token = Token(1);

/// Fixed-capacity receive buffer with a logical length.
///
/// The logical length is what the next receive may fill. It shrinks to the
/// datagram size while a datagram is being consumed and must be reset to the
/// full capacity afterwards, or the next datagram would be truncated.
#[derive(Debug)]
pub(crate) struct DatagramBuffer {
    data: Vec<u8>,
    len: usize,
}

impl DatagramBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            len: capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current logical length.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Space available to the next receive.
    pub(crate) fn writable(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Marks the first `n` bytes as the received datagram.
    pub(crate) fn set_filled(&mut self, n: usize) {
        self.len = n.min(self.data.len());
    }

    /// The received datagram.
    pub(crate) fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Restores the logical length to the full capacity.
    pub(crate) fn reset(&mut self) {
        self.len = self.data.len();
    }
}

/// Receive loop state.
pub(super) struct Receiver {
    poll: Poll,
    socket: Arc<DatagramSocket>,
    shared: Arc<Shared>,
    buffer: DatagramBuffer,
    on_message: Option<TextCallback>,
}

impl Receiver {
    pub(super) fn new(
        poll: Poll,
        socket: Arc<DatagramSocket>,
        shared: Arc<Shared>,
        capacity: usize,
        on_message: Option<TextCallback>,
    ) -> Self {
        Self {
            poll,
            socket,
            shared,
            buffer: DatagramBuffer::new(capacity),
            on_message,
        }
    }

    /// Runs until the connection stops.
    pub(super) fn run(mut self) {
        let mut events = Events::with_capacity(8);
        while self.shared.is_running() {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "poll failed, stopping");
                self.shared.stop();
                break;
            }
            for event in &events {
                if event.token() == SOCKET && !self.drain() {
                    return;
                }
            }
        }
        debug!("receive loop finished");
    }

    /// Receives until the socket is empty. Returns `false` after a fatal error.
    fn drain(&mut self) -> bool {
        loop {
            if !self.shared.is_running() {
                return false;
            }
            let (n, from) = match self.socket.try_recv_from(self.buffer.writable()) {
                Ok(Some(received)) => received,
                Ok(None) => return true,
                Err(_e) => {
                    error!(
                        port = self.shared.local.port(),
                        error = %_e,
                        "datagram receive failed, stopping"
                    );
                    self.shared.stop();
                    return false;
                }
            };
            if is_own_datagram(self.shared.local, from) {
                trace!(len = n, "own datagram looped back, liveness unchanged");
            } else {
                self.shared.clock.touch();
            }
            self.buffer.set_filled(n);

            if n == 0 {
                warn!(from = %from, "empty datagram ignored");
            } else {
                let text = String::from_utf8_lossy(self.buffer.filled());
                trace!(from = %from, len = n, "datagram received");
                if let Some(on_message) = self.on_message.as_mut() {
                    on_message(&text);
                }
            }
            self.buffer.reset();
        }
    }
}

/// Whether `from` is the socket bound at `local`.
///
/// A wildcard bind receives its own loopback traffic from a loopback
/// address; no other process can hold the same port on that address.
fn is_own_datagram(local: Endpoint, from: Endpoint) -> bool {
    if from.port() != local.port() {
        return false;
    }
    from.ip() == local.ip() || (local.ip().is_unspecified() && from.ip().is_loopback())
}
