//! The TCP readiness loop.
//!
//! Runs on the connection's dedicated thread and owns the socket and the
//! poll instance. `Poll::poll` is the only place the thread blocks; it
//! returns on socket readiness, on a wake from the handle, or when the
//! connect deadline passes.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::net::HostPort;
use crate::trace::{debug, error, info, trace, warn};

use super::config::{ErrorCallback, MessageCallback};
use super::{ConnectionState, Shared, TcpConfig};

/// Token for the TCP stream.
pub(super) const STREAM: Token = Token(0);
/// Token for the cross-thread waker.
pub(super) const WAKER: Token = Token(1);

const EVENT_CAPACITY: usize = 16;

/// Whether the loop keeps running after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// A payload that has started writing but is not fully flushed.
#[derive(Debug)]
struct PendingWrite {
    bytes: Vec<u8>,
    written: usize,
}

impl PendingWrite {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, written: 0 }
    }

    fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    fn advance(&mut self, n: usize) {
        self.written = (self.written + n).min(self.bytes.len());
    }

    fn is_done(&self) -> bool {
        self.written == self.bytes.len()
    }
}

/// Loop state for one connection.
pub(super) struct EventLoop {
    poll: Poll,
    shared: Arc<Shared>,
    target: HostPort,
    connect_timeout: Duration,
    read_buf: Vec<u8>,
    on_message: Option<MessageCallback>,
    on_error: Option<ErrorCallback>,
    in_flight: Option<PendingWrite>,
    /// Interest currently registered for the stream.
    interest: Interest,
}

impl EventLoop {
    pub(super) fn new(poll: Poll, config: TcpConfig, shared: Arc<Shared>) -> Self {
        Self {
            poll,
            shared,
            target: config.target,
            connect_timeout: config.connect_timeout,
            read_buf: vec![0u8; config.read_buffer],
            on_message: config.on_message,
            on_error: config.on_error,
            in_flight: None,
            interest: Interest::WRITABLE,
        }
    }

    /// Runs the connection to completion.
    pub(super) fn run(mut self) {
        let mut stream = match self.open() {
            Ok(stream) => stream,
            Err(_e) => {
                error!(target = %self.target, error = %_e, "failed to start connect");
                self.fail();
                return;
            }
        };

        let deadline = Instant::now() + self.connect_timeout;
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        loop {
            if self.shared.shutdown_requested() {
                debug!("close requested by owner");
                break;
            }

            let timeout = match self.shared.state() {
                ConnectionState::Connecting => {
                    match deadline.checked_duration_since(Instant::now()) {
                        Some(left) if !left.is_zero() => Some(left),
                        _ => {
                            warn!(
                                target = %self.target,
                                timeout_ms = crate::runtime::millis(self.connect_timeout),
                                "connect timed out"
                            );
                            self.fail();
                            break;
                        }
                    }
                }
                _ => None,
            };

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "poll failed");
                self.fail();
                break;
            }

            let mut flow = Flow::Continue;
            for event in &events {
                if event.token() == STREAM {
                    flow = self.handle_stream(&mut stream, event);
                    if flow == Flow::Close {
                        break;
                    }
                }
                // WAKER events carry no data: the mailbox and shutdown flag
                // are re-checked below and at the top of the loop.
            }
            if flow == Flow::Close {
                break;
            }

            // A payload posted while write interest was already armed would
            // not produce a fresh edge, so try it right away.
            if self.shared.state() == ConnectionState::Connected
                && self.in_flight.is_none()
                && !self.shared.mailbox().is_empty()
                && self.handle_writable(&mut stream) == Flow::Close
            {
                break;
            }

            if let Err(_e) = self.sync_interest(&mut stream) {
                error!(error = %_e, "failed to update stream interest");
                self.fail();
                break;
            }
        }

        self.teardown(stream);
    }

    /// Resolves the target, starts a non-blocking connect and registers for
    /// connect-readiness.
    fn open(&mut self) -> io::Result<TcpStream> {
        let addr = self.target.resolve()?;
        let mut stream = TcpStream::connect(addr.into())?;
        self.poll
            .registry()
            .register(&mut stream, STREAM, Interest::WRITABLE)?;
        self.interest = Interest::WRITABLE;
        debug!(target = %self.target, addr = %addr, "connect started");
        Ok(stream)
    }

    fn handle_stream(&mut self, stream: &mut TcpStream, event: &Event) -> Flow {
        if self.shared.state() == ConnectionState::Connecting {
            if !(event.is_writable() || event.is_error() || event.is_write_closed()) {
                return Flow::Continue;
            }
            let flow = self.finish_connect(stream);
            if flow == Flow::Close || self.shared.state() == ConnectionState::Connecting {
                return flow;
            }
            // Freshly connected: reads and any waiting payload are picked up
            // once the interest is updated.
            return Flow::Continue;
        }

        if (event.is_readable() || event.is_read_closed())
            && self.handle_readable(stream) == Flow::Close
        {
            return Flow::Close;
        }
        if event.is_writable() {
            return self.handle_writable(stream);
        }
        Flow::Continue
    }

    /// Completes the handshake after connect-readiness.
    fn finish_connect(&mut self, stream: &TcpStream) -> Flow {
        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(_e)) | Err(_e) => {
                warn!(target = %self.target, error = %_e, "connect failed");
                self.fail();
                return Flow::Close;
            }
        }
        match stream.peer_addr() {
            Ok(_peer) => {
                info!(peer = %_peer, "connected");
                self.shared.set_state(ConnectionState::Connected);
                Flow::Continue
            }
            // Spurious wakeup; the handshake is still pending.
            Err(e) if e.kind() == ErrorKind::NotConnected => Flow::Continue,
            Err(_e) => {
                warn!(target = %self.target, error = %_e, "connect failed");
                self.fail();
                Flow::Close
            }
        }
    }

    /// Drains the socket, delivering each chunk as-is.
    fn handle_readable(&mut self, stream: &mut TcpStream) -> Flow {
        loop {
            match stream.read(&mut self.read_buf) {
                Ok(0) => {
                    info!(target = %self.target, "peer closed the connection");
                    self.fail();
                    return Flow::Close;
                }
                Ok(n) => {
                    trace!(len = n, "read");
                    if let Some(on_message) = self.on_message.as_mut() {
                        on_message(&self.read_buf[..n]);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Flow::Continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(&e) => {
                    info!(target = %self.target, error = %e, "connection lost");
                    self.fail();
                    return Flow::Close;
                }
                Err(_e) => {
                    // Transient; the next readiness event retries.
                    warn!(error = %_e, "read failed");
                    return Flow::Continue;
                }
            }
        }
    }

    /// Flushes the in-flight payload, then whatever the mailbox holds.
    fn handle_writable(&mut self, stream: &mut TcpStream) -> Flow {
        loop {
            let pending = match self.in_flight.take() {
                Some(pending) => pending,
                None => match self.shared.mailbox().take() {
                    Some(bytes) if bytes.is_empty() => {
                        trace!("skipping empty payload");
                        continue;
                    }
                    Some(bytes) => PendingWrite::new(bytes),
                    None => return Flow::Continue,
                },
            };
            match self.write_pending(stream, pending) {
                Ok(None) => {}
                Ok(Some(rest)) => {
                    self.in_flight = Some(rest);
                    return Flow::Continue;
                }
                Err(_e) => {
                    error!(target = %self.target, error = %_e, "write failed");
                    self.fail();
                    return Flow::Close;
                }
            }
        }
    }

    /// Writes until `pending` is flushed (`Ok(None)`) or the socket stops
    /// accepting bytes (`Ok(Some(rest))`).
    fn write_pending(
        &self,
        stream: &mut TcpStream,
        mut pending: PendingWrite,
    ) -> io::Result<Option<PendingWrite>> {
        while !pending.is_done() {
            match stream.write(pending.remaining()) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => pending.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    trace!(
                        written = pending.written,
                        total = pending.bytes.len(),
                        "partial write, waiting for write-ready"
                    );
                    return Ok(Some(pending));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        debug!(len = pending.bytes.len(), "payload written");
        Ok(None)
    }

    /// Re-registers the stream so write interest is armed only while there
    /// is something to write.
    fn sync_interest(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        let wanted = match self.shared.state() {
            ConnectionState::Connecting => Interest::WRITABLE,
            ConnectionState::Connected => {
                if self.in_flight.is_some() || !self.shared.mailbox().is_empty() {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                }
            }
            ConnectionState::Closed => return Ok(()),
        };
        if wanted != self.interest {
            self.poll.registry().reregister(stream, STREAM, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }

    /// Marks the connection closed and notifies the caller, once.
    fn fail(&mut self) {
        self.shared.set_state(ConnectionState::Closed);
        if self.shared.shutdown_requested() {
            return;
        }
        if let Some(mut on_error) = self.on_error.take() {
            on_error();
        }
    }

    /// Closes the poll instance, then the socket.
    fn teardown(self, mut stream: TcpStream) {
        if let Err(_e) = self.poll.registry().deregister(&mut stream) {
            debug!(error = %_e, "deregister during teardown failed");
        }
        if self.in_flight.is_some() {
            warn!("closing with a partially written payload");
        }
        let Self { poll, shared, .. } = self;
        drop(poll);
        if let Err(e) = stream.shutdown(std::net::Shutdown::Both)
            && e.kind() != ErrorKind::NotConnected
        {
            debug!(error = %e, "socket shutdown during teardown failed");
        }
        drop(stream);
        shared.set_state(ConnectionState::Closed);
        trace!("tcp resources released");
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_write_tracks_progress() {
        let mut pending = PendingWrite::new(b"hello world".to_vec());
        assert_eq!(pending.remaining(), b"hello world");
        pending.advance(6);
        assert_eq!(pending.remaining(), b"world");
        assert!(!pending.is_done());
        pending.advance(100);
        assert!(pending.is_done());
        assert!(pending.remaining().is_empty());
    }

    #[test]
    fn payload_superseded_before_connect_is_never_written() {
        use std::sync::atomic::Ordering;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let poll = Poll::new().unwrap();
        let waker = mio::Waker::new(poll.registry(), WAKER).unwrap();
        let shared = Arc::new(Shared::new());
        // Both posts land before the loop exists, so P1 can never be taken.
        assert!(shared.mailbox().post(b"P1".to_vec()).is_none());
        assert_eq!(shared.mailbox().post(b"P2".to_vec()), Some(b"P1".to_vec()));

        let event_loop = EventLoop::new(
            poll,
            TcpConfig::new("127.0.0.1", port),
            Arc::clone(&shared),
        );
        let handle = std::thread::spawn(move || event_loop.run());

        let (mut peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 16];
        while let Ok(n) = peer.read(&mut buf) {
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        shared.shutdown.store(true, Ordering::Release);
        waker.wake().unwrap();
        handle.join().unwrap();

        assert_eq!(received, b"P2");
        assert_eq!(shared.state(), ConnectionState::Closed);
    }

    #[test]
    fn disconnect_kinds() {
        assert!(is_disconnect(&ErrorKind::ConnectionReset.into()));
        assert!(is_disconnect(&ErrorKind::BrokenPipe.into()));
        assert!(!is_disconnect(&ErrorKind::TimedOut.into()));
        assert!(!is_disconnect(&ErrorKind::Other.into()));
    }
}
