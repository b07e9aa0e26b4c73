//! UDP datagram channel with heartbeat-based liveness detection.
//!
//! # Architecture
//!
//! A [`UdpConnection`] runs three kinds of actors:
//!
//! - **Receive thread** (`tether-udp-rx`): waits on the socket, stamps the
//!   liveness clock, delivers text to `on_message`.
//! - **Timer thread** (`tether-udp-heartbeat`): on every tick evaluates the
//!   liveness clock; sends a probe or reports `on_peer_silent`.
//! - **Send workers** (`tether-udp-send-N`): resolve the peer and transmit,
//!   fire-and-forget.
//!
//! ```text
//!            send(text) ──▶ WorkerPool ──▶ socket.send_to(peer)
//!                                ▲
//!   timer ─tick─▶ LivenessMonitor ─ Probe ─┘
//!                       │
//!                       └─ Silent ─▶ on_peer_silent(), clock restarted
//!
//!   socket ─readable─▶ receive thread ─▶ clock.touch(), on_message(text)
//!                           │
//!                           └─ receive error ─▶ stop()
//! ```
//!
//! # Wire format
//!
//! Raw, unframed datagrams. The heartbeat probe is the literal
//! [`HEARTBEAT_PROBE`] text; peers see it as ordinary data.
//!
//! # Shutdown
//!
//! [`UdpConnection::stop`] (or the first receive failure) marks the
//! connection stopped, wakes the receive thread, releases the socket and
//! stops the timer. Only the first caller does the work. Dropping the
//! handle also joins the receive thread and the send workers.

mod config;
pub mod liveness;
mod receiver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::{Interest, Poll, Waker};

use crate::net::{DatagramSocket, Endpoint, HostPort};
use crate::runtime::heartbeat::{HeartbeatScheduler, SchedulerError};
use crate::runtime::pool::{self, WorkerPool};
use crate::trace::{debug, error, info, trace, warn};

pub use config::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_IDLE_TIMEOUT, DEFAULT_POOL_MULTIPLIER,
    DEFAULT_RECEIVE_BUFFER, DEFAULT_TICK, SilenceCallback, TextCallback, UdpConfig,
};
use liveness::{LivenessClock, LivenessMonitor, Verdict};
use receiver::{Receiver, SOCKET, WAKER};

/// Payload of the automatic heartbeat probe.
pub const HEARTBEAT_PROBE: &str = "hello,this is a heartbeat message";

/// Error opening a UDP connection.
#[derive(Debug, thiserror::Error)]
pub enum UdpError {
    /// The socket could not be bound to the requested port.
    #[error("failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// The poll instance or its waker could not be created.
    #[error("failed to set up polling: {0}")]
    Poll(std::io::Error),
    /// A background thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
    /// The heartbeat timer could not be started.
    #[error("failed to start heartbeat: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// State shared by the handle, the receive thread and the timer thread.
pub(crate) struct Shared {
    local: Endpoint,
    peer: HostPort,
    running: AtomicBool,
    socket: RwLock<Option<Arc<DatagramSocket>>>,
    clock: LivenessClock,
    waker: Waker,
    pool: WorkerPool,
    scheduler: Mutex<Option<HeartbeatScheduler>>,
}

impl Shared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn socket(&self) -> Option<Arc<DatagramSocket>> {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hands `payload` to a send worker.
    fn send(&self, payload: Vec<u8>) -> bool {
        let Some(socket) = self.socket().filter(|_| self.is_running()) else {
            warn!(peer = %self.peer, "send on stopped connection, dropping payload");
            return false;
        };
        let peer = self.peer.clone();
        let queued = self.pool.execute(move || {
            let dest = match peer.resolve() {
                Ok(dest) => dest,
                Err(_e) => {
                    warn!(peer = %peer, error = %_e, "cannot resolve peer, datagram dropped");
                    return;
                }
            };
            match socket.send_to(&payload, dest) {
                Ok(_n) => {
                    trace!(to = %dest, len = _n, "datagram sent");
                }
                Err(_e) => {
                    warn!(to = %dest, error = %_e, "datagram send failed");
                }
            }
        });
        if !queued {
            warn!("send pool is shut down, dropping payload");
        }
        queued
    }

    /// Stops the connection. Only the first call has any effect.
    pub(crate) fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(port = self.local.port(), "stopping udp connection");
        self.socket
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Err(_e) = self.waker.wake() {
            warn!(error = %_e, "failed to wake receive thread");
        }
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut scheduler) = scheduler {
            scheduler.stop();
        }
    }
}

/// Handle to a running UDP connection.
pub struct UdpConnection {
    shared: Arc<Shared>,
    receiver: Option<JoinHandle<()>>,
}

impl UdpConnection {
    /// Binds the socket and starts the receive thread, the send workers and
    /// the heartbeat timer.
    ///
    /// # Errors
    ///
    /// Returns [`UdpError`] if the port cannot be bound or a background
    /// resource cannot be created. Nothing is left running on error.
    pub fn open(config: UdpConfig) -> Result<Self, UdpError> {
        let UdpConfig {
            bind_port,
            peer_address,
            peer_port,
            idle_timeout,
            heartbeat_interval,
            receive_buffer,
            pool_multiplier,
            tick,
            on_message,
            on_peer_silent,
        } = config;
        let peer = HostPort::new(peer_address, peer_port.unwrap_or(bind_port));

        let mut socket = DatagramSocket::bind(Endpoint::any(bind_port)).map_err(|source| {
            error!(port = bind_port, error = %source, "failed to bind UDP socket");
            UdpError::Bind {
                port: bind_port,
                source,
            }
        })?;
        let local = socket
            .local_addr()
            .map_err(|source| UdpError::Bind { port: bind_port, source })?;

        let poll = Poll::new().map_err(UdpError::Poll)?;
        poll.registry()
            .register(&mut socket, SOCKET, Interest::READABLE)
            .map_err(UdpError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(UdpError::Poll)?;
        let socket = Arc::new(socket);

        let pool = WorkerPool::new(pool::default_size(pool_multiplier), "tether-udp-send")
            .map_err(UdpError::Spawn)?;

        let shared = Arc::new(Shared {
            local,
            peer,
            running: AtomicBool::new(true),
            socket: RwLock::new(Some(Arc::clone(&socket))),
            clock: LivenessClock::new(),
            waker,
            pool,
            scheduler: Mutex::new(None),
        });

        info!(
            local = %local,
            peer = %shared.peer,
            idle_timeout_ms = crate::runtime::millis(idle_timeout),
            heartbeat_ms = crate::runtime::millis(heartbeat_interval),
            "udp connection starting"
        );

        let rx = Receiver::new(poll, socket, Arc::clone(&shared), receive_buffer, on_message);
        let receiver = thread::Builder::new()
            .name("tether-udp-rx".into())
            .spawn(move || {
                debug!("receive thread started");
                rx.run();
                debug!("receive thread exiting");
            })
            .map_err(|e| {
                shared.stop();
                UdpError::Spawn(e)
            })?;

        let connection = Self {
            shared,
            receiver: Some(receiver),
        };

        let mut scheduler = HeartbeatScheduler::new(liveness_task(
            Arc::downgrade(&connection.shared),
            LivenessMonitor::new(idle_timeout, heartbeat_interval),
            on_peer_silent,
        ))
        .with_thread_name("tether-udp-heartbeat");
        // `connection` drops on error, which stops and joins what is running.
        scheduler.start(Duration::ZERO, tick)?;

        // `stop` flips `running` before taking this lock, so checking under
        // the lock means either `stop` finds the scheduler or we see it ran.
        let orphan = {
            let mut slot = connection
                .shared
                .scheduler
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if connection.shared.is_running() {
                *slot = Some(scheduler);
                None
            } else {
                Some(scheduler)
            }
        };
        if let Some(mut scheduler) = orphan {
            scheduler.stop();
        }

        Ok(connection)
    }

    /// Queues `text` to be sent to the peer.
    ///
    /// Returns `false` if the connection is stopped. Delivery failures are
    /// only logged.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.shared.send(text.into().into_bytes())
    }

    /// Queues raw bytes to be sent to the peer.
    pub fn send_bytes(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.shared.send(bytes.into())
    }

    /// Stops the connection and waits for the receive thread.
    ///
    /// Idempotent, and safe to call after the connection stopped itself.
    pub fn stop(&mut self) {
        self.shared.stop();
        self.join_receiver();
    }

    /// Returns `true` until the connection is stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// The bound local address.
    #[must_use]
    pub fn local_addr(&self) -> Endpoint {
        self.shared.local
    }

    /// The peer datagrams are sent to.
    #[must_use]
    pub fn peer(&self) -> &HostPort {
        &self.shared.peer
    }

    /// Time since the last datagram arrived (or the idle window restarted).
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.shared.clock.idle_for()
    }

    fn join_receiver(&mut self) {
        if let Some(handle) = self.receiver.take()
            && handle.join().is_err()
        {
            warn!("receive thread panicked");
        }
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for UdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpConnection")
            .field("local", &self.shared.local)
            .field("peer", &self.shared.peer)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builds the timer callback. Holds the shared state weakly so the timer
/// never keeps a dropped connection alive.
fn liveness_task(
    shared: Weak<Shared>,
    mut monitor: LivenessMonitor,
    mut on_peer_silent: Option<SilenceCallback>,
) -> impl FnMut() + Send + 'static {
    move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.is_running() {
            return;
        }
        match monitor.tick(&shared.clock) {
            Verdict::Alive => {}
            Verdict::Probe => {
                debug!(peer = %shared.peer, "peer quiet, sending heartbeat");
                shared.send(HEARTBEAT_PROBE.as_bytes().to_vec());
            }
            Verdict::Silent => {
                warn!(peer = %shared.peer, "idle timeout, peer considered offline");
                if let Some(on_peer_silent) = on_peer_silent.as_mut() {
                    on_peer_silent();
                }
            }
        }
    }
}
