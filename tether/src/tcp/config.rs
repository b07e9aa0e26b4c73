//! TCP connection configuration.

use std::time::Duration;

use crate::net::HostPort;

use super::{TcpConnection, TcpError};

/// Default time allowed for the connect handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the per-read buffer; one inbound chunk never exceeds it.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Callback receiving raw inbound bytes (one call per successful read).
pub type MessageCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Callback invoked once when the connection is lost or cannot be set up.
pub type ErrorCallback = Box<dyn FnMut() + Send + 'static>;

/// Configuration for a [`TcpConnection`].
///
/// Built with chained setters and consumed by [`TcpConfig::connect`]; once
/// the connection starts the configuration belongs to its event loop.
///
/// ```no_run
/// use std::time::Duration;
/// use tether::tcp::TcpConfig;
///
/// let conn = TcpConfig::new("127.0.0.1", 7000)
///     .connect_timeout(Duration::from_secs(3))
///     .on_message(|bytes| println!("got {} bytes", bytes.len()))
///     .on_error(|| eprintln!("connection lost"))
///     .connect()?;
/// conn.send(b"hello".to_vec());
/// # Ok::<(), tether::tcp::TcpError>(())
/// ```
pub struct TcpConfig {
    pub(crate) target: HostPort,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_buffer: usize,
    pub(crate) on_message: Option<MessageCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl TcpConfig {
    /// Starts a configuration for `host:port` with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            target: HostPort::new(host, port),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
            on_message: None,
            on_error: None,
        }
    }

    /// Sets how long the connect handshake may take before giving up.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read buffer capacity. Zero is bumped to one byte.
    #[must_use]
    pub fn read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer = bytes.max(1);
        self
    }

    /// Registers the inbound-bytes callback.
    #[must_use]
    pub fn on_message(mut self, f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Registers the error/disconnect callback.
    #[must_use]
    pub fn on_error(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Returns the configured target.
    #[must_use]
    pub fn target(&self) -> &HostPort {
        &self.target
    }

    /// Starts the connection. Shorthand for [`TcpConnection::connect`].
    ///
    /// # Errors
    ///
    /// See [`TcpConnection::connect`].
    pub fn connect(self) -> Result<TcpConnection, TcpError> {
        TcpConnection::connect(self)
    }
}

impl std::fmt::Debug for TcpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConfig")
            .field("target", &self.target)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_buffer", &self.read_buffer)
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
