//! UDP connection configuration.

use std::time::Duration;

use super::{UdpConnection, UdpError};

/// Default silence after which the peer is reported as gone.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default silence after which a heartbeat probe is sent.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default receive buffer; longer datagrams are truncated to this size.
pub const DEFAULT_RECEIVE_BUFFER: usize = 1024;

/// Default send workers per available CPU.
pub const DEFAULT_POOL_MULTIPLIER: usize = 5;

/// Default period of the liveness check.
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Callback receiving each non-empty datagram decoded as UTF-8 (lossy).
pub type TextCallback = Box<dyn FnMut(&str) + Send + 'static>;

/// Callback invoked each time the peer has been silent for the idle timeout.
pub type SilenceCallback = Box<dyn FnMut() + Send + 'static>;

/// Configuration for a [`UdpConnection`].
///
/// ```no_run
/// use std::time::Duration;
/// use tether::udp::UdpConfig;
///
/// let mut conn = UdpConfig::new(9000, "192.168.1.20")
///     .idle_timeout(Duration::from_secs(30))
///     .heartbeat_interval(Duration::from_secs(5))
///     .on_message(|text| println!("{text}"))
///     .on_peer_silent(|| eprintln!("peer went quiet"))
///     .open()?;
/// conn.send("hello");
/// conn.stop();
/// # Ok::<(), tether::udp::UdpError>(())
/// ```
pub struct UdpConfig {
    pub(crate) bind_port: u16,
    pub(crate) peer_address: String,
    pub(crate) peer_port: Option<u16>,
    pub(crate) idle_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) receive_buffer: usize,
    pub(crate) pool_multiplier: usize,
    pub(crate) tick: Duration,
    pub(crate) on_message: Option<TextCallback>,
    pub(crate) on_peer_silent: Option<SilenceCallback>,
}

impl UdpConfig {
    /// Starts a configuration binding `bind_port` and talking to `peer_address`.
    ///
    /// The peer port defaults to `bind_port`: both ends of a link normally
    /// use the same port.
    pub fn new(bind_port: u16, peer_address: impl Into<String>) -> Self {
        Self {
            bind_port,
            peer_address: peer_address.into(),
            peer_port: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            receive_buffer: DEFAULT_RECEIVE_BUFFER,
            pool_multiplier: DEFAULT_POOL_MULTIPLIER,
            tick: DEFAULT_TICK,
            on_message: None,
            on_peer_silent: None,
        }
    }

    /// Sends to `port` on the peer instead of the bind port.
    #[must_use]
    pub fn peer_port(mut self, port: u16) -> Self {
        self.peer_port = Some(port);
        self
    }

    /// Sets the silence after which `on_peer_silent` fires.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the silence after which a heartbeat probe is sent.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the receive buffer capacity. Zero is bumped to one byte.
    #[must_use]
    pub fn receive_buffer(mut self, bytes: usize) -> Self {
        self.receive_buffer = bytes.max(1);
        self
    }

    /// Sets the number of send workers per available CPU.
    #[must_use]
    pub fn pool_multiplier(mut self, multiplier: usize) -> Self {
        self.pool_multiplier = multiplier;
        self
    }

    /// Sets how often liveness is evaluated. Zero is bumped to one millisecond.
    #[must_use]
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Registers the inbound-text callback.
    #[must_use]
    pub fn on_message(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Registers the peer-silent callback.
    #[must_use]
    pub fn on_peer_silent(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_peer_silent = Some(Box::new(f));
        self
    }

    /// Port datagrams are sent to.
    #[must_use]
    pub fn effective_peer_port(&self) -> u16 {
        self.peer_port.unwrap_or(self.bind_port)
    }

    /// Binds and starts the connection. Shorthand for [`UdpConnection::open`].
    ///
    /// # Errors
    ///
    /// See [`UdpConnection::open`].
    pub fn open(self) -> Result<UdpConnection, UdpError> {
        UdpConnection::open(self)
    }
}

impl std::fmt::Debug for UdpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpConfig")
            .field("bind_port", &self.bind_port)
            .field("peer_address", &self.peer_address)
            .field("peer_port", &self.effective_peer_port())
            .field("idle_timeout", &self.idle_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("receive_buffer", &self.receive_buffer)
            .field("pool_multiplier", &self.pool_multiplier)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = UdpConfig::new(9000, "127.0.0.1");
        assert_eq!(config.effective_peer_port(), 9000);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.receive_buffer, 1024);
        assert_eq!(config.pool_multiplier, 5);
        assert_eq!(config.tick, Duration::from_millis(250));
    }

    #[test]
    fn peer_port_override() {
        let config = UdpConfig::new(9000, "127.0.0.1").peer_port(9100);
        assert_eq!(config.effective_peer_port(), 9100);
    }

    #[test]
    fn degenerate_values_are_clamped() {
        let config = UdpConfig::new(0, "h").receive_buffer(0).tick(Duration::ZERO);
        assert_eq!(config.receive_buffer, 1);
        assert_eq!(config.tick, Duration::from_millis(1));
    }
}
