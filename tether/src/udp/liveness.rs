//! Peer liveness tracking.
//!
//! The receive thread stamps the [`LivenessClock`] on every datagram; the
//! timer thread reads it on each tick through a [`LivenessMonitor`], which
//! decides between doing nothing, sending a probe, and reporting silence.
//!
//! Timestamps are milliseconds since the clock was created, kept in an
//! `AtomicU64` so the two threads never tear or lose an update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::runtime::millis;

/// Time of the most recent inbound datagram.
#[derive(Debug)]
pub struct LivenessClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl LivenessClock {
    /// Creates a clock whose last arrival is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Milliseconds elapsed since the clock was created.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        millis(self.origin.elapsed())
    }

    /// Records an arrival at the current time.
    pub fn touch(&self) {
        self.touch_at(self.now_ms());
    }

    /// Records an arrival at `now_ms`. Never moves the clock backwards.
    pub fn touch_at(&self, now_ms: u64) {
        self.last_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    /// Timestamp of the last arrival (or reset).
    #[must_use]
    pub fn last_ms(&self) -> u64 {
        self.last_ms.load(Ordering::Acquire)
    }

    /// Time since the last arrival.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(self.last_ms()))
    }

    /// Restarts the idle window at `now_ms`, but only if no arrival was
    /// recorded since `observed` was read. Returns whether it restarted.
    pub fn restart(&self, observed: u64, now_ms: u64) -> bool {
        self.last_ms
            .compare_exchange(observed, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one liveness tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Recent traffic; nothing to do.
    Alive,
    /// Quiet for longer than the heartbeat interval; send a probe.
    Probe,
    /// Quiet for longer than the idle timeout; the clock was restarted.
    Silent,
}

/// Tick-by-tick decision logic for one connection.
#[derive(Debug)]
pub struct LivenessMonitor {
    idle_timeout_ms: u64,
    heartbeat_ms: u64,
    last_probe_ms: Option<u64>,
}

impl LivenessMonitor {
    /// Creates a monitor for the given thresholds.
    #[must_use]
    pub fn new(idle_timeout: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            idle_timeout_ms: millis(idle_timeout),
            heartbeat_ms: millis(heartbeat_interval),
            last_probe_ms: None,
        }
    }

    /// Evaluates the clock at the current time.
    pub fn tick(&mut self, clock: &LivenessClock) -> Verdict {
        self.tick_at(clock, clock.now_ms())
    }

    /// Evaluates the clock at `now_ms`.
    ///
    /// Silence restarts the idle window, so a peer that stays quiet is
    /// reported once per idle timeout rather than on every tick. Probes are
    /// spaced at least one heartbeat interval apart.
    pub fn tick_at(&mut self, clock: &LivenessClock, now_ms: u64) -> Verdict {
        let last = clock.last_ms();
        let elapsed = now_ms.saturating_sub(last);

        if elapsed > self.idle_timeout_ms {
            // A datagram that raced in keeps the peer alive.
            if !clock.restart(last, now_ms) {
                return Verdict::Alive;
            }
            self.last_probe_ms = None;
            return Verdict::Silent;
        }

        if elapsed > self.heartbeat_ms {
            let due = self
                .last_probe_ms
                .is_none_or(|sent| now_ms.saturating_sub(sent) >= self.heartbeat_ms);
            if due {
                self.last_probe_ms = Some(now_ms);
                return Verdict::Probe;
            }
        }

        Verdict::Alive
    }
}
