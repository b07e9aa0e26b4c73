//! Restartable periodic timer.
//!
//! [`HeartbeatScheduler`] runs one registered callback on its own timer
//! thread at a fixed rate until stopped. The n-th fire is due at
//! `start + initial_delay + n * period`; if the callback overruns, missed
//! slots are skipped rather than fired back to back.
//!
//! Lifecycle: `new(callback)` → [`start`] → fires → [`stop`]. Stopping joins
//! the timer thread and releases the callback, so a stopped scheduler must be
//! given a new callback with [`set_callback`] before it can start again.
//!
//! The callback runs concurrently with every other thread of the owning
//! connection; whatever it touches must be `Sync`-safe.
//!
//! [`start`]: HeartbeatScheduler::start
//! [`stop`]: HeartbeatScheduler::stop
//! [`set_callback`]: HeartbeatScheduler::set_callback

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use crate::trace::{debug, trace, warn};

/// Callback invoked on every tick.
pub type TickCallback = Box<dyn FnMut() + Send + 'static>;

/// Error starting the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called while the timer thread is running.
    #[error("scheduler is already running")]
    AlreadyRunning,
    /// No callback is registered (never set, or released by `stop`).
    #[error("no callback registered")]
    NoCallback,
    /// A zero period would spin the timer thread.
    #[error("period must be non-zero")]
    ZeroPeriod,
    /// The timer thread could not be spawned.
    #[error("failed to spawn timer thread: {0}")]
    Spawn(std::io::Error),
}

/// Cancellation state shared with the timer thread.
struct Cancel {
    flag: AtomicBool,
    timer: Thread,
}

struct Running {
    cancel: Arc<Cancel>,
    handle: JoinHandle<()>,
}

/// A periodic timer with a single callback.
pub struct HeartbeatScheduler {
    name: String,
    callback: Option<TickCallback>,
    running: Option<Running>,
}

impl HeartbeatScheduler {
    /// Creates a stopped scheduler with `callback` registered.
    pub fn new(callback: impl FnMut() + Send + 'static) -> Self {
        Self {
            name: "tether-heartbeat".into(),
            callback: Some(Box::new(callback)),
            running: None,
        }
    }

    /// Sets the name given to the timer thread.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a new callback, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyRunning`] if the timer is active.
    pub fn set_callback(
        &mut self,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<(), SchedulerError> {
        if self.running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.callback = Some(Box::new(callback));
        Ok(())
    }

    /// Starts firing the callback after `initial_delay`, then every `period`.
    ///
    /// # Errors
    ///
    /// See [`SchedulerError`].
    pub fn start(&mut self, initial_delay: Duration, period: Duration) -> Result<(), SchedulerError> {
        if self.running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        let mut callback = self.callback.take().ok_or(SchedulerError::NoCallback)?;

        // The thread needs its own handle inside `Cancel` before it can run,
        // so it waits for the handoff through a one-shot channel.
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<Arc<Cancel>>(1);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let Ok(cancel) = cancel_rx.recv() else {
                    return;
                };
                debug!(period_ms = super::millis(period), "timer thread started");
                run_fixed_rate(&cancel, initial_delay, period, &mut callback);
                debug!("timer thread exiting");
            })
            .map_err(SchedulerError::Spawn)?;

        let cancel = Arc::new(Cancel {
            flag: AtomicBool::new(false),
            timer: handle.thread().clone(),
        });
        // The receiver is alive until the thread gets it, so this cannot fail.
        let _ = cancel_tx.send(Arc::clone(&cancel));
        self.running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Cancels pending and future fires and releases the callback.
    ///
    /// Idempotent. When called from inside the callback itself the timer
    /// thread is signalled but not joined; it exits after the callback returns.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            self.callback = None;
            return;
        };
        running.cancel.flag.store(true, Ordering::Release);
        running.cancel.timer.unpark();
        if running.handle.thread().id() != thread::current().id()
            && running.handle.join().is_err()
        {
            warn!(name = %self.name, "timer thread panicked");
        }
        self.callback = None;
    }

    /// Returns `true` between a successful `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.cancel.flag.load(Ordering::Acquire))
    }

    /// Returns `true` if a callback is registered and the timer is stopped.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.running.is_none() && self.callback.is_some()
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for HeartbeatScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatScheduler")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("armed", &self.is_armed())
            .finish()
    }
}

fn run_fixed_rate(
    cancel: &Cancel,
    initial_delay: Duration,
    period: Duration,
    callback: &mut TickCallback,
) {
    let mut due = Instant::now() + initial_delay;
    loop {
        if !sleep_until(cancel, due) {
            return;
        }
        trace!("timer fired");
        callback();

        due += period;
        let now = Instant::now();
        while due <= now {
            due += period;
        }
    }
}

/// Parks until `due`. Returns `false` if cancelled first.
fn sleep_until(cancel: &Cancel, due: Instant) -> bool {
    loop {
        if cancel.flag.load(Ordering::Acquire) {
            return false;
        }
        match due.checked_duration_since(Instant::now()) {
            Some(remaining) if !remaining.is_zero() => thread::park_timeout(remaining),
            _ => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fires_repeatedly_until_stopped() {
        let (count, callback) = counting();
        let mut scheduler = HeartbeatScheduler::new(callback);
        scheduler
            .start(Duration::ZERO, Duration::from_millis(10))
            .unwrap();
        assert!(scheduler.is_running());

        thread::sleep(Duration::from_millis(120));
        scheduler.stop();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected several fires, got {fired}");

        // No fires after stop.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), fired);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn initial_delay_is_honoured() {
        let (count, callback) = counting();
        let mut scheduler = HeartbeatScheduler::new(callback);
        scheduler
            .start(Duration::from_millis(300), Duration::from_millis(10))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.stop();
    }

    #[test]
    fn stop_wakes_a_long_sleep_promptly() {
        let (_count, callback) = counting();
        let mut scheduler = HeartbeatScheduler::new(callback);
        scheduler
            .start(Duration::from_secs(60), Duration::from_secs(60))
            .unwrap();
        let started = Instant::now();
        scheduler.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut scheduler = HeartbeatScheduler::new(|| {});
        scheduler
            .start(Duration::from_secs(1), Duration::from_secs(1))
            .unwrap();
        assert!(matches!(
            scheduler.start(Duration::ZERO, Duration::from_secs(1)),
            Err(SchedulerError::AlreadyRunning)
        ));
        assert!(matches!(
            scheduler.set_callback(|| {}),
            Err(SchedulerError::AlreadyRunning)
        ));
    }

    #[test]
    fn restart_requires_new_callback() {
        let mut scheduler = HeartbeatScheduler::new(|| {});
        scheduler
            .start(Duration::from_secs(1), Duration::from_secs(1))
            .unwrap();
        scheduler.stop();
        assert!(!scheduler.is_armed());
        assert!(matches!(
            scheduler.start(Duration::ZERO, Duration::from_secs(1)),
            Err(SchedulerError::NoCallback)
        ));

        let (count, callback) = counting();
        scheduler.set_callback(callback).unwrap();
        scheduler
            .start(Duration::ZERO, Duration::from_millis(10))
            .unwrap();
        thread::sleep(Duration::from_millis(60));
        scheduler.stop();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn zero_period_is_rejected() {
        let mut scheduler = HeartbeatScheduler::new(|| {});
        assert!(matches!(
            scheduler.start(Duration::ZERO, Duration::ZERO),
            Err(SchedulerError::ZeroPeriod)
        ));
        // The callback is kept when start fails before spawning.
        assert!(scheduler.is_armed());
    }

    #[test]
    fn stop_survives_panicking_callback() {
        let mut scheduler = HeartbeatScheduler::new(|| panic!("tick failed"));
        scheduler
            .start(Duration::ZERO, Duration::from_millis(10))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut scheduler = HeartbeatScheduler::new(|| {});
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
