//! Background execution shared by the connections.
//!
//! - `heartbeat`: restartable fixed-rate timer on its own thread.
//! - `pool`: per-connection worker pool for fire-and-forget jobs.

pub mod heartbeat;
pub mod pool;

pub use heartbeat::{HeartbeatScheduler, SchedulerError};
pub use pool::WorkerPool;

use std::time::Duration;

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
