//! Tracing infrastructure for tether connections.
//!
//! Enable with `--features tracing`. All trace macros become no-ops when
//! the feature is disabled, so connection threads pay nothing for logging
//! in builds that do not want it.

/// Initialize the tracing subscriber with timestamps.
///
/// Call this at the start of tests or the `tether` binary to enable trace
/// output. Does nothing if the `tracing` feature is not enabled. Calling it
/// more than once is harmless: later calls leave the first subscriber in place.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=trace"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

// Without the feature every level expands to `()`, so a call is valid both
// as a statement and as a match arm. Arguments are not evaluated, which is
// why logging-only bindings carry a `_` prefix.
#[cfg(not(feature = "tracing"))]
macro_rules! noop {
    ($($arg:tt)*) => {
        ()
    };
}

#[cfg(not(feature = "tracing"))]
pub(crate) use noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as error;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as info;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as warn;

#[cfg(test)]
mod tests {
    use super::{trace, warn};

    #[test]
    fn level_macros_are_expressions() {
        let results: [Result<usize, &str>; 2] = [Ok(3), Err("refused")];
        for result in results {
            match result {
                Ok(_n) => trace!(len = _n, "sent"),
                Err(_e) => warn!(error = _e, "failed"),
            }
        }
    }
}
