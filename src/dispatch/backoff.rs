//! Reconnect pacing for a connection worker.
//!
//! Delays double from the configured interval up to a cap, with jitter so
//! a fleet of clients does not hammer a recovering console in lockstep. A
//! floor keeps a misconfigured tiny interval from turning into a retry
//! storm.

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Never retry faster than this, whatever the configured interval.
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Never wait longer than this between attempts.
pub(crate) const MAX_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) struct BackoffState {
    base: Duration,
    current: Duration,
    rng: StdRng,
}

impl BackoffState {
    pub(crate) fn new(interval: Duration) -> Self {
        let base = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        Self {
            base,
            current: base,
            rng: StdRng::from_entropy(),
        }
    }

    /// A successful connect resets the curve to the configured interval.
    pub(crate) fn record_success(&mut self) {
        self.current = self.base;
    }

    /// Jittered delay before the next attempt, doubling the window for the
    /// one after.
    pub(crate) fn next_sleep(&mut self) -> Duration {
        let floor_ms = MIN_INTERVAL.as_millis() as u64;
        let max_ms = (self.current.as_millis() as u64).max(floor_ms);
        let sleep_ms = if max_ms == floor_ms {
            floor_ms
        } else {
            self.rng.gen_range(floor_ms..=max_ms)
        };
        self.current = self.current.saturating_mul(2).min(MAX_INTERVAL);
        Duration::from_millis(sleep_ms)
    }
}
