//! Deadline-based frame pacing.
//!
//! A [`Pacer`] keeps one running deadline. Each cycle it waits for the
//! deadline (if it is further away than [`SCHEDULING_SLOP`]) and then
//! advances it by one interval measured from `max(now, deadline)`:
//!
//! ```text
//! on time:   |--work--|   wait   |--work--|   wait   |
//!            ^ next               ^ next+T            ^ next+2T
//! overrun:   |------work------|--work--|   wait   |
//!            ^ next           ^ now    ^ now+T
//! ```
//!
//! An overrun is absorbed by restarting the schedule from the current
//! time, so missed cycles are never replayed back-to-back.

use std::time::{Duration, Instant};

use crate::signal::Signal;

/// Waits shorter than this are skipped.
pub const SCHEDULING_SLOP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    /// Pacer starting now with the given cycle length.
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// Pacer firing `rate` times per second. A rate of zero is treated as one.
    pub fn from_rate(rate: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / rate.max(1) as f64))
    }

    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            next: start,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline of the next cycle.
    pub fn deadline(&self) -> Instant {
        self.next
    }

    /// Start a cycle at `now`: return how long to wait, and advance the
    /// deadline to `max(now, deadline) + interval`.
    ///
    /// Returns `None` when the wait would be within [`SCHEDULING_SLOP`].
    pub fn schedule(&mut self, now: Instant) -> Option<Duration> {
        let wait = self.next.saturating_duration_since(now);
        self.next = self.next.max(now) + self.interval;
        (wait > SCHEDULING_SLOP).then_some(wait)
    }

    /// Block until the current cycle's deadline.
    ///
    /// The wait is interrupted by `stop`; returns `false` if `stop` is set.
    pub fn wait(&mut self, stop: &Signal) -> bool {
        match self.schedule(Instant::now()) {
            Some(wait) => !stop.wait_timeout(wait),
            None => !stop.is_set(),
        }
    }
}
