//! Time sources used to derive time buckets.
//!
//! Limiters never read the clock directly: bucket functions do. The rule-based
//! limiter takes a [`Clock`] so tests can run against tokio's paused clock or a
//! manually advanced one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of "current time" expressed as a duration since some fixed origin.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Duration;
}

/// Wall-clock time since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 is treated as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Monotonic time from [`tokio::time::Instant`].
///
/// Measured from the moment the clock was created, plus an optional offset.
/// Under `tokio::time::pause()` it follows the paused, auto-advancing clock.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    offset: Duration,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::with_offset(Duration::ZERO)
    }

    /// Starts the clock at `offset` instead of zero.
    pub fn with_offset(offset: Duration) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            offset,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.offset + self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward, saturating at [`Duration::MAX`].
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = now.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}
