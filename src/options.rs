//! Configuration for a single-rule [`RateLimiter`](crate::RateLimiter).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default polling granularity while waiting.
pub const DEFAULT_MIN_WAITING_UNIT: Duration = Duration::from_millis(40);

/// Default number of buckets kept in the call history.
pub const DEFAULT_MAX_TIME_POINT_SIZE: usize = 100;

/// Options controlling how a limiter waits and how much history it keeps.
///
/// Durations (de)serialize in human-readable form, so options can live in a
/// configuration file next to the rules they apply to:
///
/// ```rust
/// use std::time::Duration;
/// use rate_guard_throttle::LimiterOptions;
///
/// let options: LimiterOptions = serde_json::from_str(
///     r#"{ "min_waiting_unit": "10ms", "max_waiting": 32 }"#,
/// ).unwrap();
/// assert_eq!(options.min_waiting_unit, Duration::from_millis(10));
/// assert_eq!(options.max_time_point_size, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterOptions {
    /// Granularity of the polled sleep used while a caller is throttled
    #[serde(with = "humantime_serde")]
    pub min_waiting_unit: Duration,
    /// Maximum number of buckets kept in the call history
    pub max_time_point_size: usize,
    /// Maximum number of callers queued for admission (`try_run` only)
    pub max_waiting: Option<usize>,
    /// Maximum number of rule evaluations per call (`try_run` only); must be non-zero
    pub max_attempts: Option<u32>,
    /// Upper bound applied to every delay returned by the delay function
    #[serde(with = "humantime_serde")]
    pub max_delay: Option<Duration>,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            min_waiting_unit: DEFAULT_MIN_WAITING_UNIT,
            max_time_point_size: DEFAULT_MAX_TIME_POINT_SIZE,
            max_waiting: None,
            max_attempts: None,
            max_delay: None,
        }
    }
}

impl LimiterOptions {
    pub fn with_min_waiting_unit(mut self, unit: Duration) -> Self {
        self.min_waiting_unit = unit;
        self
    }

    pub fn with_max_time_point_size(mut self, size: usize) -> Self {
        self.max_time_point_size = size;
        self
    }

    pub fn with_max_waiting(mut self, max: usize) -> Self {
        self.max_waiting = Some(max);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Applies `max_delay` to a delay computed by a delay function.
    pub fn clamp_delay(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
