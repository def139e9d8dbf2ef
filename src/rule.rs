//! Time-window rules for the rule-based limiter.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BucketIndex, CallCount, ConfigError};

/// Length of the time window a rule counts calls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
}

impl TimeUnit {
    /// Length of the unit in seconds.
    pub const fn seconds(self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeUnit::Second => write!(f, "second"),
            TimeUnit::Minute => write!(f, "minute"),
            TimeUnit::Hour => write!(f, "hour"),
        }
    }
}

/// At most `max_call_times` calls may start within one `unit`; once that
/// ceiling is reached, further calls in the same window wait `delay`.
///
/// Rules deserialize from configuration with the delay in human-readable form:
///
/// ```rust
/// use std::time::Duration;
/// use rate_guard_throttle::{TimeUnit, TimeWindowRule};
///
/// let rule: TimeWindowRule = serde_json::from_str(
///     r#"{ "unit": "minute", "max_call_times": 100, "delay": "10s" }"#,
/// ).unwrap();
/// assert_eq!(rule, TimeWindowRule::per_minute(100, Duration::from_secs(10)));
/// assert_eq!(rule.unit, TimeUnit::Minute);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowRule {
    pub unit: TimeUnit,
    pub max_call_times: CallCount,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl TimeWindowRule {
    /// # Panics
    ///
    /// Panics if `max_call_times` is zero.
    pub fn new(unit: TimeUnit, max_call_times: CallCount, delay: Duration) -> Self {
        assert!(max_call_times > 0, "max_call_times must be greater than 0");

        TimeWindowRule {
            unit,
            max_call_times,
            delay,
        }
    }

    pub fn per_second(max_call_times: CallCount, delay: Duration) -> Self {
        Self::new(TimeUnit::Second, max_call_times, delay)
    }

    pub fn per_minute(max_call_times: CallCount, delay: Duration) -> Self {
        Self::new(TimeUnit::Minute, max_call_times, delay)
    }

    pub fn per_hour(max_call_times: CallCount, delay: Duration) -> Self {
        Self::new(TimeUnit::Hour, max_call_times, delay)
    }

    /// Checks a rule that did not go through [`new`](TimeWindowRule::new),
    /// e.g. one loaded from configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_call_times == 0 {
            return Err(ConfigError::ZeroMaxCallTimes { unit: self.unit });
        }
        Ok(())
    }

    /// Bucket containing `now`: `floor(now_secs / unit_secs)`.
    pub fn bucket_index(&self, now: Duration) -> BucketIndex {
        (now.as_secs() / self.unit.seconds()) as BucketIndex
    }

    /// Delay imposed on a call when `count` calls were already granted in its bucket.
    pub fn delay_for(&self, count: CallCount) -> Duration {
        if count >= self.max_call_times {
            self.delay
        } else {
            Duration::ZERO
        }
    }
}
