//! error.rs
//! Defines admission errors for the bounded `try_run` path and
//! configuration errors for rules and limiter options.
//!
//! The unbounded `run` path never fails on its own; only the wrapped
//! operation can fail, and its output is returned untouched.

use thiserror::Error;

use crate::TimeUnit;

/// Reasons a bounded admission request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Too many callers are already queued for admission.
    #[error("too many callers waiting for admission: {waiting}/{max}")]
    QueueFull { waiting: usize, max: usize },

    /// The caller was throttled on every attempt it was allowed.
    #[error("admission not granted after {attempts} attempt(s)")]
    AttemptsExhausted { attempts: u32 },
}

/// Result type for bounded admission.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Invalid rule or limiter option configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A rule allowing zero calls would throttle every call forever.
    #[error("max_call_times must be greater than 0 (rule per {unit})")]
    ZeroMaxCallTimes { unit: TimeUnit },

    /// Option `min_waiting_unit` is zero; polled waits would spin.
    #[error("min_waiting_unit must be greater than 0")]
    ZeroWaitingUnit,

    /// Option `max_time_point_size` is zero; no bucket could be recorded.
    #[error("max_time_point_size must be greater than 0")]
    ZeroHistorySize,

    /// Option `max_attempts` is zero; no call could ever be admitted.
    #[error("max_attempts must be greater than 0")]
    ZeroMaxAttempts,
}
