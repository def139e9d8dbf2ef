//! Serialized async execution queue with time-window rate limiting.
//!
//! This library throttles calls to external services (API quotas such as
//! "5 calls per second and 100 per minute") by delaying each call until it
//! satisfies every configured rule. Admission is strictly serialized: callers
//! are granted in the order they asked, and no caller can jump the queue.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use rate_guard_throttle::{MultiRuleLimiter, TimeWindowRule};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = MultiRuleLimiter::new(vec![
//!     TimeWindowRule::per_second(5, Duration::from_secs(1)),
//!     TimeWindowRule::per_minute(100, Duration::from_secs(10)),
//! ])
//! .unwrap();
//!
//! // Calls sharing a key share one budget
//! let body = limiter
//!     .run_keyed("account-a", || async { "uploaded" })
//!     .await;
//! assert_eq!(body, "uploaded");
//! # }
//! ```
//!
//! # Building Blocks
//!
//! ## [Single-rule limiter](RateLimiter)
//! Driven by two caller-supplied functions: a *bucket function* mapping the
//! current time to a bucket index, and a *delay function* deciding how long a
//! call must wait given the calls already granted in that bucket. Injecting
//! the bucket function keeps time granularity configurable and testable.
//!
//! ## [Multi-rule limiter](MultiRuleLimiter)
//! Turns a list of [`TimeWindowRule`]s into one gate per rule and requires a
//! call to pass all of them. Rule state is partitioned by *group key*.
//!
//! ## [Bucket history](BucketCounter)
//! Call counts per bucket, bounded in size by evicting the oldest bucket.
//!
//! # Core Concepts
//!
//! ## Admission
//! A call is *granted* when the delay function returns less than one
//! millisecond; only then is it counted. A throttled call sleeps for the
//! delay, waits for the bucket to change, and is evaluated again.
//!
//! ## Error Handling
//! [`RateLimiter::run`] and [`MultiRuleLimiter::run_keyed`] cannot fail on
//! their own; they return the operation's output untouched. The `try_run`
//! variants may refuse admission with an [`AdmissionError`] when
//! [`LimiterOptions`] bound the queue length or the number of attempts.
//!
//! ## Cancellation
//! Dropping a pending `run` future releases its place in the queue without
//! recording a call.
//!
//! ## Logging
//! Admission decisions are reported through [`tracing`]: grants at `TRACE`,
//! throttled attempts and new group pipelines at `DEBUG`, refusals at `WARN`.

pub mod bucket;
pub mod clock;
pub mod error;
pub mod limiter;
pub mod multi_rule;
pub mod options;
pub mod rule;
pub mod types;

pub use bucket::BucketCounter;
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use error::{AdmissionError, AdmissionResult, ConfigError};
pub use limiter::{BucketFn, DelayFn, RateLimiter};
pub use multi_rule::{MultiRuleLimiter, DEFAULT_RULE_WAITING_UNIT};
pub use options::{LimiterOptions, DEFAULT_MAX_TIME_POINT_SIZE, DEFAULT_MIN_WAITING_UNIT};
pub use rule::{TimeUnit, TimeWindowRule};
pub use types::{BucketIndex, CallCount};
