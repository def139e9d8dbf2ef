use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::{
    AdmissionResult, BucketIndex, CallCount, Clock, ConfigError, LimiterOptions, RateLimiter,
    SystemClock, TimeWindowRule,
};

/// Default polling granularity for rule gates.
pub const DEFAULT_RULE_WAITING_UNIT: Duration = Duration::from_millis(100);

/// Rate limiter enforcing several time-window rules at once, per group key.
///
/// Each rule becomes one [`RateLimiter`] gate whose bucket is
/// `floor(now_secs / unit_secs)` and whose delay is the rule's `delay` once
/// the bucket holds `max_call_times` granted calls. A call runs only after it
/// passed every gate. Gates are passed as if nested around the operation, with
/// the last rule outermost, so the last rule's wait is incurred first.
///
/// Calls sharing a group key share one pipeline of gates, and with it the
/// accumulated counts. Pipelines are built on first use of a key and kept by
/// this limiter until [`remove_group`](MultiRuleLimiter::remove_group).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use rate_guard_throttle::{MultiRuleLimiter, TimeWindowRule, TokioClock};
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let limiter = MultiRuleLimiter::with_clock(
///     vec![
///         TimeWindowRule::per_second(5, Duration::from_secs(1)),
///         TimeWindowRule::per_minute(100, Duration::from_secs(10)),
///     ],
///     TokioClock::new(),
/// )
/// .unwrap();
///
/// let status = limiter.run_keyed("api-key", || async { 200 }).await;
/// assert_eq!(status, 200);
/// assert_eq!(limiter.group_count(), 1);
/// # }
/// ```
pub struct MultiRuleLimiter {
    rules: Arc<[TimeWindowRule]>,
    clock: Arc<dyn Clock>,
    options: LimiterOptions,
    pipelines: parking_lot::Mutex<HashMap<String, Pipeline>>,
}

/// The gates of one group key, outermost first.
#[derive(Clone)]
struct Pipeline {
    gates: Arc<[RateLimiter]>,
}

impl MultiRuleLimiter {
    /// Creates a limiter over wall-clock time.
    pub fn new(rules: Vec<TimeWindowRule>) -> Result<Self, ConfigError> {
        Self::with_clock(rules, SystemClock)
    }

    pub fn with_clock<C>(rules: Vec<TimeWindowRule>, clock: C) -> Result<Self, ConfigError>
    where
        C: Clock + 'static,
    {
        let options = LimiterOptions::default().with_min_waiting_unit(DEFAULT_RULE_WAITING_UNIT);
        Self::with_options(rules, clock, options)
    }

    /// Creates a limiter whose gates all use `options`.
    pub fn with_options<C>(
        rules: Vec<TimeWindowRule>,
        clock: C,
        options: LimiterOptions,
    ) -> Result<Self, ConfigError>
    where
        C: Clock + 'static,
    {
        for rule in &rules {
            rule.validate()?;
        }
        if options.min_waiting_unit.is_zero() {
            return Err(ConfigError::ZeroWaitingUnit);
        }
        if options.max_time_point_size == 0 {
            return Err(ConfigError::ZeroHistorySize);
        }
        if options.max_attempts == Some(0) {
            return Err(ConfigError::ZeroMaxAttempts);
        }

        Ok(MultiRuleLimiter {
            rules: rules.into(),
            clock: Arc::new(clock),
            options,
            pipelines: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Runs `operation` under the rules of the default (empty) group key.
    pub async fn run<F, Fut>(&self, operation: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.run_keyed("", operation).await
    }

    /// Waits until every gate of `group_key` admitted the call, then runs
    /// `operation` once and returns its output untouched.
    pub async fn run_keyed<F, Fut>(&self, group_key: &str, operation: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let pipeline = self.pipeline(group_key);
        for gate in pipeline.gates.iter() {
            gate.acquire().await;
        }
        operation().await
    }

    pub async fn try_run<F, Fut>(&self, operation: F) -> AdmissionResult<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.try_run_keyed("", operation).await
    }

    /// Like [`run_keyed`](MultiRuleLimiter::run_keyed), but each gate honors
    /// `max_waiting` and `max_attempts`.
    ///
    /// A place is taken in every gate's queue before any gate admits, so a
    /// full queue refuses the call without touching the counts. When an inner
    /// gate gives up, the gates already passed take their recorded call back.
    pub async fn try_run_keyed<F, Fut>(
        &self,
        group_key: &str,
        operation: F,
    ) -> AdmissionResult<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let pipeline = self.pipeline(group_key);
        let slots = pipeline
            .gates
            .iter()
            .map(RateLimiter::reserve)
            .collect::<AdmissionResult<Vec<_>>>()?;

        let mut granted = Vec::with_capacity(slots.len());
        for (gate, slot) in pipeline.gates.iter().zip(slots) {
            match gate.admit_reserved(slot).await {
                Ok(bucket) => granted.push((gate, bucket)),
                Err(err) => {
                    for (gate, bucket) in granted {
                        gate.refund(bucket);
                    }
                    return Err(err);
                }
            }
        }
        Ok(operation().await)
    }

    pub fn rules(&self) -> &[TimeWindowRule] {
        &self.rules
    }

    /// Group keys that currently own a pipeline.
    pub fn groups(&self) -> Vec<String> {
        self.pipelines.lock().keys().cloned().collect()
    }

    pub fn group_count(&self) -> usize {
        self.pipelines.lock().len()
    }

    /// Drops the pipeline of `group_key`. Returns whether one existed.
    ///
    /// Calls already going through the old pipeline finish against it; the
    /// next call with this key starts from empty counts.
    pub fn remove_group(&self, group_key: &str) -> bool {
        self.pipelines.lock().remove(group_key).is_some()
    }

    /// Bucket history of each rule's gate for `group_key`, in rule order.
    pub fn group_bucket_counts(&self, group_key: &str) -> Option<Vec<Vec<(BucketIndex, CallCount)>>> {
        let pipelines = self.pipelines.lock();
        let pipeline = pipelines.get(group_key)?;
        // Gates are stored outermost first, i.e. in reverse rule order.
        Some(pipeline.gates.iter().rev().map(RateLimiter::bucket_counts).collect())
    }

    /// Callers queued at each gate of a group, in rule order.
    pub fn group_waiting(&self, group_key: &str) -> Option<Vec<usize>> {
        let pipelines = self.pipelines.lock();
        let pipeline = pipelines.get(group_key)?;
        Some(pipeline.gates.iter().rev().map(RateLimiter::waiting).collect())
    }

    fn pipeline(&self, group_key: &str) -> Pipeline {
        let mut pipelines = self.pipelines.lock();
        if let Some(pipeline) = pipelines.get(group_key) {
            return pipeline.clone();
        }

        debug!(group_key, rules = self.rules.len(), "creating rate limit pipeline");
        let pipeline = self.build_pipeline();
        pipelines.insert(group_key.to_owned(), pipeline.clone());
        pipeline
    }

    fn build_pipeline(&self) -> Pipeline {
        let gates = self
            .rules
            .iter()
            .rev()
            .map(|&rule| {
                let clock = Arc::clone(&self.clock);
                RateLimiter::new(
                    move || rule.bucket_index(clock.now()),
                    move |count, _, _| rule.delay_for(count),
                    self.options.clone(),
                )
            })
            .collect();

        Pipeline { gates }
    }
}

impl fmt::Debug for MultiRuleLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiRuleLimiter")
            .field("rules", &self.rules)
            .field("options", &self.options)
            .field("groups", &self.group_count())
            .finish()
    }
}
