use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::{AdmissionError, AdmissionResult, BucketCounter, BucketIndex, CallCount, LimiterOptions};

/// Maps the current time onto a bucket index.
pub type BucketFn = dyn Fn() -> BucketIndex + Send + Sync;

/// Decides how long a caller must wait, given the count of the current bucket,
/// the current bucket and the whole bucket history.
pub type DelayFn = dyn Fn(CallCount, BucketIndex, &BucketCounter) -> Duration + Send + Sync;

/// Serialized execution queue enforcing a single time-bucketed rule.
///
/// Callers hand [`run`](RateLimiter::run) an asynchronous operation. Before the
/// operation starts, the caller goes through *admission*:
///
/// 1. The current bucket is read from the bucket function.
/// 2. The delay function is asked how long to wait, given the number of calls
///    already granted in that bucket.
/// 3. A delay under one millisecond grants the call: the bucket's count is
///    incremented and the oldest bucket is evicted if the history is full.
/// 4. Otherwise the caller sleeps for the delay (in slices of
///    `min_waiting_unit`), then keeps polling until the bucket changes, and
///    tries again. Throttled attempts are never counted.
///
/// Admission is strictly serialized: one caller at a time holds the admission
/// token, including while it waits, and the token is handed out in the order
/// callers asked for it. A caller that arrives later can never be granted
/// before an earlier one.
///
/// The delay function runs while the bucket history is locked and must not
/// call back into the limiter.
///
/// Cloning a `RateLimiter` shares its state.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use rate_guard_throttle::{Clock, LimiterOptions, RateLimiter, TokioClock};
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let clock = TokioClock::new();
///
/// // At most 2 calls per second, wait a second once the quota is used
/// let limiter = RateLimiter::new(
///     move || clock.now().as_secs() as i64,
///     |count, _, _| if count >= 2 { Duration::from_secs(1) } else { Duration::ZERO },
///     LimiterOptions::default(),
/// );
///
/// let value = limiter.run(|| async { 21 * 2 }).await;
/// assert_eq!(value, 42);
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    bucket_fn: Box<BucketFn>,
    delay_fn: Box<DelayFn>,
    options: LimiterOptions,
    /// Admission token; tokio's mutex is fair, so waiters are served FIFO
    token: tokio::sync::Mutex<()>,
    counts: parking_lot::Mutex<BucketCounter>,
    /// Callers queued for, or currently going through, admission
    waiting: AtomicUsize,
}

/// Outcome of evaluating the rule once.
enum Decision {
    /// The call was recorded in this bucket.
    Granted(BucketIndex),
    Throttled { bucket: BucketIndex, delay: Duration },
}

/// A caller's place in the admission queue.
///
/// Keeps the waiting count accurate even if the caller's future is dropped.
pub(crate) struct QueueSlot<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RateLimiter {
    /// Creates a limiter from a bucket function, a delay function and options.
    ///
    /// # Panics
    ///
    /// Panics if `options.min_waiting_unit`, `options.max_time_point_size`
    /// or `options.max_attempts` is zero.
    pub fn new<B, D>(bucket_fn: B, delay_fn: D, options: LimiterOptions) -> Self
    where
        B: Fn() -> BucketIndex + Send + Sync + 'static,
        D: Fn(CallCount, BucketIndex, &BucketCounter) -> Duration + Send + Sync + 'static,
    {
        assert!(
            !options.min_waiting_unit.is_zero(),
            "min_waiting_unit must be greater than 0"
        );
        assert!(
            options.max_attempts != Some(0),
            "max_attempts must be greater than 0"
        );
        let counts = BucketCounter::new(options.max_time_point_size);

        RateLimiter {
            inner: Arc::new(RateLimiterInner {
                bucket_fn: Box::new(bucket_fn),
                delay_fn: Box::new(delay_fn),
                options,
                token: tokio::sync::Mutex::new(()),
                counts: parking_lot::Mutex::new(counts),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits for admission, then runs `operation` once and returns its output.
    ///
    /// Failures of `operation` are returned untouched. The slot it was granted
    /// stays consumed.
    pub async fn run<F, Fut>(&self, operation: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.acquire().await;
        operation().await
    }

    /// Like [`run`](RateLimiter::run), but honors `max_waiting` and
    /// `max_attempts`. When admission is refused, `operation` is not run.
    pub async fn try_run<F, Fut>(&self, operation: F) -> AdmissionResult<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.try_acquire().await?;
        Ok(operation().await)
    }

    /// Waits until one call is admitted and records it.
    pub async fn acquire(&self) {
        let _slot = self.enqueue();
        let _token = self.inner.token.lock().await;

        loop {
            match self.decide() {
                Decision::Granted(_) => return,
                Decision::Throttled { bucket, delay } => self.wait_out(bucket, delay).await,
            }
        }
    }

    /// Waits until one call is admitted, giving up as configured by
    /// `max_waiting` and `max_attempts`.
    ///
    /// `max_attempts` counts evaluations of the rule. When the last allowed
    /// evaluation is throttled, the call is refused right away instead of
    /// waiting out a delay it could not use.
    pub async fn try_acquire(&self) -> AdmissionResult<()> {
        let slot = self.reserve()?;
        self.admit_reserved(slot).await.map(|_| ())
    }

    /// Takes a place in the queue, honoring `max_waiting`.
    pub(crate) fn reserve(&self) -> AdmissionResult<QueueSlot<'_>> {
        let Some(max) = self.inner.options.max_waiting else {
            return Ok(self.enqueue());
        };

        self.inner
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map_err(|waiting| {
                warn!(waiting, max, "rate limiter queue is full");
                AdmissionError::QueueFull { waiting, max }
            })?;

        Ok(QueueSlot {
            waiting: &self.inner.waiting,
        })
    }

    /// Bounded admission for a caller already holding `slot`. Returns the
    /// bucket the call was recorded in.
    pub(crate) async fn admit_reserved(&self, slot: QueueSlot<'_>) -> AdmissionResult<BucketIndex> {
        let _slot = slot;
        let _token = self.inner.token.lock().await;
        let max_attempts = self.inner.options.max_attempts;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.decide() {
                Decision::Granted(bucket) => return Ok(bucket),
                Decision::Throttled { bucket, delay } => {
                    if max_attempts.is_some_and(|max| attempts >= max) {
                        warn!(attempts, bucket, "rate limiter refused admission");
                        return Err(AdmissionError::AttemptsExhausted { attempts });
                    }
                    self.wait_out(bucket, delay).await;
                }
            }
        }
    }

    /// Takes back one call recorded in `bucket` whose operation never ran.
    pub(crate) fn refund(&self, bucket: BucketIndex) {
        if self.inner.counts.lock().release(bucket) {
            debug!(bucket, "call refunded");
        }
    }

    /// Snapshot of the bucket history in ascending bucket order.
    pub fn bucket_counts(&self) -> Vec<(BucketIndex, CallCount)> {
        self.inner.counts.lock().iter().collect()
    }

    /// Number of buckets currently tracked.
    pub fn tracked_buckets(&self) -> usize {
        self.inner.counts.lock().len()
    }

    /// Number of callers queued for, or going through, admission.
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> &LimiterOptions {
        &self.inner.options
    }

    fn enqueue(&self) -> QueueSlot<'_> {
        self.inner.waiting.fetch_add(1, Ordering::SeqCst);
        QueueSlot {
            waiting: &self.inner.waiting,
        }
    }

    /// Evaluates the rule once; records the call when it is granted.
    /// Must be called with the admission token held.
    fn decide(&self) -> Decision {
        let inner = &*self.inner;
        let bucket = (inner.bucket_fn)();

        let mut counts = inner.counts.lock();
        let delay = (inner.delay_fn)(counts.count(bucket), bucket, &*counts);
        let delay = inner.options.clamp_delay(delay);

        if delay < Duration::from_millis(1) {
            let count = counts.record(bucket);
            trace!(bucket, count, "call admitted");
            return Decision::Granted(bucket);
        }

        debug!(bucket, delay_ms = delay.as_millis() as u64, "call throttled");
        Decision::Throttled { bucket, delay }
    }

    /// Sleeps out a throttling delay, then waits for the bucket to change.
    async fn wait_out(&self, bucket: BucketIndex, delay: Duration) {
        self.sleep_polled(delay).await;

        // Never retry inside the bucket that throttled us.
        while (self.inner.bucket_fn)() == bucket {
            sleep(self.inner.options.min_waiting_unit).await;
        }
    }

    async fn sleep_polled(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let unit = self.inner.options.min_waiting_unit;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep((deadline - now).min(unit)).await;
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("options", &self.inner.options)
            .field("tracked_buckets", &self.tracked_buckets())
            .field("waiting", &self.waiting())
            .finish()
    }
}
