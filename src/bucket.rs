use std::collections::BTreeMap;

use crate::{BucketIndex, CallCount};

/// Bounded history of call counts per time bucket.
///
/// Each granted call increments the count of the bucket it was granted in.
/// The history keeps at most `capacity` buckets; when a new bucket pushes it
/// over that size, the numerically smallest (oldest) bucket is evicted. This
/// keeps the footprint of a long-lived limiter self-bounding.
///
/// # Example
///
/// ```rust
/// use rate_guard_throttle::BucketCounter;
///
/// let mut counter = BucketCounter::new(2);
/// counter.record(10);
/// counter.record(10);
/// counter.record(11);
/// assert_eq!(counter.count(10), 2);
///
/// // A third bucket evicts the oldest one
/// counter.record(12);
/// assert_eq!(counter.len(), 2);
/// assert!(!counter.contains(10));
/// ```
#[derive(Debug, Clone)]
pub struct BucketCounter {
    /// Maximum number of buckets kept in the history
    capacity: usize,
    /// Call counts keyed by bucket, ordered so the oldest bucket is first
    counts: BTreeMap<BucketIndex, CallCount>,
}

impl BucketCounter {
    /// Creates an empty counter keeping at most `capacity` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "max_time_point_size must be greater than 0");

        BucketCounter {
            capacity,
            counts: BTreeMap::new(),
        }
    }

    /// Returns the number of calls recorded in `bucket`, or 0 if it is not tracked.
    pub fn count(&self, bucket: BucketIndex) -> CallCount {
        self.counts.get(&bucket).copied().unwrap_or(0)
    }

    /// Records one granted call in `bucket` and evicts the oldest buckets
    /// while the history exceeds its capacity.
    ///
    /// Returns the new count of `bucket`. If `bucket` is itself older than
    /// every tracked bucket on a full history, it is evicted immediately and
    /// the returned count is the one it briefly held.
    pub fn record(&mut self, bucket: BucketIndex) -> CallCount {
        let count = self.counts.entry(bucket).or_insert(0);
        *count += 1;
        let recorded = *count;

        while self.counts.len() > self.capacity {
            self.counts.pop_first();
        }
        recorded
    }

    /// Removes one call from `bucket`, dropping the bucket once it is empty.
    /// Returns `false` if the bucket held no calls.
    pub fn release(&mut self, bucket: BucketIndex) -> bool {
        let Some(count) = self.counts.get_mut(&bucket) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(&bucket);
        }
        true
    }

    /// Maximum number of buckets kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buckets currently tracked.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Whether `bucket` is currently tracked.
    pub fn contains(&self, bucket: BucketIndex) -> bool {
        self.counts.contains_key(&bucket)
    }

    /// Oldest tracked bucket and its count.
    pub fn oldest(&self) -> Option<(BucketIndex, CallCount)> {
        self.counts.first_key_value().map(|(b, c)| (*b, *c))
    }

    /// Newest tracked bucket and its count.
    pub fn newest(&self) -> Option<(BucketIndex, CallCount)> {
        self.counts.last_key_value().map(|(b, c)| (*b, *c))
    }

    /// Sum of all tracked counts.
    pub fn total(&self) -> CallCount {
        self.counts.values().sum()
    }

    /// Iterates over `(bucket, count)` pairs in ascending bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (BucketIndex, CallCount)> + '_ {
        self.counts.iter().map(|(b, c)| (*b, *c))
    }
}
