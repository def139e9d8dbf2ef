//! Integer type aliases for bucket identifiers and call counts.
//!
//! Bucket indices are signed because they come from caller-supplied bucket
//! functions, which are free to map time onto any integer range.

/// Identifier of a discrete time bucket (e.g. the current second, minute or hour number).
pub type BucketIndex = i64;

/// Number of calls granted within one bucket.
pub type CallCount = u64;
