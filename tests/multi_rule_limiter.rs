use std::sync::Arc;
use std::time::Duration;

use rate_guard_throttle::{
    AdmissionError, Clock, ConfigError, LimiterOptions, ManualClock, MultiRuleLimiter,
    TimeUnit, TimeWindowRule, TokioClock,
};
use tokio::time::{sleep, Instant};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn limiter(rules: Vec<TimeWindowRule>) -> MultiRuleLimiter {
    MultiRuleLimiter::with_clock(rules, TokioClock::new()).unwrap()
}

#[test]
fn test_rejects_rule_with_zero_calls() {
    let rule = TimeWindowRule {
        unit: TimeUnit::Second,
        max_call_times: 0,
        delay: secs(1),
    };
    let err = MultiRuleLimiter::with_clock(vec![rule], ManualClock::default()).unwrap_err();
    assert_eq!(err, ConfigError::ZeroMaxCallTimes { unit: TimeUnit::Second });
}

#[test]
fn test_rejects_invalid_options() {
    let rules = vec![TimeWindowRule::per_second(1, secs(1))];

    let zero_unit = LimiterOptions::default().with_min_waiting_unit(Duration::ZERO);
    let err = MultiRuleLimiter::with_options(rules.clone(), ManualClock::default(), zero_unit)
        .unwrap_err();
    assert_eq!(err, ConfigError::ZeroWaitingUnit);

    let zero_history = LimiterOptions::default().with_max_time_point_size(0);
    let err = MultiRuleLimiter::with_options(rules.clone(), ManualClock::default(), zero_history)
        .unwrap_err();
    assert_eq!(err, ConfigError::ZeroHistorySize);

    let zero_attempts = LimiterOptions::default().with_max_attempts(0);
    let err = MultiRuleLimiter::with_options(rules, ManualClock::default(), zero_attempts)
        .unwrap_err();
    assert_eq!(err, ConfigError::ZeroMaxAttempts);
    assert_eq!(err.to_string(), "max_attempts must be greater than 0");
}

#[tokio::test(start_paused = true)]
async fn test_no_rules_passes_through() {
    let limiter = limiter(Vec::new());
    let start = Instant::now();

    for i in 0..10 {
        assert_eq!(limiter.run(|| async move { i }).await, i);
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_third_call_in_a_second_waits() {
    let limiter = limiter(vec![
        TimeWindowRule::per_second(2, secs(1)),
        TimeWindowRule::per_minute(3, secs(5)),
    ]);
    let start = Instant::now();

    limiter.run(|| async {}).await;
    limiter.run(|| async {}).await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.run(|| async {}).await;
    assert!(start.elapsed() >= secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_fourth_call_in_a_minute_waits() {
    let limiter = limiter(vec![
        TimeWindowRule::per_second(2, secs(1)),
        TimeWindowRule::per_minute(3, secs(5)),
    ]);

    // Spread across distinct seconds so only the minute rule applies
    for _ in 0..3 {
        let start = Instant::now();
        limiter.run(|| async {}).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        sleep(secs(1)).await;
    }

    let start = Instant::now();
    limiter.run(|| async {}).await;
    assert!(start.elapsed() >= secs(5));

    let counts = limiter.group_bucket_counts("").unwrap();
    assert_eq!(counts[1], vec![(0, 3), (1, 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_last_rule_is_checked_first() {
    let limiter = limiter(vec![
        TimeWindowRule::per_second(1, secs(1)),
        TimeWindowRule::per_minute(2, secs(5)),
    ]);

    limiter.run(|| async {}).await;
    // Minute gate grants at 0s, second gate throttles until 1s
    limiter.run(|| async {}).await;
    // Minute gate throttles until the next minute, second gate then grants
    limiter.run(|| async {}).await;

    let counts = limiter.group_bucket_counts("").unwrap();
    assert_eq!(counts[0], vec![(0, 1), (1, 1), (60, 1)]);
    assert_eq!(counts[1], vec![(0, 2), (1, 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_group_keys_have_independent_budgets() {
    let limiter = limiter(vec![TimeWindowRule::per_second(1, secs(1))]);
    let start = Instant::now();

    limiter.run_keyed("a", || async {}).await;
    // "a" has used its quota; "b" has not
    limiter.run_keyed("b", || async {}).await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.run_keyed("a", || async {}).await;
    assert!(start.elapsed() >= secs(1));

    let mut groups = limiter.groups();
    groups.sort();
    assert_eq!(groups, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_is_built_once_per_key() {
    let limiter = limiter(vec![TimeWindowRule::per_second(5, secs(1))]);
    assert_eq!(limiter.group_count(), 0);
    assert!(limiter.group_bucket_counts("x").is_none());

    limiter.run_keyed("x", || async {}).await;
    limiter.run_keyed("x", || async {}).await;
    limiter.run(|| async {}).await;

    assert_eq!(limiter.group_count(), 2);
    assert_eq!(limiter.group_bucket_counts("x").unwrap(), vec![vec![(0, 2)]]);
    assert_eq!(limiter.group_bucket_counts("").unwrap(), vec![vec![(0, 1)]]);
}

#[tokio::test(start_paused = true)]
async fn test_removed_group_starts_fresh() {
    let limiter = limiter(vec![TimeWindowRule::per_second(1, secs(1))]);
    limiter.run_keyed("a", || async {}).await;

    assert!(limiter.remove_group("a"));
    assert!(!limiter.remove_group("a"));

    let start = Instant::now();
    limiter.run_keyed("a", || async {}).await;
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_keys_do_not_block_each_other() {
    let limiter = Arc::new(limiter(vec![TimeWindowRule::per_second(1, secs(1))]));
    let start = Instant::now();

    let a = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            limiter.run_keyed("a", || async {}).await;
            limiter.run_keyed("a", || async {}).await;
            Instant::now()
        })
    };
    let b = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            limiter.run_keyed("b", || async {}).await;
            Instant::now()
        })
    };

    let a_done = a.await.unwrap();
    let b_done = b.await.unwrap();
    assert!(a_done - start >= secs(1));
    assert_eq!(b_done - start, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_operation_error_passes_through() {
    let limiter = limiter(vec![TimeWindowRule::per_second(2, secs(1))]);
    let start = Instant::now();

    let failed: Result<(), &str> = limiter.run(|| async { Err("rejected") }).await;
    assert_eq!(failed, Err("rejected"));

    limiter.run(|| async {}).await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    // Both calls above count against the quota
    limiter.run(|| async {}).await;
    assert!(start.elapsed() >= secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_try_run_refuses_after_max_attempts() {
    let options = LimiterOptions::default()
        .with_min_waiting_unit(Duration::from_millis(100))
        .with_max_attempts(1);
    let limiter = MultiRuleLimiter::with_options(
        vec![TimeWindowRule::per_second(1, secs(1))],
        TokioClock::new(),
        options,
    )
    .unwrap();

    assert_eq!(limiter.try_run_keyed("k", || async { 1 }).await, Ok(1));
    assert_eq!(
        limiter.try_run_keyed("k", || async { 2 }).await,
        Err(AdmissionError::AttemptsExhausted { attempts: 1 })
    );

    // Other keys are unaffected
    assert_eq!(limiter.try_run_keyed("other", || async { 3 }).await, Ok(3));
}

#[tokio::test(start_paused = true)]
async fn test_refused_call_is_taken_back_from_passed_gates() {
    let options = LimiterOptions::default()
        .with_min_waiting_unit(Duration::from_millis(100))
        .with_max_attempts(1);
    let limiter = MultiRuleLimiter::with_options(
        vec![
            TimeWindowRule::per_second(1, secs(1)),
            TimeWindowRule::per_minute(100, secs(5)),
        ],
        TokioClock::new(),
        options,
    )
    .unwrap();
    let start = Instant::now();

    assert_eq!(limiter.try_run(|| async { 1 }).await, Ok(1));
    // Minute gate grants, second gate refuses
    assert_eq!(
        limiter.try_run(|| async { 2 }).await,
        Err(AdmissionError::AttemptsExhausted { attempts: 1 })
    );
    assert_eq!(start.elapsed(), Duration::ZERO);

    let counts = limiter.group_bucket_counts("").unwrap();
    assert_eq!(counts[0], vec![(0, 1)]);
    assert_eq!(counts[1], vec![(0, 1)]);
    assert_eq!(limiter.group_waiting("").unwrap(), vec![0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_full_inner_queue_leaves_outer_gate_untouched() {
    let options = LimiterOptions::default()
        .with_min_waiting_unit(Duration::from_millis(100))
        .with_max_waiting(1);
    let limiter = Arc::new(
        MultiRuleLimiter::with_options(
            vec![
                TimeWindowRule::per_second(1, secs(1)),
                TimeWindowRule::per_minute(100, secs(5)),
            ],
            TokioClock::new(),
            options,
        )
        .unwrap(),
    );
    assert!(limiter.group_waiting("").is_none());

    limiter.run(|| async {}).await;
    let throttled = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move { limiter.run(|| async {}).await })
    };
    // Past the minute gate, parked at the second gate
    while limiter.group_waiting("").unwrap() != vec![1, 0] {
        tokio::task::yield_now().await;
    }

    for _ in 0..5 {
        let refused = limiter.try_run(|| async {}).await;
        assert_eq!(refused, Err(AdmissionError::QueueFull { waiting: 1, max: 1 }));
    }
    assert_eq!(limiter.group_bucket_counts("").unwrap()[1], vec![(0, 2)]);
    assert_eq!(limiter.group_waiting("").unwrap(), vec![1, 0]);

    throttled.await.unwrap();
    let counts = limiter.group_bucket_counts("").unwrap();
    assert_eq!(counts[0], vec![(0, 1), (1, 1)]);
    assert_eq!(counts[1], vec![(0, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_manual_clock_drives_buckets() {
    let clock = Arc::new(ManualClock::new(secs(120)));
    let limiter = MultiRuleLimiter::with_clock(
        vec![TimeWindowRule::per_minute(1, Duration::from_millis(100))],
        Arc::clone(&clock),
    )
    .unwrap();

    limiter.run(|| async {}).await;
    clock.advance(secs(60));
    limiter.run(|| async {}).await;

    assert_eq!(limiter.group_bucket_counts("").unwrap(), vec![vec![(2, 1), (3, 1)]]);
}

#[test]
fn test_manual_clock_advance_saturates() {
    let clock = ManualClock::new(Duration::from_millis(1500));
    clock.advance(Duration::from_nanos(1));
    assert_eq!(clock.now(), Duration::new(1, 500_000_001));

    // Far beyond what fits in u64 nanoseconds
    clock.set(secs(u64::MAX / 2));
    clock.advance(secs(u64::MAX));
    assert_eq!(clock.now(), Duration::MAX);
}
