use super::limiter_at;
use std::time::Duration;
use tokio::time::Instant;
use tower_elastic::LimiterState;

/// Capacity grows by exactly one every ramp step.
#[tokio::test(start_paused = true)]
async fn capacity_increases_by_one_per_step() {
    let origin = Instant::now();
    let step = Duration::from_secs(10);
    let limiter = limiter_at(origin, 3, step);

    for n in 0..50u32 {
        let at_step = origin + step * n;
        assert_eq!(limiter.capacity_at(at_step), 3 + n as usize);
        // Just before the next step the capacity has not moved yet.
        let before_next = origin + step * (n + 1) - Duration::from_nanos(1);
        assert_eq!(limiter.capacity_at(before_next), 3 + n as usize);
    }
}

/// Capacity observed on the live clock never decreases without a correction.
#[tokio::test(start_paused = true)]
async fn capacity_is_monotonic_over_time() {
    let limiter = limiter_at(Instant::now(), 1, Duration::from_millis(700));

    let mut last = limiter.capacity();
    for _ in 0..100 {
        tokio::time::advance(Duration::from_millis(333)).await;
        let current = limiter.capacity();
        assert!(current >= last, "capacity dropped from {} to {}", last, current);
        last = current;
    }
}

#[tokio::test(start_paused = true)]
async fn future_origin_pins_capacity_to_one() {
    let now = Instant::now();
    let origin = now + Duration::from_secs(60);
    let limiter = limiter_at(origin, 25, Duration::from_secs(1));

    assert_eq!(limiter.capacity(), 1);
    assert_eq!(limiter.snapshot().state, LimiterState::Cooldown);

    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(limiter.capacity(), 25);
    assert_eq!(limiter.snapshot().state, LimiterState::Ramping);
}

/// End-to-end scenario: safe_base=1, ramp_step=10s, observed at origin + 25s.
#[tokio::test(start_paused = true)]
async fn capacity_at_twenty_five_seconds_is_three() {
    let origin = Instant::now();
    let limiter = limiter_at(origin, 1, Duration::from_secs(10));

    assert_eq!(limiter.capacity_at(origin + Duration::from_secs(25)), 3);

    tokio::time::advance(Duration::from_secs(25)).await;
    assert_eq!(limiter.capacity(), 3);
}

#[tokio::test(start_paused = true)]
async fn sub_second_steps() {
    let origin = Instant::now();
    let limiter = limiter_at(origin, 1, Duration::from_millis(250));

    assert_eq!(limiter.capacity_at(origin + Duration::from_millis(999)), 4);
    assert_eq!(limiter.capacity_at(origin + Duration::from_millis(1000)), 5);
}
