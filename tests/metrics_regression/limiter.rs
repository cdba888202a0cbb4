//! Elastic limiter metrics regression tests

use super::helpers::*;
use serial_test::serial;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower_elastic::ElasticConfig;

#[tokio::test]
#[serial]
async fn limiter_admission_metrics_exist() {
    init_recorder();

    let limiter = ElasticConfig::builder(Instant::now())
        .name("test_elastic")
        .safe_base(3)
        .build()
        .unwrap();

    for _ in 0..3 {
        limiter.acquire().await;
    }
    limiter.release();

    assert_counter_exists("elastic_calls_admitted_total");
    assert_metric_has_label("elastic_calls_admitted_total", "limiter", "test_elastic");

    assert_gauge_exists("elastic_in_flight");
    assert_metric_has_label("elastic_in_flight", "limiter", "test_elastic");
    assert_gauge_exists("elastic_capacity");

    assert_histogram_exists("elastic_wait_duration_seconds");
    assert_metric_has_label("elastic_wait_duration_seconds", "limiter", "test_elastic");
}

#[tokio::test]
#[serial]
async fn limiter_timeout_metrics() {
    init_recorder();

    let limiter = Arc::new(
        ElasticConfig::builder(Instant::now())
            .name("timeout_elastic")
            .safe_base(1)
            .ramp_step(Duration::from_secs(3600))
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap(),
    );

    let _held = Arc::clone(&limiter).acquire_owned().await;
    let result = limiter.acquire_timeout(Duration::from_millis(20)).await;
    assert!(result.is_err());

    assert_counter_exists("elastic_calls_timed_out_total");
    assert_metric_has_label("elastic_calls_timed_out_total", "limiter", "timeout_elastic");
}

#[tokio::test]
#[serial]
async fn limiter_over_release_metrics() {
    init_recorder();

    let limiter = ElasticConfig::builder(Instant::now())
        .name("over_release_elastic")
        .build()
        .unwrap();

    limiter.release();

    assert_counter_exists("elastic_over_releases_total");
    assert_metric_has_label(
        "elastic_over_releases_total",
        "limiter",
        "over_release_elastic",
    );
}
