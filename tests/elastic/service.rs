use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_elastic::{ElasticConfig, ElasticError, ElasticLayer};

#[derive(Debug, Clone, PartialEq)]
enum ApiError {
    Limiter(ElasticError),
    TooManyRequests { retry_after: Duration },
}

impl From<ElasticError> for ApiError {
    fn from(err: ElasticError) -> Self {
        ApiError::Limiter(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Limiter(err) => write!(f, "limiter: {}", err),
            ApiError::TooManyRequests { retry_after } => {
                write!(f, "rate limited, try again in {:?}", retry_after)
            }
        }
    }
}

impl std::error::Error for ApiError {}

fn layer(safe_base: usize, ramp_step: Duration) -> ElasticLayer<ApiError> {
    let limiter = ElasticConfig::builder(Instant::now())
        .safe_base(safe_base)
        .ramp_step(ramp_step)
        .poll_interval(Duration::from_millis(100))
        .name("api")
        .build()
        .unwrap();
    ElasticLayer::new(limiter).classify_backpressure(|err: &ApiError| match err {
        ApiError::TooManyRequests { retry_after } => Some(*retry_after),
        _ => None,
    })
}

/// Concurrent calls through the layer never exceed the limiter's capacity.
#[tokio::test(start_paused = true)]
async fn concurrent_calls_bounded_by_capacity() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (c, p) = (Arc::clone(&current), Arc::clone(&peak));

    let service = tower::service_fn(move |_req: ()| {
        let current = Arc::clone(&c);
        let peak = Arc::clone(&p);
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(250)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ApiError>(())
        }
    });

    let service = ServiceBuilder::new()
        .layer(layer(3, Duration::from_secs(3600)))
        .service(service);

    let mut handles = vec![];
    for _ in 0..30 {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            svc.ready().await.unwrap().call(()).await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(service.adapter().limiter().in_flight(), 0);
}

/// The capacity grows while calls are in progress and more of them overlap.
#[tokio::test(start_paused = true)]
async fn ramp_admits_more_calls_over_time() {
    let peak = Arc::new(AtomicUsize::new(0));
    let current = Arc::new(AtomicUsize::new(0));
    let (c, p) = (Arc::clone(&current), Arc::clone(&peak));

    let service = tower::service_fn(move |_req: ()| {
        let current = Arc::clone(&c);
        let peak = Arc::clone(&p);
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ApiError>(())
        }
    });

    let service = ServiceBuilder::new()
        .layer(layer(1, Duration::from_secs(1)))
        .service(service);

    let mut handles = vec![];
    for _ in 0..10 {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            svc.ready().await.unwrap().call(()).await
        }));
    }

    tokio::time::sleep(Duration::from_millis(4500)).await;
    // At 4.5s capacity is 1 + 4 = 5 and nothing has finished yet.
    assert_eq!(peak.load(Ordering::SeqCst), 5);

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
}

/// The worker loop: call, and on a rate-limit error back off and retry.
#[tokio::test(start_paused = true)]
async fn rate_limited_calls_trigger_cooldown_and_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&attempts);

    // Rejects the first three attempts, then succeeds.
    let service = tower::service_fn(move |req: u32| {
        let attempts = Arc::clone(&a);
        async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                Err(ApiError::TooManyRequests {
                    retry_after: Duration::from_secs(5),
                })
            } else {
                Ok(req)
            }
        }
    });

    let layer = layer(4, Duration::from_secs(10));
    let adapter = layer.adapter().clone();
    let mut service = ServiceBuilder::new().layer(layer).service(service);

    let mut retries = 0;
    let response = loop {
        match service.ready().await.unwrap().call(7).await {
            Ok(response) => break response,
            Err(ApiError::TooManyRequests { retry_after }) => {
                retries += 1;
                assert_eq!(adapter.capacity(), 1);
                tokio::time::sleep(retry_after).await;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    };

    assert_eq!(response, 7);
    assert_eq!(retries, 3);
    assert_eq!(adapter.limiter().safe_base(), 1);
    assert_eq!(adapter.limiter().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn max_wait_surfaces_timeout_error() {
    let limiter = ElasticConfig::builder(Instant::now())
        .safe_base(1)
        .ramp_step(Duration::from_secs(3600))
        .max_wait(Some(Duration::from_millis(500)))
        .build()
        .unwrap();
    let layer = ElasticLayer::<ApiError>::new(limiter);
    let blocker = layer.adapter().acquire_owned().await;

    let mut service = ServiceBuilder::new()
        .layer(layer)
        .service_fn(|_: ()| async { Ok::<_, ApiError>(()) });

    let err = service.ready().await.unwrap().call(()).await.unwrap_err();
    assert!(matches!(err, ApiError::Limiter(ElasticError::Timeout { .. })));

    drop(blocker);
    assert!(service.ready().await.unwrap().call(()).await.is_ok());
}

/// Errors without a classifier never count as backpressure.
#[tokio::test(start_paused = true)]
async fn no_classifier_means_no_corrections() {
    let limiter = ElasticConfig::builder(Instant::now())
        .safe_base(4)
        .build()
        .unwrap();
    let layer = ElasticLayer::<ApiError>::new(limiter);
    let adapter = layer.adapter().clone();

    let mut service = ServiceBuilder::new().layer(layer).service_fn(|_: ()| async {
        Err::<(), _>(ApiError::TooManyRequests {
            retry_after: Duration::from_secs(5),
        })
    });

    let _ = service.ready().await.unwrap().call(()).await;
    assert_eq!(adapter.limiter().safe_base(), 4);
    assert_eq!(adapter.capacity(), 4);
}
