//! Elastic Worker Pool Example
//!
//! A pool of workers drains a job queue against a simulated backend that
//! starts answering "too many requests" once more than a hidden number of
//! calls overlap. The elastic limiter ramps concurrency up over time, backs
//! off when the backend pushes back, and ramps up again after the cooldown.
//!
//! Run with: cargo run --example worker_pool

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_elastic::{ElasticConfig, ElasticError, ElasticLayer};

const WORKERS: usize = 40;
const JOBS: usize = 400;
const BACKEND_CAPACITY: usize = 12;

#[derive(Debug)]
enum BackendError {
    Limiter(ElasticError),
    TooManyRequests { retry_after: Duration },
}

impl From<ElasticError> for BackendError {
    fn from(err: ElasticError) -> Self {
        BackendError::Limiter(err)
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Limiter(err) => write!(f, "limiter: {}", err),
            BackendError::TooManyRequests { retry_after } => {
                write!(f, "429 Too Many Requests (retry after {:?})", retry_after)
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Backend that rejects calls while it is over its hidden capacity.
#[derive(Clone)]
struct SimulatedBackend {
    active: Arc<AtomicUsize>,
}

impl Service<usize> for SimulatedBackend {
    type Response = usize;
    type Error = BackendError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, job: usize) -> Self::Future {
        let active = Arc::clone(&self.active);

        Box::pin(async move {
            let overlapping = active.fetch_add(1, Ordering::SeqCst) + 1;
            let latency = 50 + (rand::random::<u64>() % 150);
            tokio::time::sleep(Duration::from_millis(latency)).await;
            active.fetch_sub(1, Ordering::SeqCst);

            if overlapping > BACKEND_CAPACITY {
                Err(BackendError::TooManyRequests {
                    retry_after: Duration::from_millis(1500),
                })
            } else {
                Ok(job)
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Elastic Worker Pool Example ===\n");
    println!(
        "{} workers, {} jobs, backend accepts {} overlapping calls\n",
        WORKERS, JOBS, BACKEND_CAPACITY
    );

    let limiter = ElasticConfig::builder(Instant::now())
        .safe_base(2)
        .ramp_step(Duration::from_millis(250))
        .poll_interval(Duration::from_millis(50))
        .name("backend")
        .on_backpressure_applied(|safe_base, cooldown| {
            println!(
                "  backpressure: safe base now {}, cooling down for {:?}",
                safe_base, cooldown
            );
        })
        .build()?;

    let layer = ElasticLayer::new(limiter).classify_backpressure(|err: &BackendError| match err {
        BackendError::TooManyRequests { retry_after } => Some(*retry_after),
        BackendError::Limiter(_) => None,
    });
    let adapter = layer.adapter().clone();

    let service = ServiceBuilder::new().layer(layer).service(SimulatedBackend {
        active: Arc::new(AtomicUsize::new(0)),
    });

    let next_job = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut workers = vec![];
    for _ in 0..WORKERS {
        let mut service = service.clone();
        let next_job = Arc::clone(&next_job);
        let rejected = Arc::clone(&rejected);
        workers.push(tokio::spawn(async move {
            loop {
                let job = next_job.fetch_add(1, Ordering::SeqCst);
                if job >= JOBS {
                    return Ok::<_, BackendError>(());
                }

                // Retry the same job until the backend accepts it.
                loop {
                    match service.ready().await?.call(job).await {
                        Ok(_) => break,
                        Err(BackendError::TooManyRequests { retry_after }) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                            tokio::time::sleep(retry_after).await;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }));
    }

    let reporter = {
        let adapter = adapter.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let snapshot = adapter.limiter().snapshot();
                println!(
                    "  [{:>5.1}s] in flight {:>2} / capacity {:>2} ({:?})",
                    start.elapsed().as_secs_f64(),
                    snapshot.in_flight,
                    snapshot.capacity,
                    snapshot.state
                );
            }
        })
    };

    for worker in workers {
        worker.await??;
    }
    reporter.abort();

    let snapshot = adapter.limiter().snapshot();
    println!("\nProcessed {} jobs in {:?}", JOBS, start.elapsed());
    println!("Rejected attempts: {}", rejected.load(Ordering::Relaxed));
    println!("Final safe base: {}", snapshot.safe_base);
    println!("Final capacity: {}", snapshot.capacity);

    Ok(())
}
