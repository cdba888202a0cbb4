//! Tower layer implementation for the elastic limiter.

use crate::backpressure::BackpressureAdapter;
use crate::service::{BackpressureClassifier, ElasticService};
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;

/// Layer that gates a service through an elastic limiter.
///
/// Every service produced by this layer, and every clone of those services,
/// shares one limiter. Use one layer per downstream destination.
///
/// `E` is the inner service's error type, which the backpressure classifier
/// inspects.
///
/// # Example
///
/// ```rust
/// use tower::ServiceBuilder;
/// use tower_elastic::{ElasticConfig, ElasticError, ElasticLayer};
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// #[derive(Debug)]
/// enum ApiError {
///     Limiter(ElasticError),
///     TooManyRequests { retry_after: Duration },
/// }
///
/// impl From<ElasticError> for ApiError {
///     fn from(err: ElasticError) -> Self {
///         ApiError::Limiter(err)
///     }
/// }
///
/// # fn example() -> Result<(), ElasticError> {
/// let limiter = ElasticConfig::builder(Instant::now())
///     .safe_base(2)
///     .ramp_step(Duration::from_secs(10))
///     .name("completions")
///     .build()?;
///
/// let layer = ElasticLayer::new(limiter).classify_backpressure(|err: &ApiError| match err {
///     ApiError::TooManyRequests { retry_after } => Some(*retry_after),
///     _ => None,
/// });
///
/// let service = ServiceBuilder::new()
///     .layer(layer)
///     .service_fn(|prompt: String| async move { Ok::<_, ApiError>(prompt) });
/// # Ok(())
/// # }
/// ```
pub struct ElasticLayer<E> {
    adapter: BackpressureAdapter,
    classifier: Option<BackpressureClassifier<E>>,
}

impl<E> ElasticLayer<E> {
    /// Creates a layer around a limiter or an existing adapter.
    ///
    /// Without a classifier no error is treated as backpressure.
    pub fn new(adapter: impl Into<BackpressureAdapter>) -> Self {
        Self {
            adapter: adapter.into(),
            classifier: None,
        }
    }

    /// Sets how backpressure is recognised in the inner service's errors.
    ///
    /// The closure returns the suggested retry delay for errors that signal
    /// overload (for example an HTTP 429 with a `Retry-After` value) and
    /// `None` for everything else.
    pub fn classify_backpressure<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> Option<Duration> + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(f));
        self
    }

    /// The adapter shared by every service this layer produces.
    pub fn adapter(&self) -> &BackpressureAdapter {
        &self.adapter
    }
}

impl<E> Clone for ElasticLayer<E> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<S, E> Layer<S> for ElasticLayer<E> {
    type Service = ElasticService<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        ElasticService::new(service, self.adapter.clone(), self.classifier.clone())
    }
}
