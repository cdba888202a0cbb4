//! Elastic limiter service implementation.

use crate::backpressure::BackpressureAdapter;
use crate::error::ElasticError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// Extracts a suggested retry delay from a downstream error.
///
/// Returning `Some(delay)` marks the error as a backpressure signal.
pub type BackpressureClassifier<E> = Arc<dyn Fn(&E) -> Option<Duration> + Send + Sync>;

/// Service that gates calls through an elastic limiter.
///
/// Each call waits for admission, runs the inner service, reports
/// backpressure if the classifier recognises the error, and releases the
/// slot. All clones share one limiter.
pub struct ElasticService<S, E> {
    inner: S,
    adapter: BackpressureAdapter,
    classifier: Option<BackpressureClassifier<E>>,
}

impl<S, E> ElasticService<S, E> {
    pub(crate) fn new(
        inner: S,
        adapter: BackpressureAdapter,
        classifier: Option<BackpressureClassifier<E>>,
    ) -> Self {
        Self {
            inner,
            adapter,
            classifier,
        }
    }

    /// The adapter shared by every clone of this service.
    pub fn adapter(&self) -> &BackpressureAdapter {
        &self.adapter
    }
}

impl<S: Clone, E> Clone for ElasticService<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            adapter: self.adapter.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<S, Request> Service<Request> for ElasticService<S, S::Error>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: From<ElasticError> + Send + 'static,
    Request: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let adapter = self.adapter.clone();
        let classifier = self.classifier.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let permit = match adapter.limiter().max_wait() {
                Some(limit) => adapter.acquire_owned_timeout(limit).await?,
                None => adapter.acquire_owned().await,
            };

            let result = inner.call(request).await;

            if let (Err(err), Some(classifier)) = (&result, &classifier) {
                if let Some(retry_delay) = classifier(err) {
                    adapter.report_backpressure(retry_delay);
                }
            }

            drop(permit);
            result
        })
    }
}
