//! Configuration for the elastic limiter.

use crate::error::{ElasticError, Result};
use crate::events::{ElasticEvent, EventListeners, FnListener};
use crate::limiter::ElasticLimiter;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge, describe_histogram};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Configuration for an elastic limiter.
#[derive(Clone, Debug)]
pub struct ElasticConfig {
    /// Concurrency guaranteed once the ramp is active.
    pub(crate) safe_base: usize,
    /// Interval after which capacity grows by one.
    pub(crate) ramp_step: Duration,
    /// Instant from which the ramp is measured.
    pub(crate) ramp_origin: Instant,
    /// Admissions already outstanding at construction.
    pub(crate) initial_in_flight: usize,
    /// Delay between capacity re-checks while waiting.
    pub(crate) poll_interval: Duration,
    /// Maximum wait used by the tower service.
    pub(crate) max_wait: Option<Duration>,
    /// Name of this limiter instance.
    pub(crate) name: String,
    /// Event listeners.
    pub(crate) event_listeners: EventListeners,
}

impl ElasticConfig {
    /// Creates a new configuration builder.
    ///
    /// The ramp origin is always explicit. Pass `Instant::now()` to start
    /// ramping immediately, or a later instant to begin in cooldown.
    pub fn builder(ramp_origin: Instant) -> ElasticConfigBuilder {
        #[cfg(feature = "metrics")]
        {
            METRICS_INIT.call_once(|| {
                describe_counter!(
                    "elastic_calls_admitted_total",
                    "Total number of units of work admitted by the limiter"
                );
                describe_counter!(
                    "elastic_calls_timed_out_total",
                    "Total number of bounded waits that gave up before admission"
                );
                describe_counter!(
                    "elastic_over_releases_total",
                    "Total number of releases with nothing in flight"
                );
                describe_counter!(
                    "elastic_backpressure_total",
                    "Total number of backpressure reports, by result"
                );
                describe_gauge!("elastic_in_flight", "Current number of admitted units");
                describe_gauge!("elastic_capacity", "Capacity observed at the last admission");
                describe_gauge!("elastic_safe_base", "Current safe base concurrency");
                describe_histogram!(
                    "elastic_wait_duration_seconds",
                    "Time spent waiting for admission"
                );
            });
        }
        ElasticConfigBuilder::new(ramp_origin)
    }

    /// Checks the parameters the capacity function depends on.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.ramp_step.is_zero() {
            return Err(ElasticError::InvalidConfig {
                reason: "ramp_step must be greater than zero",
            });
        }
        if self.safe_base == 0 {
            return Err(ElasticError::InvalidConfig {
                reason: "safe_base must be at least 1",
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ElasticError::InvalidConfig {
                reason: "poll_interval must be greater than zero",
            });
        }
        Ok(())
    }
}

/// Builder for [`ElasticConfig`].
pub struct ElasticConfigBuilder {
    safe_base: usize,
    ramp_step: Duration,
    ramp_origin: Instant,
    initial_in_flight: usize,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    name: String,
    event_listeners: EventListeners,
}

impl ElasticConfigBuilder {
    /// Creates a new builder with default values and the given ramp origin.
    ///
    /// Defaults:
    /// - safe_base: 1
    /// - ramp_step: 10 seconds
    /// - initial_in_flight: 0
    /// - poll_interval: 1 second
    /// - max_wait: None
    /// - name: `"elastic"`
    pub fn new(ramp_origin: Instant) -> Self {
        Self {
            safe_base: 1,
            ramp_step: Duration::from_secs(10),
            ramp_origin,
            initial_in_flight: 0,
            poll_interval: Duration::from_secs(1),
            max_wait: None,
            name: "elastic".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the concurrency guaranteed once the ramp is active.
    ///
    /// Must be at least 1. Default: 1
    pub fn safe_base(mut self, base: usize) -> Self {
        self.safe_base = base;
        self
    }

    /// Sets the interval after which capacity grows by one slot.
    ///
    /// Must be non-zero. Default: 10 seconds
    pub fn ramp_step(mut self, step: Duration) -> Self {
        self.ramp_step = step;
        self
    }

    /// Sets the number of admissions already outstanding.
    ///
    /// Default: 0
    pub fn initial_in_flight(mut self, in_flight: usize) -> Self {
        self.initial_in_flight = in_flight;
        self
    }

    /// Sets how often a waiting caller re-checks capacity.
    ///
    /// Admission latency after a slot frees up is at most one interval.
    /// Default: 1 second
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum time the tower service waits for admission.
    ///
    /// If `None`, the service waits indefinitely.
    /// Default: None
    pub fn max_wait(mut self, duration: Option<Duration>) -> Self {
        self.max_wait = duration;
        self
    }

    /// Sets the name of this limiter instance.
    ///
    /// Default: "elastic"
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback when a unit of work is admitted.
    ///
    /// # Callback Signature
    /// `Fn(usize, usize)` - Called with the in-flight count including this
    /// admission and the capacity observed when it was granted.
    ///
    /// # Example
    /// ```rust
    /// use tower_elastic::ElasticConfig;
    /// use tokio::time::Instant;
    ///
    /// let limiter = ElasticConfig::builder(Instant::now())
    ///     .on_admitted(|in_flight, capacity| {
    ///         println!("admitted: {}/{}", in_flight, capacity);
    ///     })
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ElasticEvent::Admitted {
                in_flight,
                capacity,
                ..
            } = event
            {
                f(*in_flight, *capacity);
            }
        }));
        self
    }

    /// Registers a callback when an admitted unit releases its slot.
    ///
    /// # Callback Signature
    /// `Fn(usize)` - Called with the in-flight count after the release.
    pub fn on_released<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ElasticEvent::Released { in_flight, .. } = event {
                f(*in_flight);
            }
        }));
        self
    }

    /// Registers a callback when `release` is called with nothing in flight.
    ///
    /// This always indicates a caller bug: more releases than admissions.
    pub fn on_over_released<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ElasticEvent::OverReleased { .. } = event {
                f();
            }
        }));
        self
    }

    /// Registers a callback when a bounded wait gives up.
    ///
    /// # Callback Signature
    /// `Fn(Duration)` - Called with how long the caller waited.
    pub fn on_acquire_timed_out<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ElasticEvent::AcquireTimedOut { waited, .. } = event {
                f(*waited);
            }
        }));
        self
    }

    /// Registers a callback when a backpressure report takes effect.
    ///
    /// # Callback Signature
    /// `Fn(usize, Duration)` - Called with the new safe base and the length
    /// of the cooldown that was started.
    ///
    /// # Example
    /// ```rust
    /// use tower_elastic::ElasticConfig;
    /// use tokio::time::Instant;
    ///
    /// let limiter = ElasticConfig::builder(Instant::now())
    ///     .name("llm-api")
    ///     .on_backpressure_applied(|safe_base, cooldown| {
    ///         println!("backing off for {:?}, resuming from {}", cooldown, safe_base);
    ///     })
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn on_backpressure_applied<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ElasticEvent::BackpressureApplied {
                safe_base,
                cooldown,
                ..
            } = event
            {
                f(*safe_base, *cooldown);
            }
        }));
        self
    }

    /// Registers a callback when a backpressure report is dropped.
    pub fn on_backpressure_ignored<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::IgnoreReason) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ElasticEvent::BackpressureIgnored { reason, .. } = event {
                f(*reason);
            }
        }));
        self
    }

    /// Validates the configuration and builds the limiter.
    ///
    /// Fails with [`ElasticError::InvalidConfig`] when `ramp_step` or
    /// `poll_interval` is zero, or `safe_base` is zero.
    pub fn build(self) -> Result<ElasticLimiter> {
        let config = ElasticConfig {
            safe_base: self.safe_base,
            ramp_step: self.ramp_step,
            ramp_origin: self.ramp_origin,
            initial_in_flight: self.initial_in_flight,
            poll_interval: self.poll_interval,
            max_wait: self.max_wait,
            name: self.name,
            event_listeners: self.event_listeners,
        };
        config.validate()?;
        Ok(ElasticLimiter::new(config))
    }
}
