//! Events emitted by the elastic limiter.
//!
//! Every admission, release and backpressure correction produces an
//! [`ElasticEvent`]. Listeners are registered through the config builder
//! callbacks or directly with [`EventListeners::add`].

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Why a backpressure report left the limiter unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The report arrived while an earlier cooldown was still in effect.
    CooldownActive,
    /// The suggested retry delay was zero.
    ZeroDelay,
}

impl IgnoreReason {
    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::CooldownActive => "cooldown_active",
            IgnoreReason::ZeroDelay => "zero_delay",
        }
    }
}

/// Events emitted by an elastic limiter instance.
#[derive(Debug, Clone)]
pub enum ElasticEvent {
    /// A unit of work was admitted.
    Admitted {
        pattern_name: String,
        timestamp: Instant,
        /// In-flight count including this admission.
        in_flight: usize,
        /// Capacity observed at the moment of admission.
        capacity: usize,
        /// Time spent polling before admission.
        waited: Duration,
    },
    /// An admitted unit of work released its slot.
    Released {
        pattern_name: String,
        timestamp: Instant,
        in_flight: usize,
    },
    /// `release` was called with nothing in flight; the counter stayed at zero.
    OverReleased {
        pattern_name: String,
        timestamp: Instant,
    },
    /// A bounded wait gave up before admission.
    AcquireTimedOut {
        pattern_name: String,
        timestamp: Instant,
        waited: Duration,
    },
    /// A backpressure report shrank the safe base and started a cooldown.
    BackpressureApplied {
        pattern_name: String,
        timestamp: Instant,
        safe_base: usize,
        /// Time until the ramp resumes.
        cooldown: Duration,
    },
    /// A backpressure report was dropped.
    BackpressureIgnored {
        pattern_name: String,
        timestamp: Instant,
        reason: IgnoreReason,
    },
}

impl ElasticEvent {
    /// Returns the type of event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ElasticEvent::Admitted { .. } => "admitted",
            ElasticEvent::Released { .. } => "released",
            ElasticEvent::OverReleased { .. } => "over_released",
            ElasticEvent::AcquireTimedOut { .. } => "acquire_timed_out",
            ElasticEvent::BackpressureApplied { .. } => "backpressure_applied",
            ElasticEvent::BackpressureIgnored { .. } => "backpressure_ignored",
        }
    }

    /// Returns when this event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            ElasticEvent::Admitted { timestamp, .. }
            | ElasticEvent::Released { timestamp, .. }
            | ElasticEvent::OverReleased { timestamp, .. }
            | ElasticEvent::AcquireTimedOut { timestamp, .. }
            | ElasticEvent::BackpressureApplied { timestamp, .. }
            | ElasticEvent::BackpressureIgnored { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the name of the limiter that emitted this event.
    pub fn pattern_name(&self) -> &str {
        match self {
            ElasticEvent::Admitted { pattern_name, .. }
            | ElasticEvent::Released { pattern_name, .. }
            | ElasticEvent::OverReleased { pattern_name, .. }
            | ElasticEvent::AcquireTimedOut { pattern_name, .. }
            | ElasticEvent::BackpressureApplied { pattern_name, .. }
            | ElasticEvent::BackpressureIgnored { pattern_name, .. } => pattern_name,
        }
    }
}

/// Trait for listening to limiter events.
pub trait EventListener: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ElasticEvent);
}

/// A collection of event listeners.
#[derive(Clone, Default)]
pub struct EventListeners {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventListeners {
    /// Creates a new empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener to the collection.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to all registered listeners.
    ///
    /// A panicking listener does not stop delivery to the rest.
    pub fn emit(&self, event: &ElasticEvent) {
        for listener in &self.listeners {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// A closure-backed event listener.
pub struct FnListener<F>
where
    F: Fn(&ElasticEvent) + Send + Sync,
{
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&ElasticEvent) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&ElasticEvent) + Send + Sync,
{
    fn on_event(&self, event: &ElasticEvent) {
        (self.f)(event)
    }
}
