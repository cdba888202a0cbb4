//! Backpressure corrections for an elastic limiter.
//!
//! When the downstream service rejects work because it is overloaded and
//! suggests a retry delay, [`BackpressureAdapter::report_backpressure`]
//! collapses the ramp:
//!
//! 1. the safe base shrinks to one below what was in flight when the
//!    rejection happened (never below 1), and
//! 2. the ramp origin moves to `now + retry_delay`, never backward.
//!
//! Until the new origin is reached capacity is pinned to 1; afterwards the
//! ramp resumes from the reduced safe base. Reports that arrive while a
//! cooldown is already running are stragglers from the same overload episode
//! and are ignored.

use crate::error::Result;
use crate::events::{ElasticEvent, IgnoreReason};
use crate::limiter::{ElasticLimiter, ElasticPermit};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Upper bound applied to suggested retry delays, so `now + delay` cannot overflow.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Result of a backpressure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureOutcome {
    /// The correction took effect.
    Applied {
        /// New safe base.
        safe_base: usize,
        /// Instant at which the ramp resumes.
        ramp_origin: Instant,
    },
    /// The limiter was left unchanged.
    Ignored(IgnoreReason),
}

impl BackpressureOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, BackpressureOutcome::Applied { .. })
    }
}

/// An [`ElasticLimiter`] that reacts to backpressure signals.
///
/// The adapter owns a shared handle to the limiter and delegates admission
/// to it; cloning the adapter shares the same limiter.
///
/// # Example
///
/// ```rust
/// use tower_elastic::{BackpressureAdapter, ElasticConfig};
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// # async fn example() -> Result<(), tower_elastic::ElasticError> {
/// let limiter = ElasticConfig::builder(Instant::now())
///     .safe_base(1)
///     .ramp_step(Duration::from_secs(10))
///     .build()?;
/// let adapter = BackpressureAdapter::new(limiter);
///
/// adapter.acquire().await;
/// // ... call the downstream service; it answers "429, retry in 20s" ...
/// adapter.report_backpressure(Duration::from_secs(20));
/// adapter.release();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackpressureAdapter {
    limiter: Arc<ElasticLimiter>,
}

impl BackpressureAdapter {
    pub fn new(limiter: ElasticLimiter) -> Self {
        Self::from_shared(Arc::new(limiter))
    }

    /// Wraps a limiter that is already shared elsewhere.
    pub fn from_shared(limiter: Arc<ElasticLimiter>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<ElasticLimiter> {
        &self.limiter
    }

    /// Reports that the downstream service is overloaded.
    ///
    /// `retry_delay` is the wait the downstream service suggested before
    /// retrying.
    pub fn report_backpressure(&self, retry_delay: Duration) -> BackpressureOutcome {
        self.report_backpressure_at(Instant::now(), retry_delay)
    }

    /// Same as [`report_backpressure`](Self::report_backpressure) with an
    /// explicit observation instant.
    pub fn report_backpressure_at(&self, now: Instant, retry_delay: Duration) -> BackpressureOutcome {
        if retry_delay.is_zero() {
            return self.ignored(IgnoreReason::ZeroDelay);
        }

        let (safe_base, ramp_origin) = {
            let mut state = self.limiter.lock_state();
            if now < state.ramp_origin {
                drop(state);
                return self.ignored(IgnoreReason::CooldownActive);
            }
            state.safe_base = state.in_flight.saturating_sub(1).max(1);
            state.ramp_origin = state.ramp_origin.max(now + retry_delay.min(MAX_COOLDOWN));
            (state.safe_base, state.ramp_origin)
        };

        let cooldown = ramp_origin.saturating_duration_since(now);
        let name = self.limiter.name();

        #[cfg(feature = "tracing")]
        tracing::info!(
            limiter = %name,
            safe_base,
            cooldown_ms = cooldown.as_millis() as u64,
            "backpressure reported, elastic limiter entering cooldown"
        );

        #[cfg(feature = "metrics")]
        {
            counter!("elastic_backpressure_total", "limiter" => name.to_string(), "result" => "applied")
                .increment(1);
            gauge!("elastic_safe_base", "limiter" => name.to_string()).set(safe_base as f64);
        }

        self.limiter.emit(&ElasticEvent::BackpressureApplied {
            pattern_name: name.to_string(),
            timestamp: now,
            safe_base,
            cooldown,
        });

        BackpressureOutcome::Applied {
            safe_base,
            ramp_origin,
        }
    }

    fn ignored(&self, reason: IgnoreReason) -> BackpressureOutcome {
        let name = self.limiter.name();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            limiter = %name,
            reason = reason.as_str(),
            "backpressure report ignored"
        );

        #[cfg(feature = "metrics")]
        counter!("elastic_backpressure_total", "limiter" => name.to_string(), "result" => "ignored")
            .increment(1);

        self.limiter.emit(&ElasticEvent::BackpressureIgnored {
            pattern_name: name.to_string(),
            timestamp: Instant::now(),
            reason,
        });

        BackpressureOutcome::Ignored(reason)
    }

    pub async fn acquire(&self) {
        self.limiter.acquire().await
    }

    pub async fn acquire_timeout(&self, limit: Duration) -> Result<()> {
        self.limiter.acquire_timeout(limit).await
    }

    pub async fn acquire_owned(&self) -> ElasticPermit {
        Arc::clone(&self.limiter).acquire_owned().await
    }

    pub async fn acquire_owned_timeout(&self, limit: Duration) -> Result<ElasticPermit> {
        Arc::clone(&self.limiter).acquire_owned_timeout(limit).await
    }

    pub fn try_acquire(&self) -> bool {
        self.limiter.try_acquire()
    }

    pub fn release(&self) {
        self.limiter.release()
    }

    pub fn capacity(&self) -> usize {
        self.limiter.capacity()
    }

    pub fn locked(&self) -> bool {
        self.limiter.locked()
    }
}

impl From<ElasticLimiter> for BackpressureAdapter {
    fn from(limiter: ElasticLimiter) -> Self {
        Self::new(limiter)
    }
}
