//! The elastic limiter: a time-ramped admission gate.

use crate::config::ElasticConfig;
use crate::error::{ElasticError, Result};
use crate::events::ElasticEvent;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge, histogram};

/// Phase of the ramp at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterState {
    /// Capacity grows from the safe base, one slot per ramp step.
    Ramping,
    /// A backpressure cooldown is in effect; capacity is pinned to 1.
    Cooldown,
}

/// Point-in-time view of a limiter, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSnapshot {
    pub in_flight: usize,
    pub capacity: usize,
    pub safe_base: usize,
    pub ramp_origin: Instant,
    pub state: LimiterState,
}

/// Mutable state shared by every caller, guarded by one lock.
#[derive(Debug)]
pub(crate) struct RampState {
    pub(crate) in_flight: usize,
    pub(crate) safe_base: usize,
    pub(crate) ramp_origin: Instant,
}

impl RampState {
    pub(crate) fn capacity_at(&self, now: Instant, ramp_step: Duration) -> usize {
        if now < self.ramp_origin {
            return 1;
        }
        let elapsed = now.duration_since(self.ramp_origin);
        let steps = elapsed.as_nanos() / ramp_step.as_nanos();
        let steps = usize::try_from(steps).unwrap_or(usize::MAX);
        self.safe_base.saturating_add(steps)
    }

    pub(crate) fn state_at(&self, now: Instant) -> LimiterState {
        if now < self.ramp_origin {
            LimiterState::Cooldown
        } else {
            LimiterState::Ramping
        }
    }
}

/// Adaptive admission gate whose capacity ramps up linearly over time.
///
/// Capacity starts at the safe base when the ramp origin is reached and grows
/// by one slot every `ramp_step`. Before the ramp origin, capacity is 1.
/// Callers wait for admission with [`acquire`](Self::acquire) and hand the
/// slot back with [`release`](Self::release); backpressure corrections go
/// through [`BackpressureAdapter`](crate::BackpressureAdapter).
///
/// One limiter is meant to be shared (via `Arc`) by every worker talking to
/// the same downstream destination.
pub struct ElasticLimiter {
    state: Mutex<RampState>,
    config: ElasticConfig,
}

impl ElasticLimiter {
    pub(crate) fn new(config: ElasticConfig) -> Self {
        let state = RampState {
            in_flight: config.initial_in_flight,
            safe_base: config.safe_base,
            ramp_origin: config.ramp_origin,
        };
        Self {
            state: Mutex::new(state),
            config,
        }
    }

    /// Locks the shared state.
    ///
    /// Nothing panics while the lock is held, so a poisoned lock still
    /// carries consistent state and is recovered.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RampState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: &ElasticEvent) {
        self.config.event_listeners.emit(event);
    }

    /// Capacity at the given instant.
    pub fn capacity_at(&self, now: Instant) -> usize {
        self.lock_state().capacity_at(now, self.config.ramp_step)
    }

    /// Capacity right now.
    pub fn capacity(&self) -> usize {
        self.capacity_at(Instant::now())
    }

    /// Returns true if no further admission is possible right now.
    pub fn locked(&self) -> bool {
        let now = Instant::now();
        let state = self.lock_state();
        state.in_flight >= state.capacity_at(now, self.config.ramp_step)
    }

    /// Number of currently admitted units.
    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    /// Current safe base.
    pub fn safe_base(&self) -> usize {
        self.lock_state().safe_base
    }

    /// Current ramp origin.
    pub fn ramp_origin(&self) -> Instant {
        self.lock_state().ramp_origin
    }

    /// Ramp phase at the given instant.
    pub fn state_at(&self, now: Instant) -> LimiterState {
        self.lock_state().state_at(now)
    }

    /// Consistent view of every field, taken under one lock.
    pub fn snapshot(&self) -> LimiterSnapshot {
        let now = Instant::now();
        let state = self.lock_state();
        LimiterSnapshot {
            in_flight: state.in_flight,
            capacity: state.capacity_at(now, self.config.ramp_step),
            safe_base: state.safe_base,
            ramp_origin: state.ramp_origin,
            state: state.state_at(now),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ramp_step(&self) -> Duration {
        self.config.ramp_step
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.config.max_wait
    }

    /// Admits one unit if capacity allows, without waiting.
    pub fn try_acquire(&self) -> bool {
        self.try_admit(Instant::now()).is_some()
    }

    /// Waits until admission is granted.
    ///
    /// Capacity is re-checked every `poll_interval`. Dropping the returned
    /// future before it completes leaves the in-flight count untouched, so a
    /// cancelled wait needs no matching [`release`](Self::release).
    pub async fn acquire(&self) {
        let started = Instant::now();
        while self.try_admit(started).is_none() {
            sleep(self.config.poll_interval).await;
        }
    }

    /// Waits for admission for at most `limit`.
    pub async fn acquire_timeout(&self, limit: Duration) -> Result<()> {
        match tokio::time::timeout(limit, self.acquire()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.timed_out(limit)),
        }
    }

    /// Waits for admission and returns a permit that releases on drop.
    pub async fn acquire_owned(self: Arc<Self>) -> ElasticPermit {
        self.acquire().await;
        ElasticPermit { limiter: self }
    }

    /// Like [`acquire_owned`](Self::acquire_owned), giving up after `limit`.
    pub async fn acquire_owned_timeout(self: Arc<Self>, limit: Duration) -> Result<ElasticPermit> {
        self.acquire_timeout(limit).await?;
        Ok(ElasticPermit { limiter: self })
    }

    /// Gives back one admission slot.
    ///
    /// Releasing with nothing in flight keeps the count at zero and is
    /// reported as an over-release.
    pub fn release(&self) {
        let remaining = {
            let mut state = self.lock_state();
            if state.in_flight == 0 {
                None
            } else {
                state.in_flight -= 1;
                Some(state.in_flight)
            }
        };

        match remaining {
            Some(in_flight) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(limiter = %self.config.name, in_flight, "elastic limiter released slot");

                #[cfg(feature = "metrics")]
                gauge!("elastic_in_flight", "limiter" => self.config.name.clone())
                    .set(in_flight as f64);

                self.emit(&ElasticEvent::Released {
                    pattern_name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    in_flight,
                });
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    limiter = %self.config.name,
                    "release called with nothing in flight; in-flight count clamped at zero"
                );

                #[cfg(feature = "metrics")]
                counter!("elastic_over_releases_total", "limiter" => self.config.name.clone())
                    .increment(1);

                self.emit(&ElasticEvent::OverReleased {
                    pattern_name: self.config.name.clone(),
                    timestamp: Instant::now(),
                });
            }
        }
    }

    /// Check-and-increment in one critical section.
    ///
    /// Returns the in-flight count and capacity at admission.
    fn try_admit(&self, started: Instant) -> Option<(usize, usize)> {
        let now = Instant::now();
        let (in_flight, capacity) = {
            let mut state = self.lock_state();
            let capacity = state.capacity_at(now, self.config.ramp_step);
            if state.in_flight >= capacity {
                return None;
            }
            state.in_flight += 1;
            (state.in_flight, capacity)
        };

        let waited = now.duration_since(started);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            limiter = %self.config.name,
            in_flight,
            capacity,
            waited_ms = waited.as_millis() as u64,
            "elastic limiter admitted call"
        );

        #[cfg(feature = "metrics")]
        {
            let name = self.config.name.clone();
            counter!("elastic_calls_admitted_total", "limiter" => name.clone()).increment(1);
            gauge!("elastic_in_flight", "limiter" => name.clone()).set(in_flight as f64);
            gauge!("elastic_capacity", "limiter" => name.clone()).set(capacity as f64);
            histogram!("elastic_wait_duration_seconds", "limiter" => name)
                .record(waited.as_secs_f64());
        }

        self.emit(&ElasticEvent::Admitted {
            pattern_name: self.config.name.clone(),
            timestamp: now,
            in_flight,
            capacity,
            waited,
        });

        Some((in_flight, capacity))
    }

    fn timed_out(&self, waited: Duration) -> ElasticError {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            limiter = %self.config.name,
            waited_ms = waited.as_millis() as u64,
            "timed out waiting for elastic limiter admission"
        );

        #[cfg(feature = "metrics")]
        counter!("elastic_calls_timed_out_total", "limiter" => self.config.name.clone())
            .increment(1);

        self.emit(&ElasticEvent::AcquireTimedOut {
            pattern_name: self.config.name.clone(),
            timestamp: Instant::now(),
            waited,
        });

        ElasticError::Timeout { waited }
    }
}

impl std::fmt::Debug for ElasticLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticLimiter")
            .field("name", &self.config.name)
            .field("snapshot", &self.snapshot())
            .field("ramp_step", &self.config.ramp_step)
            .field("poll_interval", &self.config.poll_interval)
            .finish()
    }
}

/// An admission held against an [`ElasticLimiter`].
///
/// The slot is released when the permit is dropped.
#[must_use = "dropping the permit releases the admission immediately"]
pub struct ElasticPermit {
    limiter: Arc<ElasticLimiter>,
}

impl ElasticPermit {
    /// The limiter this permit was granted by.
    pub fn limiter(&self) -> &Arc<ElasticLimiter> {
        &self.limiter
    }
}

impl Drop for ElasticPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl std::fmt::Debug for ElasticPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticPermit")
            .field("limiter", &self.limiter.name())
            .finish()
    }
}
