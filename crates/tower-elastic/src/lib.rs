//! Elastic concurrency limiting for Tower services.
//!
//! The elastic limiter gates how many operations may be in flight against a
//! downstream service whose capacity is unknown and changes over time. It
//! starts at a conservative safe base, adds one slot of capacity every
//! `ramp_step`, and collapses back when the downstream service pushes back
//! (for example with an HTTP 429 carrying a retry delay).
//!
//! - [`ElasticLimiter`] owns the in-flight counter and the time-based
//!   capacity function, and offers polling `acquire` / `release`.
//! - [`BackpressureAdapter`] wraps a limiter and applies backpressure
//!   corrections: shrink the safe base to just below the observed
//!   concurrency and pin capacity to 1 until the suggested delay has passed.
//! - [`ElasticLayer`] plugs both into a Tower stack.
//!
//! # Basic Example
//!
//! ```rust
//! use tower_elastic::{BackpressureAdapter, ElasticConfig};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! # async fn example() -> Result<(), tower_elastic::ElasticError> {
//! let limiter = ElasticConfig::builder(Instant::now())
//!     .safe_base(1)
//!     .ramp_step(Duration::from_secs(10))
//!     .poll_interval(Duration::from_millis(250))
//!     .name("llm-api")
//!     .build()?;
//! let adapter = BackpressureAdapter::new(limiter);
//!
//! let permit = adapter.acquire_owned().await;
//! // ... call the downstream service ...
//! # let rate_limited: Option<Duration> = None;
//! if let Some(retry_after) = rate_limited {
//!     adapter.report_backpressure(retry_after);
//! }
//! drop(permit);
//! # Ok(())
//! # }
//! ```
//!
//! # Capacity
//!
//! ```text
//! capacity(now) = 1                                            if now < ramp_origin
//!               = safe_base + floor((now - ramp_origin) / ramp_step)  otherwise
//! ```
//!
//! A unit of work is admitted when `in_flight < capacity(now)`. Waiters
//! re-check on a fixed `poll_interval`; there is no FIFO ordering among them.
//!
//! # Features
//!
//! - `tracing` (default): structured logs for admissions, over-releases and
//!   backpressure corrections.
//! - `metrics`: counters, gauges and a wait-time histogram via the `metrics`
//!   facade.

pub mod backpressure;
pub mod config;
pub mod error;
pub mod events;
pub mod layer;
pub mod limiter;
pub mod service;

pub use backpressure::{BackpressureAdapter, BackpressureOutcome, MAX_COOLDOWN};
pub use config::{ElasticConfig, ElasticConfigBuilder};
pub use error::{ElasticError, Result};
pub use events::{ElasticEvent, EventListener, EventListeners, FnListener, IgnoreReason};
pub use layer::ElasticLayer;
pub use limiter::{ElasticLimiter, ElasticPermit, LimiterSnapshot, LimiterState};
pub use service::{BackpressureClassifier, ElasticService};
