//! Error types for the elastic limiter.

use std::time::Duration;

/// Errors that can occur when building or using an elastic limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElasticError {
    /// The limiter configuration was rejected at construction.
    #[error("invalid elastic limiter configuration: {reason}")]
    InvalidConfig {
        /// Which parameter was rejected and why.
        reason: &'static str,
    },
    /// No admission was granted within the allowed wait.
    #[error("timeout waiting for elastic limiter admission after {waited:?}")]
    Timeout {
        /// How long the caller waited before giving up.
        waited: Duration,
    },
}

impl ElasticError {
    /// Returns true if this is a wait timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ElasticError::Timeout { .. })
    }
}

/// Result type for elastic limiter operations.
pub type Result<T> = std::result::Result<T, ElasticError>;
