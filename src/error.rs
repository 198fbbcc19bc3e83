//! Error types for the stack-frame simulator.
//!
//! The simulation operations themselves never fail: out-of-frame writes are
//! dropped and exhausted plans are no-ops. Errors only arise while building a
//! session from configuration or when a collaborator hands over input that
//! was never sanitized.

use thiserror::Error;

/// Validation errors raised for configuration and collaborator input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid simulator config: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Plan length {length} exceeds maximum of {max_length}")]
    PlanTooLong {
        length: usize,
        max_length: usize,
    },

    #[error("Unknown write pattern '{name}'")]
    UnknownPattern {
        name: String,
    },

    #[error("Failed to parse config: {message}")]
    MalformedConfig {
        message: String,
    },
}

/// Errors from the background stage scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Stage scheduler disconnected")]
    Disconnected,

    #[error("Timed out after {duration_ms}ms waiting for phase to settle")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for the simulator.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SimError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a scheduler error.
    #[must_use]
    pub const fn is_scheduler(&self) -> bool {
        matches!(self, Self::Scheduler(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for simulator operations.
pub type SimResult<T> = Result<T, SimError>;
