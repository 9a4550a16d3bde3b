//! Error types for the dispatcher.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::DispatchState;

/// Main error type for dispatcher operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pacing policy that cannot admit anything
    #[error("Invalid pacing policy: {0}")]
    InvalidPolicy(String),

    /// A processor reported failure for a request
    #[error("Processing {label} failed: {reason}")]
    Processing { label: String, reason: String },

    /// A single processing attempt exceeded the task timeout
    #[error("Processing {label} timed out after {timeout:?}")]
    Timeout { label: String, timeout: Duration },

    /// Run state moved backwards or skipped to an unreachable state
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: DispatchState,
        to: DispatchState,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Convenience constructor for processor failures.
    pub fn processing(label: impl Into<String>, reason: impl Into<String>) -> Self {
        DispatchError::Processing {
            label: label.into(),
            reason: reason.into(),
        }
    }
}

impl From<::config::ConfigError> for DispatchError {
    fn from(err: ::config::ConfigError) -> Self {
        DispatchError::Config(err.to_string())
    }
}

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
