use thiserror::Error;

use crate::phase::Phase;

/// Core error types for helmrel operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid release key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid {field} {value:?}: {reason}")]
    InvalidName {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Illegal phase transition from {from} to {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidKey error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidName error
    pub fn invalid_name(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidName {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new IllegalTransition error
    pub fn illegal_transition(from: Phase, to: Phase) -> Self {
        Self::IllegalTransition { from, to }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
