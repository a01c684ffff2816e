//! Error types for the readiness battery

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while running or scoring a test session
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Event buffer full (capacity {capacity}), event dropped")]
    CapacityExceeded { capacity: usize },

    #[error("Invalid scheduler transition: {0}")]
    InvalidTransition(String),

    #[error("Session {0} was aborted by the user")]
    SessionAborted(Uuid),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}
