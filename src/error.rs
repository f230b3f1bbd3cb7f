//! Error types for the limiter and its stores.

use thiserror::Error;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The limiter was built with a zero limit or without a store.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The backing medium could not complete the operation.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration file parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Shorthand for a [`LimiterError::StoreUnavailable`] built from any displayable cause.
    pub fn unavailable(cause: impl std::fmt::Display) -> Self {
        LimiterError::StoreUnavailable(cause.to_string())
    }

    /// Whether this error came from the backing medium.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, LimiterError::StoreUnavailable(_))
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
