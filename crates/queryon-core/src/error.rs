// Error types for the routing core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, QueryonError>;

/// Errors that can occur while routing a turn or serving an admin operation
#[derive(Debug, Error)]
pub enum QueryonError {
    /// Invalid or missing configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bad user or API input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// State conflict (duplicate name, reschedule over a busy slot)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// LLM / embedding / calendar provider failure
    #[error("External service error: {0}")]
    ExternalService(String),

    /// An LLM or provider call exceeded its deadline
    #[error("Timed out after {0:.0}s")]
    Timeout(f64),

    /// Too many requests
    #[error("Rate limited: {0}")]
    RateLimit(String),

    /// Storage layer failure (propagated, rolls the request back)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl QueryonError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        QueryonError::Configuration(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        QueryonError::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        QueryonError::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        QueryonError::Conflict(msg.into())
    }

    /// Create an external-service error
    pub fn external(msg: impl Into<String>) -> Self {
        QueryonError::ExternalService(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        QueryonError::Storage(msg.into())
    }
}
