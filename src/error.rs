//! Cogmem error types

use thiserror::Error;

/// Cogmem error type
#[derive(Error, Debug)]
pub enum Error {
    /// Missing required field or violated validation rule. Rejected before any write.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity, edge, predicate or run does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness or version conflict that could not be absorbed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Generative model, embedding service or vector tier unavailable
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Background queue is at capacity
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relational store error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a background job hitting this error should be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Http(_))
    }

    /// Stable machine-readable code used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Upstream(_) | Self::Http(_) => "UPSTREAM_ERROR",
            Self::QueueFull(_) => "QUEUE_FULL",
            _ => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for Cogmem operations
pub type Result<T> = std::result::Result<T, Error>;
