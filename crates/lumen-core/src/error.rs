//! Error types for lumen.

use thiserror::Error;

use crate::models::QueueStatus;

/// Result type alias using lumen's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lumen operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Photo not found
    #[error("Photo not found: {0}")]
    PhotoNotFound(i64),

    /// Person not found
    #[error("Person not found: {0}")]
    PersonNotFound(i64),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Face detection failed
    #[error("Face detection error: {0}")]
    FaceDetection(String),

    /// Vector index insert or query failed
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Thumbnail or frame extraction failed
    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    /// Queue item status change not permitted from its current status
    #[error("Invalid queue transition for item {item_id}: {from} -> {to}")]
    InvalidTransition {
        item_id: i64,
        from: QueueStatus,
        to: QueueStatus,
    },

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Search operation failed
    #[error("Search error: {0}")]
    Search(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from an external model, subprocess, or index
    /// call rather than the relational store.
    ///
    /// Enrichment steps downgrade these to a negative step result; every
    /// other error fails the queue item.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Error::Embedding(_)
                | Error::FaceDetection(_)
                | Error::VectorIndex(_)
                | Error::Thumbnail(_)
                | Error::Request(_)
                | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
