//! Error types for the Duello client.

use thiserror::Error;

/// Errors that can occur when using the Duello client.
#[derive(Debug, Error)]
pub enum DuelloError {
    /// A required input was missing or malformed. No network call was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request could not reach the server or the connection broke mid-flight.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success HTTP status.
    ///
    /// `message` carries the server-supplied error body field when present,
    /// otherwise the raw status code.
    #[error("http error {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Human-readable error message.
        message: String,
    },

    /// The server answered 200 but the body declared `success: false`.
    #[error("api error: {message}")]
    Api {
        /// Human-readable error message from the response body.
        message: String,
    },

    /// Failed to serialize or deserialize a protocol payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The push channel or a background task is closed.
    #[error("channel closed")]
    Closed,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Duello client operations.
pub type Result<T> = std::result::Result<T, DuelloError>;
