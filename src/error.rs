// src/error.rs

//! Unified error handling for the import pipelines.
//!
//! Transport, status and payload-shape failures that make a whole step
//! impossible are values of [`AppError`] and end the run. A single
//! malformed record is not an error: pipelines log it and move on.

use std::fmt;

use thiserror::Error;

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// XML document could not be read
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Database statement failed
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Server answered with a status outside the retry set
    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Every attempt allowed by the retry policy failed
    #[error("Could not fetch {url} after {attempts} attempts (last: {last})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    /// A document does not have the shape a step depends on
    #[error("Unexpected payload from {source_name}: {message}")]
    Payload {
        source_name: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Interactive prompt failed
    #[error("Prompt error: {0}")]
    Prompt(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a payload error naming the document it came from.
    pub fn payload(source_name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Payload {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Create a prompt error.
    pub fn prompt(message: impl fmt::Display) -> Self {
        Self::Prompt(message.to_string())
    }

    /// True for the fail-fast network categories (exhausted retries or a
    /// non-retryable status).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::RetriesExhausted { .. })
    }
}
