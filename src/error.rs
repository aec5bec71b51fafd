// src/error.rs

//! Unified error handling for the refresher.

use std::fmt;

use thiserror::Error;

/// Result type alias for refresher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed before a status was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Upstream metrics endpoint answered with a non-200 status
    #[error("HTTP {status} from metrics endpoint for {id}")]
    UpstreamStatus { id: String, status: u16 },

    /// Store answered with a non-success status
    #[error("store {context} failed with HTTP {status}: {body}")]
    StoreStatus {
        context: String,
        status: u16,
        body: String,
    },

    /// Store operation failed for a reason other than HTTP status
    #[error("store {context} failed: {message}")]
    Store { context: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A worker task panicked or was aborted
    #[error("worker task failed: {0}")]
    Task(String),
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

    /// Create a store error with context.
    pub fn store(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Store {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a worker task error.
    pub fn task(message: impl fmt::Display) -> Self {
        Self::Task(message.to_string())
    }

    /// Whether retrying the same request later could plausibly succeed.
    ///
    /// Client errors other than 408 and 429 are treated as permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::UpstreamStatus { status, .. } | Self::StoreStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_transience() {
        let server = AppError::UpstreamStatus {
            id: "42".into(),
            status: 500,
        };
        let throttled = AppError::UpstreamStatus {
            id: "42".into(),
            status: 429,
        };
        let missing = AppError::UpstreamStatus {
            id: "42".into(),
            status: 404,
        };
        assert!(server.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn display_includes_status_and_id() {
        let err = AppError::UpstreamStatus {
            id: "42".into(),
            status: 500,
        };
        assert_eq!(err.to_string(), "HTTP 500 from metrics endpoint for 42");
    }
}
