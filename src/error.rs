//! Error types for the monitoring pipeline

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the monitoring pipeline
///
/// Deliberately small: admission rejection is a `FilterResult` value, factor
/// failures degrade to fallback scores, and missing outcomes are `Ok(None)`.
/// Only genuinely failed operations surface here.
#[derive(Error, Debug)]
pub enum Error {
    // Market data errors
    #[error("Market data fetch failed: {0}")]
    MarketData(String),

    // Filter errors
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::MarketData(_))
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::MarketData(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
