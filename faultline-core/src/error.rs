//! Error types for faultline-core
//!
//! Only construction and configuration return these. Reporting entry points
//! never surface an error to the caller.

use thiserror::Error;

/// Main error type for the faultline-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for faultline-core
pub type Result<T> = std::result::Result<T, Error>;
