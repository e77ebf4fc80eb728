//! Configuration input-related errors.

/// Errors from reading monitor settings from provided input.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input format error with provided input.
    #[error("input format error: {0}")]
    Format(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    /// JSON syntax error.
    #[error("JSON parsing failure: {0}")]
    JSON(#[from] serde_json::Error),
}
