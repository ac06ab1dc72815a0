//! Error types shared by Tabload crates

use thiserror::Error;

/// Result type alias for Tabload operations
pub type Result<T> = std::result::Result<T, TabloadError>;

/// Errors that are not specific to one stage of a load
#[derive(Error, Debug)]
pub enum TabloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A text encoding label that `encoding_rs` does not recognise
    #[error("Unknown text encoding '{0}'. Use a WHATWG label such as 'utf-8' or 'latin1'.")]
    UnknownEncoding(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl TabloadError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
