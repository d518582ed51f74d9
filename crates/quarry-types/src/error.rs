//! Error types shared across quarry crates.

use thiserror::Error;

/// Error type for configuration and record handling.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
