//! Error handling module for VidStream

use thiserror::Error;

use crate::domain::errors::DomainError;

/// Main error type for VidStream operations
#[derive(Error, Debug)]
pub enum VidStreamError {
    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Listening socket could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Domain-level failure (catalog, encoder, client state)
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for VidStream operations
pub type VidStreamResult<T> = std::result::Result<T, VidStreamError>;
