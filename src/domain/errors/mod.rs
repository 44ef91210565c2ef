// Domain errors - Error types for the domain layer

use std::fmt;

/// Domain-specific error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// File not found
    FileNotFound(String),
    /// File system operation failed
    FsFail(String),
    /// External process exited unsuccessfully
    ProcessFailed(String),
    /// Resource not available
    ResourceUnavailable(String),
    /// Operation requires a live connection
    NotConnected,
    /// Internal error
    InternalError(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            DomainError::FsFail(msg) => write!(f, "File system failure: {}", msg),
            DomainError::ProcessFailed(msg) => write!(f, "Process failed: {}", msg),
            DomainError::ResourceUnavailable(msg) => write!(f, "Resource unavailable: {}", msg),
            DomainError::NotConnected => write!(f, "There is no connection with the server"),
            DomainError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::FsFail(err.to_string())
    }
}
