//! Error types and result handling for the ops engine

use thiserror::Error;

/// Result type alias for ops engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ops engine operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Collaborator(_) | Error::Timeout(_))
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Validation(_) => "validation",
            Error::Execution(_) => "execution",
            Error::Policy(_) => "policy",
            Error::Store(_) => "store",
            Error::Collaborator(_) => "collaborator",
            Error::Timeout(_) => "timeout",
            Error::Cancelled(_) => "cancelled",
            Error::Serialization(_) => "serialization",
            Error::Generic(_) => "generic",
        }
    }
}
