//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use thiserror::Error;

use crate::crd::HostError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The HTTPProxy spec cannot produce claims
    #[error("Malformed HTTPProxy spec: {0}")]
    MalformedSpec(#[from] HostError),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),
}

impl Error {
    /// Check if this error should be retried
    ///
    /// Anything the API server might answer differently on a later attempt is
    /// retryable. Objects that fail to decode or carry an invalid host will
    /// not fix themselves until the next watch event.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::SerdeError(_)) => false,
            Error::Kube(kube::Error::Api(api_err)) => !matches!(api_err.code, 400..=428 | 430..=499),
            Error::Kube(_) => true,
            Error::Transient(_) => true,
            Error::MalformedSpec(_) => false,
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
