//! Error types for trace-core

use std::time::Duration;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::remote::RemoteError;

/// Result type alias using trace-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in trace-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (repository identifier, password policy, entry id)
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Wrong master password, undecryptable token, or no unlocked session
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The remote refused the access token; it has to be replaced
    #[error("Access token rejected: {0}")]
    Unauthorized(String),

    /// Transport failure or unexpected remote response
    #[error("Network error: {0}")]
    Network(String),

    /// A network attempt exceeded its bound
    #[error("sync timeout after {0:?}")]
    Timeout(Duration),

    /// Remote version token did not match the expected one
    #[error("Version conflict on {0}")]
    Conflict(String),

    /// Local persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Encryption or key derivation error
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Network and timeout failures may succeed on an explicit retry.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Local persistence failures, fatal to the operation that hit them.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::LibSql(_) | Self::Io(_))
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Conflict(message) => Self::Conflict(message),
            RemoteError::Unauthorized(message) => Self::Unauthorized(message),
            RemoteError::InvalidConfiguration(message) => Self::Validation(message),
            RemoteError::Http(error) => Self::Network(error.to_string()),
            RemoteError::Transport(message) => Self::Network(message),
            RemoteError::Api { .. } | RemoteError::InvalidPayload(_) => {
                Self::Network(error.to_string())
            }
        }
    }
}
