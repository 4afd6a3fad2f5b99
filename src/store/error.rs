//! Storage error types

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors from the on-disk identity, contact, message and lock stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored file could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another live process owns the profile lock
    #[error("Profile is locked by running process {pid}")]
    LockHeld {
        /// Process identifier recorded in the lock file
        pid: u32,
    },

    /// Key material on disk is unusable
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
