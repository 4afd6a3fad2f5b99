//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The identifier string is not a `did:key:ed25519:` identifier
    #[error("Invalid identifier format: {0}")]
    InvalidIdentifierFormat(String),

    /// The provided key has an invalid length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// The provided signature has an invalid length
    #[error("Invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected signature length in bytes
        expected: usize,
        /// Actual signature length in bytes
        actual: usize,
    },

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Encryption operation failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// The ciphertext is not valid base64
    #[error("Invalid ciphertext encoding: {0}")]
    InvalidCiphertextEncoding(String),

    /// Decryption failed - authentication tag mismatch (wrong key or tampered data)
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// The decrypted payload is not valid zlib data
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// The decompressed payload is not UTF-8 text
    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    /// The public key bytes are not a valid Ed25519 point
    #[error("Invalid public key format")]
    InvalidPublicKey,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
