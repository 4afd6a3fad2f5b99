//! Ed25519 keypairs and peer identifiers
//!
//! A peer is addressed by a `did:key:ed25519:` identifier that embeds its
//! public key, so anyone holding the identifier can recover the key.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use super::error::{CryptoError, CryptoResult};

/// Size of a public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Fixed prefix of every supported identifier
pub const DID_PREFIX: &str = "did:key:ed25519:";

/// An Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; PUBLIC_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(PublicKey(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Convert to hex string for display
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Base64url (unpadded) form, the identifier suffix
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// The identifier addressing this key
    pub fn to_identifier(&self) -> String {
        derive_identifier(self)
    }

    /// Verify a signature against this public key
    ///
    /// Returns `false` for any malformed key or signature bytes.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// A signature produced by a keypair
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(SignatureBytes(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

/// An Ed25519 keypair
///
/// The secret key is zeroized when dropped and only leaves this type for
/// persistence by the identity store.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    public_key: PublicKey,
    secret_key: [u8; SECRET_KEY_SIZE],
}

impl KeyPair {
    /// Generate a new keypair from a random 32-byte seed
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(&signing_key)
    }

    /// Rebuild a keypair from its 32-byte seed; the public key is re-derived
    pub fn from_seed(seed: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self::from_signing_key(&SigningKey::from_bytes(seed))
    }

    /// Rebuild a keypair from a raw seed slice of unknown length
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let seed: [u8; SECRET_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self::from_seed(&seed))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        KeyPair {
            public_key: PublicKey(signing_key.verifying_key().to_bytes()),
            secret_key: signing_key.to_bytes(),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Raw secret seed, for writing the private-key file
    pub(crate) fn secret_key_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.secret_key
    }

    /// The identifier derived from this keypair's public key
    pub fn identifier(&self) -> String {
        derive_identifier(&self.public_key)
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from_bytes(&self.secret_key);
        SignatureBytes(signing_key.sign(message).to_bytes())
    }

    /// Verify a signature made by this keypair
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.public_key.verify(message, signature)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Derive the identifier for a public key
pub fn derive_identifier(public_key: &PublicKey) -> String {
    format!("{DID_PREFIX}{}", public_key.to_base64())
}

/// Whether the identifier uses the supported `did:key:ed25519:` scheme
pub fn is_supported_identifier(identifier: &str) -> bool {
    identifier.starts_with(DID_PREFIX)
}

/// Recover the public key embedded in an identifier
pub fn extract_public_key(identifier: &str) -> CryptoResult<PublicKey> {
    let encoded = identifier.strip_prefix(DID_PREFIX).ok_or_else(|| {
        CryptoError::InvalidIdentifierFormat(format!("missing {DID_PREFIX} prefix"))
    })?;

    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidIdentifierFormat(e.to_string()))?;

    if bytes.len() != PUBLIC_KEY_SIZE {
        return Err(CryptoError::InvalidIdentifierFormat(format!(
            "key must be {PUBLIC_KEY_SIZE} bytes, got {}",
            bytes.len()
        )));
    }

    PublicKey::from_bytes(&bytes)
}

/// Shortened identifier for log lines
pub fn short_identifier(identifier: &str) -> &str {
    match identifier.char_indices().nth(32) {
        Some((idx, _)) => &identifier[..idx],
        None => identifier,
    }
}
