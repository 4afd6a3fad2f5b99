//! Message encryption: zlib + ChaCha20-Poly1305
//!
//! The key for a message is derived with HKDF-SHA256 from the *recipient's*
//! public key alone, and every message uses the same nonce. Both choices are
//! fixed by the wire format shared with existing peers:
//!
//! - anyone who knows a peer's identifier can derive the key for messages
//!   addressed to that peer
//! - identical plaintexts to the same peer produce identical ciphertexts,
//!   which an observer can correlate over time
//!
//! Changing either breaks interoperability.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

use super::compress;
use super::error::{CryptoError, CryptoResult};
use super::identity::PublicKey;

/// Size of the encryption key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// HKDF info string; its first [`NONCE_SIZE`] bytes are also the nonce
pub const KDF_CONTEXT: &[u8] = b"agent-messenger-v2";

/// Stateless message cipher
pub struct Cipher;

impl Cipher {
    /// Derive the 32-byte message key for a peer
    ///
    /// HKDF-SHA256, empty salt, `info` = [`KDF_CONTEXT`], input = the peer's
    /// raw public key bytes.
    pub fn derive_shared_key(peer: &PublicKey) -> CryptoResult<[u8; KEY_SIZE]> {
        let hkdf = Hkdf::<Sha256>::new(None, peer.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(KDF_CONTEXT, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(key)
    }

    /// The constant nonce used for every message
    pub fn fixed_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&KDF_CONTEXT[..NONCE_SIZE]);
        nonce
    }

    /// Encrypt a text message for a recipient
    ///
    /// Returns standard base64 of `ciphertext || tag`; no nonce is carried.
    pub fn encrypt(plaintext: &str, recipient: &PublicKey) -> CryptoResult<String> {
        let key = Self::derive_shared_key(recipient)?;
        let compressed = compress::compress(plaintext.as_bytes())?;
        let sealed = Self::seal(&key, &compressed)?;
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a base64 message addressed under `peer`'s key
    pub fn decrypt(ciphertext_b64: &str, peer: &PublicKey) -> CryptoResult<String> {
        let ciphertext = BASE64
            .decode(ciphertext_b64.trim())
            .map_err(|e| CryptoError::InvalidCiphertextEncoding(e.to_string()))?;

        let key = Self::derive_shared_key(peer)?;
        let compressed = Self::open(&key, &ciphertext)?;
        let plaintext = compress::decompress(&compressed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// AEAD-encrypt raw bytes under the fixed nonce
    pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(key.into());
        let nonce = Self::fixed_nonce();

        cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// AEAD-decrypt raw bytes under the fixed nonce
    pub fn open(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let cipher = ChaCha20Poly1305::new(key.into());
        let nonce = Self::fixed_nonce();

        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
