//! Cryptographic primitives
//!
//! Pure functions only, no I/O:
//! - `identity`: Ed25519 keypairs, signatures and `did:key` identifiers
//! - `cipher`: HKDF-SHA256 key derivation and ChaCha20-Poly1305 AEAD
//! - `compress`: zlib payload compression

pub mod cipher;
pub mod compress;
pub mod error;
pub mod identity;

// Re-export commonly used types
pub use cipher::Cipher;
pub use error::{CryptoError, CryptoResult};
pub use identity::{
    derive_identifier, extract_public_key, is_supported_identifier, short_identifier, KeyPair,
    PublicKey, SignatureBytes, DID_PREFIX,
};

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_message_to_identifier_flow() {
        // Alice only knows Bob's identifier string
        let bob = KeyPair::generate();
        let bob_did = bob.identifier();

        let recipient = extract_public_key(&bob_did).unwrap();
        let ciphertext = Cipher::encrypt("Hello Bob, this is encrypted!", &recipient).unwrap();

        // Bob decrypts with the key embedded in his own identifier
        let decrypted = Cipher::decrypt(&ciphertext, bob.public_key()).unwrap();
        assert_eq!(decrypted, "Hello Bob, this is encrypted!");
    }

    #[test]
    fn test_signature_verifiable_from_identifier() {
        let alice = KeyPair::generate();
        let document = b"I, Alice, sent this.";
        let signature = alice.sign(document);

        // Anyone holding the identifier can verify
        let public_key = extract_public_key(&alice.identifier()).unwrap();
        assert!(public_key.verify(document, signature.as_bytes()));
        assert!(!public_key.verify(b"I, Alice, sent nothing.", signature.as_bytes()));
    }
}
