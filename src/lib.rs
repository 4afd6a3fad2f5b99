//! # Agent Messenger
//!
//! End-to-end encrypted messaging between `did:key` identities through an
//! untrusted relay.
//!
//! ## Features
//!
//! - **Self-certifying identifiers**: `did:key:ed25519:` + the public key
//! - **Encrypted payloads**: zlib + ChaCha20-Poly1305; the relay only sees ciphertext
//! - **Offline queueing** with automatic reconnect and exponential backoff
//! - **Local stores** for identity, contacts (exact and fuzzy lookup) and messages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_messenger::{ClientConfig, SecureMessagingClient};
//!
//! # async fn run() -> Result<(), agent_messenger::ClientError> {
//! let mut client = SecureMessagingClient::new(ClientConfig::default());
//! client.initialize().await?;
//! println!("My identifier: {}", client.did()?);
//!
//! client.add_contact("Bob", "did:key:ed25519:...", "").await?;
//! client.connect().await?;
//! client.send_to_name("bob", "hello").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               CLIENT FAÇADE                 │
//! │   initialize | connect | send | messages    │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │            CONNECTION MANAGER               │
//! │   state machine | queue | reconnect timer   │
//! └──────────┬──────────────────────┬───────────┘
//!            │                      │
//! ┌──────────▼──────────┐ ┌─────────▼───────────┐
//! │       CRYPTO        │ │        STORE        │
//! │ Ed25519 | HKDF |    │ │ identity | contacts │
//! │ ChaCha20 | zlib     │ │ messages | lock     │
//! └─────────────────────┘ └─────────────────────┘
//!            │
//! ┌──────────▼──────────────────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │          WebSocket | In-memory              │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Security caveats
//!
//! The message key is derived from the recipient's public key alone and every
//! message uses the same nonce. Anyone who knows a recipient's identifier can
//! derive the key, and equal plaintexts produce equal ciphertexts. Both are
//! part of the wire format shared with existing peers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod store;
pub mod transport;

// Re-export main types at crate root
pub use client::{ClientError, ClientResult, ClientStatus, SecureMessagingClient};
pub use config::{ClientConfig, ReconnectPolicy};
pub use connection::{ConnectionState, MessageCallback, SendError, SendOutcome};
pub use crypto::{CryptoError, CryptoResult, KeyPair, PublicKey, SignatureBytes};
pub use store::{Contact, FuzzyMatch, StoreError, StoredMessage};
