//! Persistent identity
//!
//! The private key lives in `identity.key` as the raw 32-byte seed; the
//! public key and identifier are always re-derived from it on load, never
//! trusted from `identity.json`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::StoreResult;
use super::write_atomic;
use crate::crypto::{short_identifier, KeyPair};

/// Private-key file name
pub const KEY_FILE: &str = "identity.key";

/// Identity metadata file name
pub const IDENTITY_FILE: &str = "identity.json";

/// Metadata format version
pub const IDENTITY_VERSION: &str = "2.0";

/// Public identity metadata, safe to share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    /// Identifier derived from the public key
    pub did: String,
    /// Always `Ed25519`
    pub key_type: String,
    /// RFC 3339 creation time
    #[serde(default)]
    pub created_at: Option<String>,
    /// Metadata format version
    #[serde(default)]
    pub version: String,
}

impl IdentityInfo {
    fn new(did: String) -> Self {
        IdentityInfo {
            did,
            key_type: "Ed25519".to_string(),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            version: IDENTITY_VERSION.to_string(),
        }
    }
}

/// A loaded or freshly created identity
#[derive(Debug)]
pub struct LoadedIdentity {
    /// Signing keypair
    pub keypair: KeyPair,
    /// Identifier, re-derived from `keypair`
    pub did: String,
    /// Metadata as persisted
    pub info: IdentityInfo,
}

/// Loads or creates the identity in a data directory
pub struct IdentityStore;

impl IdentityStore {
    /// Load the identity in `data_dir`, creating and persisting one if absent
    ///
    /// A missing or unreadable private key counts as absent. Once a key has
    /// been read it is never replaced: failures while repairing its metadata,
    /// like failures while writing a new identity, are returned to the caller.
    pub fn load_or_create(data_dir: &Path) -> StoreResult<LoadedIdentity> {
        fs::create_dir_all(data_dir)?;

        let Some(keypair) = Self::read_key(data_dir) else {
            return Self::create(data_dir);
        };

        let identity = Self::attach_info(data_dir, keypair)?;
        info!(did = %short_identifier(&identity.did), "Loaded existing identity");
        Ok(identity)
    }

    /// Read identity metadata without touching the private key
    pub fn info(data_dir: &Path) -> StoreResult<Option<IdentityInfo>> {
        let path = data_dir.join(IDENTITY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn read_key(data_dir: &Path) -> Option<KeyPair> {
        let key_path = data_dir.join(KEY_FILE);
        if !key_path.exists() || !data_dir.join(IDENTITY_FILE).exists() {
            return None;
        }

        let seed = match fs::read(&key_path) {
            Ok(seed) => seed,
            Err(e) => {
                warn!(error = %e, "Private key unreadable, generating a new identity");
                return None;
            }
        };
        match KeyPair::from_secret_bytes(&seed) {
            Ok(keypair) => Some(keypair),
            Err(e) => {
                warn!(error = %e, "Private key malformed, generating a new identity");
                None
            }
        }
    }

    /// Pair a loaded key with its metadata, rewriting the metadata if it
    /// is unreadable or names another identifier
    fn attach_info(data_dir: &Path, keypair: KeyPair) -> StoreResult<LoadedIdentity> {
        let did = keypair.identifier();

        let info = match Self::info(data_dir) {
            Ok(Some(info)) if info.did == did => info,
            Ok(Some(info)) => {
                warn!(
                    stored = %short_identifier(&info.did),
                    derived = %short_identifier(&did),
                    "Identity metadata does not match private key, rewriting"
                );
                Self::write_info(data_dir, IdentityInfo { did: did.clone(), ..info })?
            }
            Ok(None) | Err(_) => {
                warn!("Identity metadata unreadable, rewriting from private key");
                Self::write_info(data_dir, IdentityInfo::new(did.clone()))?
            }
        };

        Ok(LoadedIdentity { keypair, did, info })
    }

    fn create(data_dir: &Path) -> StoreResult<LoadedIdentity> {
        info!("Generating new identity");

        let keypair = KeyPair::generate();
        let did = keypair.identifier();

        write_atomic(&data_dir.join(KEY_FILE), keypair.secret_key_bytes(), true)?;
        let info = Self::write_info(data_dir, IdentityInfo::new(did.clone()))?;

        info!(did = %short_identifier(&did), "New identity created");
        Ok(LoadedIdentity { keypair, did, info })
    }

    fn write_info(data_dir: &Path, info: IdentityInfo) -> StoreResult<IdentityInfo> {
        let json = serde_json::to_string_pretty(&info)?;
        write_atomic(&data_dir.join(IDENTITY_FILE), json.as_bytes(), false)?;
        Ok(info)
    }
}
