//! Local persistence under the profile data directory
//!
//! ```text
//! <data_dir>/
//!   identity.key      raw 32-byte Ed25519 seed, mode 0600
//!   identity.json     identifier, key type, creation time
//!   contacts.json     identifier -> contact, pretty-printed
//!   messages/         one JSON file per received message
//!   daemon.lock       single-instance lock record
//! ```
//!
//! No store performs file locking of its own; one process is expected to
//! own a data directory at a time (see [`lock::ProfileLock`]).

pub mod contacts;
pub mod error;
pub mod identity;
pub mod lock;
pub mod messages;

pub use contacts::{Contact, ContactBook, FuzzyMatch, Resolution, DEFAULT_FUZZY_THRESHOLD};
pub use error::{StoreError, StoreResult};
pub use identity::{IdentityInfo, IdentityStore, LoadedIdentity};
pub use lock::{LockRecord, ProfileLock};
pub use messages::{MessageStore, StoredMessage};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write a file through a temp file and rename, optionally owner-only
pub(crate) fn write_atomic(path: &Path, contents: &[u8], owner_only: bool) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    if owner_only {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    // mode() only applies when the temp file is newly created
    #[cfg(unix)]
    if owner_only {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = owner_only;

    Ok(())
}
