//! Single-instance profile lock
//!
//! An advisory `daemon.lock` file holding the owner's pid and acquisition
//! time. A lock whose owner is no longer running is taken over.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{StoreError, StoreResult};

/// Lock file name
pub const LOCK_FILE: &str = "daemon.lock";

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Owning process
    pub pid: u32,
    /// RFC 3339 acquisition time
    pub acquired_at: String,
}

/// A held profile lock; released on drop
#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl ProfileLock {
    /// Acquire the lock for `data_dir`, taking over a dead owner's lock
    pub fn acquire(data_dir: &Path) -> StoreResult<Self> {
        Self::acquire_with_probe(data_dir, process_alive)
    }

    /// Acquire using a custom liveness probe
    pub fn acquire_with_probe(
        data_dir: &Path,
        is_alive: impl Fn(u32) -> bool,
    ) -> StoreResult<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCK_FILE);
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        };

        // One takeover attempt; a second collision means another process won
        for attempt in 0..2 {
            match Self::try_create(&path, &record) {
                Ok(()) => {
                    info!(pid = record.pid, path = %path.display(), "Profile lock acquired");
                    return Ok(ProfileLock {
                        path,
                        record,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            match read_record(&path) {
                Some(existing) if is_alive(existing.pid) || attempt > 0 => {
                    return Err(StoreError::LockHeld { pid: existing.pid });
                }
                Some(existing) => {
                    warn!(pid = existing.pid, "Removing stale profile lock");
                }
                None if attempt > 0 => return Err(StoreError::LockHeld { pid: 0 }),
                None => warn!("Removing unreadable profile lock"),
            }

            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::LockHeld { pid: 0 })
    }

    /// Current lock record in `data_dir`, if any
    pub fn inspect(data_dir: &Path) -> Option<LockRecord> {
        read_record(&data_dir.join(LOCK_FILE))
    }

    /// The record this lock wrote
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Release the lock now
    pub fn release(mut self) -> StoreResult<()> {
        self.released = true;
        self.remove_if_owned()
    }

    fn try_create(path: &Path, record: &LockRecord) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let json = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        file.write_all(&json)?;
        file.sync_all()
    }

    fn remove_if_owned(&self) -> StoreResult<()> {
        match read_record(&self.path) {
            Some(current) if current == self.record => {
                fs::remove_file(&self.path)?;
                debug!(path = %self.path.display(), "Profile lock released");
            }
            _ => warn!("Profile lock no longer ours, leaving it in place"),
        }
        Ok(())
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.remove_if_owned() {
                warn!(error = %e, "Failed to release profile lock");
            }
        }
    }
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let json = fs::read(path).ok()?;
    serde_json::from_slice(&json).ok()
}

/// Whether a process with this pid exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a probe every owner is presumed alive
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_record() {
        let dir = TempDir::new().unwrap();
        let lock = ProfileLock::acquire(dir.path()).unwrap();

        let record = ProfileLock::inspect(dir.path()).unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(&record, lock.record());
    }

    #[test]
    fn test_live_owner_blocks() {
        let dir = TempDir::new().unwrap();
        let _held = ProfileLock::acquire(dir.path()).unwrap();

        let err = ProfileLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::LockHeld { pid } if pid == std::process::id()));
    }

    #[test]
    fn test_dead_owner_taken_over() {
        let dir = TempDir::new().unwrap();
        let stale = LockRecord {
            pid: 999_999,
            acquired_at: "2020-01-01T00:00:00Z".into(),
        };
        fs::write(dir.path().join(LOCK_FILE), serde_json::to_vec(&stale).unwrap()).unwrap();

        let lock = ProfileLock::acquire_with_probe(dir.path(), |_| false).unwrap();
        assert_eq!(lock.record().pid, std::process::id());
    }

    #[test]
    fn test_corrupt_lock_taken_over() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "garbage").unwrap();

        assert!(ProfileLock::acquire_with_probe(dir.path(), |_| true).is_ok());
    }

    #[test]
    fn test_release_and_drop_remove_file() {
        let dir = TempDir::new().unwrap();

        let lock = ProfileLock::acquire(dir.path()).unwrap();
        lock.release().unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());

        {
            let _lock = ProfileLock::acquire(dir.path()).unwrap();
            assert!(dir.path().join(LOCK_FILE).exists());
        }
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_drop_leaves_foreign_lock() {
        let dir = TempDir::new().unwrap();
        let lock = ProfileLock::acquire(dir.path()).unwrap();

        let foreign = LockRecord {
            pid: 1,
            acquired_at: "2020-01-01T00:00:00Z".into(),
        };
        fs::write(dir.path().join(LOCK_FILE), serde_json::to_vec(&foreign).unwrap()).unwrap();
        drop(lock);

        assert_eq!(ProfileLock::inspect(dir.path()), Some(foreign));
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_sees_self() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
    }
}
