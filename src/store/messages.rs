//! Received-message store
//!
//! One JSON file per decrypted message under `messages/`. File names start
//! with a fixed-width UTC timestamp, so sorting names sorts messages by time
//! regardless of the sender identifier that follows. Files are written once
//! and never modified.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::StoreResult;
use crate::crypto::short_identifier;

/// Subdirectory holding message files
pub const MESSAGES_DIR: &str = "messages";

/// Longest sanitized identifier kept in a file name
const MAX_SENDER_LEN: usize = 64;

/// Fixed-width, lexicographically ordered timestamp format
const FILENAME_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// A persisted plaintext message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Sender identifier
    pub from: String,
    /// Decrypted text
    pub content: String,
    /// Timestamp as reported by the relay, or local receive time
    pub timestamp: String,
    /// RFC 3339 time the file was written
    pub saved_at: String,
}

/// Append-only message directory
pub struct MessageStore {
    dir: PathBuf,
}

impl MessageStore {
    /// Open (and create) the message directory under `data_dir`
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        let dir = data_dir.join(MESSAGES_DIR);
        fs::create_dir_all(&dir)?;
        Ok(MessageStore { dir })
    }

    /// Directory holding message files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a message, returning the path written
    ///
    /// `timestamp` defaults to now. A name collision gets a numeric suffix
    /// instead of overwriting.
    pub fn append(
        &self,
        from: &str,
        content: &str,
        timestamp: Option<&str>,
    ) -> StoreResult<PathBuf> {
        let now = Utc::now();
        let (when, timestamp) = match timestamp {
            Some(ts) => {
                let when = parse_timestamp(ts).unwrap_or_else(|| {
                    warn!(timestamp = ts, "Unparseable message timestamp, using local time");
                    now
                });
                (when, ts.to_string())
            }
            None => (now, now.to_rfc3339()),
        };

        let message = StoredMessage {
            from: from.to_string(),
            content: content.to_string(),
            timestamp,
            saved_at: now.to_rfc3339(),
        };
        let json = serde_json::to_vec_pretty(&message)?;

        let stem = format!(
            "{}_{}",
            when.format(FILENAME_TIME_FORMAT),
            sanitize_identifier(from)
        );

        let mut suffix = 0u32;
        loop {
            let name = match suffix {
                0 => format!("{stem}.json"),
                n => format!("{stem}_{n}.json"),
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&json)?;
                    file.sync_all()?;
                    debug!(from = %short_identifier(from), path = %path.display(), "Message saved");
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Stored messages, newest first
    ///
    /// `sender_filter` is a case-insensitive substring of `from`. Files are
    /// read lazily in name order and reading stops once `limit` messages are
    /// collected.
    pub fn list(
        &self,
        limit: Option<usize>,
        sender_filter: Option<&str>,
    ) -> StoreResult<Vec<StoredMessage>> {
        let filter = sender_filter.map(str::to_lowercase);
        let mut names = self.file_names()?;
        names.sort_unstable_by(|a, b| b.cmp(a));

        let mut messages = Vec::new();
        for name in names {
            if limit.is_some_and(|limit| messages.len() >= limit) {
                break;
            }

            let path = self.dir.join(&name);
            let message = match read_message(&path) {
                Ok(message) => message,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable message file");
                    continue;
                }
            };

            if let Some(filter) = &filter {
                if !message.from.to_lowercase().contains(filter.as_str()) {
                    continue;
                }
            }
            messages.push(message);
        }

        Ok(messages)
    }

    /// Number of stored message files
    pub fn count(&self) -> StoreResult<usize> {
        Ok(self.file_names()?.len())
    }

    fn file_names(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

fn read_message(path: &Path) -> StoreResult<StoredMessage> {
    let json = fs::read(path)?;
    Ok(serde_json::from_slice(&json)?)
}

/// ISO 8601 with offset, or without one (taken as UTC)
fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// File-name-safe form of an identifier
fn sanitize_identifier(did: &str) -> String {
    did.chars()
        .take(MAX_SENDER_LEN)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, MessageStore) {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn ts(second: u32) -> String {
        format!("2025-03-01T10:00:{second:02}Z")
    }

    #[test]
    fn test_append_and_read_back() {
        let (_dir, store) = store();
        let path = store
            .append("did:key:ed25519:abc", "hi there", Some("2025-03-01T10:00:00.250Z"))
            .unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "20250301T100000.250000Z_did_key_ed25519_abc.json");

        let messages = store.list(None, None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, "did:key:ed25519:abc");
        assert_eq!(messages[0].content, "hi there");
        assert_eq!(messages[0].timestamp, "2025-03-01T10:00:00.250Z");
    }

    #[test]
    fn test_limit_returns_newest_first() {
        let (_dir, store) = store();
        for i in 0..10 {
            store.append("did:alice", &format!("msg {i}"), Some(&ts(i))).unwrap();
        }

        let messages = store.list(Some(5), None).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["msg 9", "msg 8", "msg 7", "msg 6", "msg 5"]);
    }

    #[test]
    fn test_order_independent_of_sender() {
        let (_dir, store) = store();
        store.append("zzz~~~", "older", Some(&ts(1))).unwrap();
        store.append("AAA", "newer", Some(&ts(2))).unwrap();

        let messages = store.list(None, None).unwrap();
        assert_eq!(messages[0].content, "newer");
        assert_eq!(messages[1].content, "older");
    }

    #[test]
    fn test_sender_filter() {
        let (_dir, store) = store();
        store.append("did:alice", "from alice", Some(&ts(1))).unwrap();
        store.append("did:bob", "from bob", Some(&ts(2))).unwrap();

        let messages = store.list(None, Some("ALICE")).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "from alice");
    }

    #[test]
    fn test_filter_and_limit_combined() {
        let (_dir, store) = store();
        for i in 0..6 {
            let from = if i % 2 == 0 { "did:alice" } else { "did:bob" };
            store.append(from, &format!("m{i}"), Some(&ts(i))).unwrap();
        }

        let messages = store.list(Some(2), Some("bob")).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m5", "m3"]);
    }

    #[test]
    fn test_same_timestamp_does_not_overwrite() {
        let (_dir, store) = store();
        let first = store.append("did:alice", "one", Some(&ts(0))).unwrap();
        let second = store.append("did:alice", "two", Some(&ts(0))).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.count().unwrap(), 2);
        assert!(fs::read_to_string(&first).unwrap().contains("one"));
    }

    #[test]
    fn test_corrupt_file_skipped() {
        let (_dir, store) = store();
        store.append("did:alice", "good", Some(&ts(1))).unwrap();
        fs::write(store.dir().join("29990101T000000.000000Z_bad.json"), "{oops").unwrap();

        let messages = store.list(None, None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "good");
    }

    #[test]
    fn test_default_and_naive_timestamps() {
        let (_dir, store) = store();
        let path = store.append("did:a", "naive", Some("2025-03-01T10:00:00.5")).unwrap();
        assert!(path
            .to_str()
            .unwrap()
            .contains("20250301T100000.500000Z"));

        store.append("did:a", "now", None).unwrap();
        let newest = &store.list(Some(1), None).unwrap()[0];
        assert_eq!(newest.content, "now");
        assert!(DateTime::parse_from_rfc3339(&newest.timestamp).is_ok());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_identifier("did:key:ed25519:A-b_c"), "did_key_ed25519_A_b_c");
        assert_eq!(sanitize_identifier("../../etc"), "______etc");
        assert_eq!(sanitize_identifier(&"x".repeat(100)).len(), MAX_SENDER_LEN);
    }

    #[test]
    fn test_count_ignores_other_files() {
        let (_dir, store) = store();
        store.append("did:a", "x", None).unwrap();
        fs::write(store.dir().join("notes.txt"), "hello").unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
