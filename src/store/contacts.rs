//! Contact book: name -> identifier directory
//!
//! Persisted as a pretty-printed JSON object keyed by identifier. Contacts
//! keep their insertion order on disk and in memory, which is also the
//! tie-break order for fuzzy matches.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use super::error::StoreResult;
use super::write_atomic;
use crate::crypto::short_identifier;

/// Contact-book file name
pub const CONTACTS_FILE: &str = "contacts.json";

/// Minimum similarity for a fuzzy match unless the caller overrides it
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.3;

/// Number of suggestions offered when a name has no exact match
pub const MAX_SUGGESTIONS: usize = 3;

/// A named peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Display name
    pub name: String,
    /// Identifier; always equal to the contact's key in the book
    #[serde(default)]
    pub did: String,
    /// RFC 3339 time the contact was (last) added
    #[serde(default)]
    pub added_at: String,
    /// Free-form notes
    #[serde(default)]
    pub notes: String,
}

/// A fuzzy lookup hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatch {
    /// Contact identifier
    pub did: String,
    /// Contact display name
    pub name: String,
    /// Similarity in `[0, 1]`
    pub score: f64,
}

/// Outcome of resolving a name to a recipient
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Case-insensitive exact name match
    Exact(String),
    /// No exact match; best fuzzy candidates, highest score first
    Suggestions(Vec<FuzzyMatch>),
    /// Nothing close
    NotFound,
}

/// Persistent contact book
pub struct ContactBook {
    path: PathBuf,
    contacts: Vec<Contact>,
}

impl ContactBook {
    /// Load the book in `data_dir`, creating an empty file if absent
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        let mut book = ContactBook {
            path: data_dir.join(CONTACTS_FILE),
            contacts: Vec::new(),
        };

        if book.path.exists() {
            book.reload()?;
        } else {
            book.save()?;
        }
        Ok(book)
    }

    /// Re-read the book from disk, discarding in-memory state
    pub fn reload(&mut self) -> StoreResult<()> {
        let json = fs::read_to_string(&self.path)?;
        let ContactMap(contacts) = serde_json::from_str(&json)?;
        self.contacts = contacts;
        debug!(count = self.contacts.len(), "Contacts loaded");
        Ok(())
    }

    /// Add or replace the contact for `did`; durable before returning
    ///
    /// A replaced contact keeps its original position.
    pub fn add(&mut self, name: &str, did: &str, notes: &str) -> StoreResult<()> {
        let contact = Contact {
            name: name.to_string(),
            did: did.to_string(),
            added_at: chrono::Utc::now().to_rfc3339(),
            notes: notes.to_string(),
        };

        match self.contacts.iter_mut().find(|c| c.did == did) {
            Some(existing) => *existing = contact,
            None => self.contacts.push(contact),
        }

        self.save()?;
        info!(contact = name, did = %short_identifier(did), "Contact added");
        Ok(())
    }

    /// Contact for an identifier
    pub fn get(&self, did: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.did == did)
    }

    /// Whether `did` is a known contact
    pub fn contains(&self, did: &str) -> bool {
        self.get(did).is_some()
    }

    /// All contacts in insertion order
    pub fn list(&self) -> &[Contact] {
        &self.contacts
    }

    /// Number of contacts
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Whether the book is empty
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Identifier of the first contact whose name equals `name`, ignoring case
    pub fn find_exact(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.contacts
            .iter()
            .find(|c| c.name.to_lowercase() == wanted)
            .map(|c| c.did.as_str())
    }

    /// Contacts scoring at least `threshold`, best first
    ///
    /// Equal scores keep insertion order.
    pub fn find_fuzzy(&self, name: &str, threshold: f64) -> Vec<FuzzyMatch> {
        let mut matches: Vec<FuzzyMatch> = self
            .contacts
            .iter()
            .filter_map(|c| {
                let score = similarity(name, &c.name);
                (score >= threshold).then(|| FuzzyMatch {
                    did: c.did.clone(),
                    name: c.name.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches
    }

    /// Exact match first, else up to [`MAX_SUGGESTIONS`] fuzzy candidates
    pub fn resolve(&self, name: &str) -> Resolution {
        if let Some(did) = self.find_exact(name) {
            return Resolution::Exact(did.to_string());
        }

        let mut suggestions = self.find_fuzzy(name, DEFAULT_FUZZY_THRESHOLD);
        if suggestions.is_empty() {
            return Resolution::NotFound;
        }
        suggestions.truncate(MAX_SUGGESTIONS);
        Resolution::Suggestions(suggestions)
    }

    fn save(&self) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(&ContactMapRef(&self.contacts))?;
        write_atomic(&self.path, json.as_bytes(), false)
    }
}

/// Case-insensitive similarity `1 - distance / max_len`
///
/// Equal strings (including two empty ones) score 1; otherwise an empty side
/// scores 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let longest = a.len().max(b.len());
    1.0 - edit_distance(&a, &b) as f64 / longest as f64
}

/// Levenshtein distance over chars
fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

// The book is a JSON object keyed by identifier. Ordered (de)serialization
// through these wrappers keeps insertion order without a map type.

struct ContactMapRef<'a>(&'a [Contact]);

impl Serialize for ContactMapRef<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.0.iter().map(|c| (&c.did, c)))
    }
}

struct ContactMap(Vec<Contact>);

impl<'de> Deserialize<'de> for ContactMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ContactMapVisitor;

        impl<'de> Visitor<'de> for ContactMapVisitor {
            type Value = Vec<Contact>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of identifier to contact")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut contacts: Vec<Contact> = Vec::new();
                while let Some((did, mut contact)) = map.next_entry::<String, Contact>()? {
                    contact.did = did;
                    match contacts.iter_mut().find(|c| c.did == contact.did) {
                        Some(existing) => *existing = contact,
                        None => contacts.push(contact),
                    }
                }
                Ok(contacts)
            }
        }

        deserializer.deserialize_map(ContactMapVisitor).map(ContactMap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn book_with(names: &[(&str, &str)]) -> (TempDir, ContactBook) {
        let dir = TempDir::new().unwrap();
        let mut book = ContactBook::open(dir.path()).unwrap();
        for (name, did) in names {
            book.add(name, did, "").unwrap();
        }
        (dir, book)
    }

    #[test]
    fn test_open_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let book = ContactBook::open(dir.path()).unwrap();

        assert!(book.is_empty());
        let json = fs::read_to_string(dir.path().join(CONTACTS_FILE)).unwrap();
        assert_eq!(json.trim(), "{}");
    }

    #[test]
    fn test_add_persists() {
        let (dir, _book) = book_with(&[("Alice", "did:a"), ("Bob", "did:b")]);

        let reopened = ContactBook::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("did:a").unwrap().name, "Alice");
        assert_eq!(reopened.list()[1].did, "did:b");
    }

    #[test]
    fn test_file_keyed_by_identifier() {
        let (dir, _book) = book_with(&[("Alice", "did:a")]);

        let json = fs::read_to_string(dir.path().join(CONTACTS_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["did:a"]["name"], "Alice");
        assert_eq!(value["did:a"]["did"], "did:a");
        assert!(value["did:a"]["added_at"].is_string());
        assert!(json.contains('\n'));
    }

    #[test]
    fn test_readd_overwrites_in_place() {
        let (dir, mut book) = book_with(&[("Alice", "did:a"), ("Bob", "did:b")]);
        book.add("Alicia", "did:a", "renamed").unwrap();

        assert_eq!(book.len(), 2);
        assert_eq!(book.list()[0].name, "Alicia");
        assert_eq!(book.list()[0].notes, "renamed");

        let reopened = ContactBook::open(dir.path()).unwrap();
        assert_eq!(reopened.list()[0].name, "Alicia");
    }

    #[test]
    fn test_did_field_follows_key() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONTACTS_FILE),
            r#"{"did:x": {"name": "X", "did": "did:wrong", "added_at": "t"}}"#,
        )
        .unwrap();

        let book = ContactBook::open(dir.path()).unwrap();
        assert_eq!(book.list()[0].did, "did:x");
        assert_eq!(book.list()[0].notes, "");
    }

    #[test]
    fn test_find_exact_case_insensitive() {
        let (_dir, book) = book_with(&[("Alice", "did:a"), ("Bob", "did:b")]);

        assert_eq!(book.find_exact("alice"), Some("did:a"));
        assert_eq!(book.find_exact("BOB"), Some("did:b"));
        assert_eq!(book.find_exact("Al"), None);
    }

    #[test]
    fn test_find_fuzzy_ranks() {
        let (_dir, book) = book_with(&[("Alison", "d2"), ("Alice", "d1")]);

        let matches = book.find_fuzzy("alice", DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].did, "d1");
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[1].did, "d2");
        assert!(matches[1].score >= 0.4);
    }

    #[test]
    fn test_find_fuzzy_threshold_and_ties() {
        let (_dir, book) = book_with(&[("abcx", "first"), ("Zed", "far"), ("abcy", "second")]);

        let matches = book.find_fuzzy("abcd", 0.5);
        let dids: Vec<&str> = matches.iter().map(|m| m.did.as_str()).collect();
        assert_eq!(dids, ["first", "second"]);
        assert_eq!(matches[0].score, matches[1].score);
    }

    #[test]
    fn test_similarity_edges() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("", "bob"), 0.0);
        assert_eq!(similarity("bob", ""), 0.0);
        assert_eq!(similarity("Bob", "bob"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn test_resolve() {
        let (_dir, book) = book_with(&[("Alice", "did:a"), ("Alison", "did:b")]);

        assert_eq!(book.resolve("ALICE"), Resolution::Exact("did:a".into()));
        match book.resolve("alis") {
            Resolution::Suggestions(s) => assert_eq!(s[0].did, "did:b"),
            other => panic!("expected suggestions, got {other:?}"),
        }
        assert_eq!(book.resolve("zzzzzzzz"), Resolution::NotFound);
    }

    #[test]
    fn test_reload_sees_external_edits() {
        let (dir, mut book) = book_with(&[("Alice", "did:a")]);

        let mut other = ContactBook::open(dir.path()).unwrap();
        other.add("Carol", "did:c", "").unwrap();

        assert!(!book.contains("did:c"));
        book.reload().unwrap();
        assert!(book.contains("did:c"));
    }
}
