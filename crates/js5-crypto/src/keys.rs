//! XTEA key management
//!
//! Encrypted files are keyed by file name. A file can carry several keys, one
//! per game build it was shipped in, and lookups select the entry matching the
//! build the cache belongs to.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CryptoError;
use crate::xtea::XteaKey;

/// A key valid for a single game build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XteaKeyEntry {
    /// Build the key belongs to
    #[serde(rename = "gameBuild", deserialize_with = "deserialize_build")]
    pub game_build: u32,
    /// The key itself
    pub key: XteaKey,
}

impl XteaKeyEntry {
    /// Create a new key entry
    pub const fn new(game_build: u32, key: XteaKey) -> Self {
        Self { game_build, key }
    }
}

/// Key files in the wild write builds both as numbers and as strings
fn deserialize_build<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Build {
        Number(u32),
        Text(String),
    }

    match Build::deserialize(deserializer)? {
        Build::Number(build) => Ok(build),
        Build::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Store for XTEA keys, indexed by file name
#[derive(Debug, Clone, Default)]
pub struct XteaKeyStore {
    keys: HashMap<String, Vec<XteaKeyEntry>>,
}

impl XteaKeyStore {
    /// Create an empty key store
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a key store from JSON content
    ///
    /// The expected shape is an object mapping file names to key lists:
    ///
    /// ```
    /// use js5_crypto::keys::XteaKeyStore;
    ///
    /// let json = r#"{ "l50_50": [{ "gameBuild": 435, "key": [1, 2, 3, 4] }] }"#;
    /// let store = XteaKeyStore::from_json(json).unwrap();
    /// assert!(store.get("l50_50", 435).is_some());
    /// ```
    pub fn from_json(content: &str) -> Result<Self, CryptoError> {
        let keys: HashMap<String, Vec<XteaKeyEntry>> = serde_json::from_str(content)?;
        Ok(Self { keys })
    }

    /// Load a key store from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize the store back to JSON
    pub fn to_json(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string_pretty(&self.keys)?)
    }

    /// Add a key for a file name, replacing any key for the same build
    pub fn insert(&mut self, name: impl Into<String>, entry: XteaKeyEntry) {
        let entries = self.keys.entry(name.into()).or_default();
        entries.retain(|existing| existing.game_build != entry.game_build);
        entries.push(entry);
    }

    /// Get the key for a file name in the given build
    pub fn get(&self, name: &str, game_build: u32) -> Option<XteaKey> {
        self.keys
            .get(name)?
            .iter()
            .find(|entry| entry.game_build == game_build)
            .map(|entry| entry.key)
    }

    /// All entries known for a file name
    pub fn entries(&self, name: &str) -> &[XteaKeyEntry] {
        self.keys.get(name).map_or(&[], Vec::as_slice)
    }

    /// Number of file names with at least one key
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
