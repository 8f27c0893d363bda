//! Name hash lookup
//!
//! Indices only store DJB2 hashes of group and file names. A name table maps
//! hashes back to names gathered from other sources.

use std::collections::HashMap;
use std::path::Path;

use js5_crypto::djb2;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Lookup between names and their hashes
pub trait NameTable: Send + Sync {
    /// Name with the given hash, if known
    fn name_for(&self, hash: i32) -> Option<String>;

    /// Hash of a name
    fn hash_for(&self, name: &str) -> i32 {
        djb2(name)
    }
}

/// In-memory name table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameHashTable {
    names: HashMap<i32, String>,
}

impl NameHashTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of `"<hash>": "<name>"` pairs
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Add a name, returning its hash
    pub fn insert(&mut self, name: impl Into<String>) -> i32 {
        let name = name.into();
        let hash = djb2(&name);
        self.names.insert(hash, name);
        hash
    }

    /// Number of names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for NameHashTable {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut table = Self::new();
        for name in iter {
            table.insert(name);
        }
        table
    }
}

impl NameTable for NameHashTable {
    fn name_for(&self, hash: i32) -> Option<String> {
        self.names.get(&hash).cloned()
    }
}
