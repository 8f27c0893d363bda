//! Configuration for the cache store

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use js5_formats::CompressionMethod;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{MAIN_ARCHIVE, Result, StorageError};

/// Cipher named by an archive's encryption setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMethod {
    /// XTEA with per-build keys from the key store
    Xtea,
}

/// Encryption applied to units whose name matches a pattern
///
/// Written as a `["xtea", "<pattern>"]` pair. The pattern is compiled when
/// the configuration is loaded.
#[derive(Clone)]
pub struct EncryptionConfig {
    /// Cipher
    pub method: EncryptionMethod,
    /// Names the cipher applies to
    pub pattern: Regex,
}

impl EncryptionConfig {
    /// Create an XTEA setting for names matching `pattern`
    pub fn xtea(pattern: &str) -> Result<Self> {
        Ok(Self {
            method: EncryptionMethod::Xtea,
            pattern: Regex::new(pattern)?,
        })
    }

    /// Whether a unit with this name is encrypted
    pub fn applies_to(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncryptionConfig")
            .field(&self.method)
            .field(&self.pattern.as_str())
            .finish()
    }
}

impl Serialize for EncryptionConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (self.method, self.pattern.as_str()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EncryptionConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (method, pattern) = <(EncryptionMethod, String)>::deserialize(deserializer)?;
        let pattern = Regex::new(&pattern).map_err(D::Error::custom)?;
        Ok(Self { method, pattern })
    }
}

/// Configuration of one archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveConfig {
    /// Archive key, also the index file number
    pub index: u8,

    /// Archive name
    pub name: String,

    /// Encryption of named units, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionConfig>,

    /// Compression used when encoding groups
    #[serde(default)]
    pub compression: CompressionMethod,

    /// Groups and files carry name hashes worth resolving
    #[serde(default)]
    pub files_named: bool,

    /// Encoded group envelopes carry a trailing version
    #[serde(default)]
    pub versioned: bool,

    /// Consumers should present the groups as a flat list
    #[serde(default)]
    pub flatten: bool,
}

impl ArchiveConfig {
    /// Create an unencrypted, uncompressed archive configuration
    pub fn new(index: u8, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            encryption: None,
            compression: CompressionMethod::None,
            files_named: false,
            versioned: false,
            flatten: false,
        }
    }

    /// Set the encryption setting
    #[must_use]
    pub fn with_encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Set the compression method
    #[must_use]
    pub const fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    /// Enable or disable name resolution
    #[must_use]
    pub const fn with_files_named(mut self, named: bool) -> Self {
        self.files_named = named;
        self
    }

    /// Enable or disable trailing envelope versions
    #[must_use]
    pub const fn with_versioned(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }

    /// Enable or disable flattening
    #[must_use]
    pub const fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// Whether the unit with this name is encrypted
    pub fn is_encrypted(&self, name: Option<&str>) -> bool {
        match (&self.encryption, name) {
            (Some(encryption), Some(name)) => encryption.applies_to(name),
            _ => false,
        }
    }
}

/// Configuration for the whole store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Game build the cache belongs to
    pub game_build: u32,

    /// Archive configurations by name
    #[serde(default)]
    pub archives: BTreeMap<String, ArchiveConfig>,
}

impl StoreConfig {
    /// Create a configuration with no archives
    pub fn new(game_build: u32) -> Self {
        Self {
            game_build,
            archives: BTreeMap::new(),
        }
    }

    /// Parse from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Set the game build
    #[must_use]
    pub const fn with_game_build(mut self, game_build: u32) -> Self {
        self.game_build = game_build;
        self
    }

    /// Add an archive, keyed by its name
    #[must_use]
    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archives.insert(archive.name.clone(), archive);
        self
    }

    /// Find an archive by key
    pub fn archive(&self, index: u8) -> Option<&ArchiveConfig> {
        self.archives.values().find(|archive| archive.index == index)
    }

    /// Find an archive by name
    pub fn archive_by_name(&self, name: &str) -> Option<&ArchiveConfig> {
        self.archives.get(name)
    }

    /// The meta archive configuration, required for every operation
    pub fn main_archive(&self) -> Result<&ArchiveConfig> {
        self.archive(MAIN_ARCHIVE).ok_or_else(|| {
            StorageError::Config(format!("no configuration for main archive {MAIN_ARCHIVE}"))
        })
    }

    /// Archive configurations other than the meta archive, by key
    pub fn content_archives(&self) -> Vec<&ArchiveConfig> {
        let mut archives: Vec<_> = self
            .archives
            .values()
            .filter(|archive| archive.index != MAIN_ARCHIVE)
            .collect();
        archives.sort_by_key(|archive| archive.index);
        archives
    }
}
