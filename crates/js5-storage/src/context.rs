//! Per-archive codec state
//!
//! Codec calls never reach for global state: everything an archive's units
//! need to be opened or sealed is passed in through a [`CodecContext`].

use js5_crypto::{XteaKey, XteaKeyStore};
use js5_formats::compression::{self, Decompressed};
use js5_formats::encryption::{decrypt_envelope, encrypt_envelope};
use tracing::debug;

use crate::config::ArchiveConfig;
use crate::name_table::NameTable;
use crate::{Result, StorageError};

/// Everything needed to decode or encode the units of one archive
#[derive(Clone, Copy)]
pub struct CodecContext<'a> {
    /// Game build used for key lookup
    pub game_build: u32,
    /// Configuration of the archive being processed
    pub archive: &'a ArchiveConfig,
    /// Name lookup
    pub names: &'a dyn NameTable,
    /// XTEA keys
    pub keys: &'a XteaKeyStore,
}

/// Envelope contents after decryption and decompression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEnvelope {
    /// Decompressed contents and trailing version
    pub contents: Decompressed,
    /// Envelope was encrypted
    pub encrypted: bool,
}

impl<'a> CodecContext<'a> {
    /// Create a context for one archive
    pub fn new(
        game_build: u32,
        archive: &'a ArchiveConfig,
        names: &'a dyn NameTable,
        keys: &'a XteaKeyStore,
    ) -> Self {
        Self {
            game_build,
            archive,
            names,
            keys,
        }
    }

    /// Name for a hash, if the archive names its units
    pub fn resolve_name(&self, hash: Option<i32>) -> Option<String> {
        if !self.archive.files_named {
            return None;
        }
        self.names.name_for(hash?)
    }

    /// Key for a unit, `None` when the unit is not encrypted
    ///
    /// Fails when the unit is encrypted but the key store has no usable key
    /// for the current build.
    pub fn encryption_key(&self, name: Option<&str>) -> Result<Option<XteaKey>> {
        let Some(name) = name.filter(|name| self.archive.is_encrypted(Some(name))) else {
            return Ok(None);
        };
        match self.keys.get(name, self.game_build) {
            Some(key) if key.is_valid() => Ok(Some(key)),
            _ => Err(StorageError::MissingEncryptionKeys(name.to_string())),
        }
    }

    /// Decrypt if needed, then decompress
    pub fn open(&self, name: Option<&str>, envelope: &[u8]) -> Result<OpenedEnvelope> {
        let key = self.encryption_key(name)?;
        let contents = match &key {
            Some(key) => compression::decompress(&decrypt_envelope(envelope, key)?)?,
            None => compression::decompress(envelope)?,
        };
        debug!(
            "Opened {} envelope of {} bytes into {} bytes",
            self.archive.name,
            envelope.len(),
            contents.data.len()
        );
        Ok(OpenedEnvelope {
            contents,
            encrypted: key.is_some(),
        })
    }

    /// Compress with the archive's method, then encrypt if needed
    ///
    /// The version trailer is written only for versioned archives.
    pub fn seal(&self, name: Option<&str>, data: &[u8], version: u32) -> Result<(Vec<u8>, bool)> {
        let key = self.encryption_key(name)?;
        let version = self.archive.versioned.then_some(version as u16);
        let envelope = compression::compress(self.archive.compression, data, version)?;
        match key {
            Some(key) => Ok((encrypt_envelope(&envelope, &key)?, true)),
            None => Ok((envelope, false)),
        }
    }
}
