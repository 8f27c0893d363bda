//! Index metadata shared by archives, groups and flat files

use js5_formats::FormatError;
use serde::{Deserialize, Serialize};

use crate::repository::RecordFilter;

/// Checksum value recorded when there are no bytes to checksum.
pub const ABSENT_CHECKSUM: i32 = -1;

/// Level of the entity tree a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Top-level archive
    Archive,
    /// Group within an archive
    Group,
    /// Flat file within a group
    File,
}

/// Why a unit could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileError {
    /// Index entry absent or zero-size
    FileMissing,
    /// Sector headers do not match the requested file
    CorruptChain,
    /// No valid XTEA key for a unit that needs one
    MissingEncryptionKeys,
    /// Decompressed size differs from the envelope
    CompressionLengthMismatch,
    /// Unknown method or a payload the decompressor rejects
    CompressionFailure,
    /// Index or group footer is malformed
    InvalidArchiveFormat,
    /// Read past the end of a buffer
    ReaderUnderflow,
}

impl From<&FormatError> for FileError {
    fn from(err: &FormatError) -> Self {
        match err {
            FormatError::Underflow { .. } | FormatError::Io(_) => Self::ReaderUnderflow,
            FormatError::CompressionLengthMismatch { .. } => Self::CompressionLengthMismatch,
            FormatError::UnsupportedCompression(_) | FormatError::CompressionError(_) => {
                Self::CompressionFailure
            }
            FormatError::MissingEncryptionKeys => Self::MissingEncryptionKeys,
            FormatError::InvalidArchiveFormat(_)
            | FormatError::InvalidGroupFooter { .. }
            | FormatError::ValueOutOfRange { .. } => Self::InvalidArchiveFormat,
        }
    }
}

/// Metadata describing one archive, group or flat file
///
/// Checksums, digests and sizes are derived from the unit's bytes and
/// refreshed by [`crate::validate`]; the rest is read from the archive index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIndexRecord {
    /// Tree level
    pub file_type: FileKind,
    /// Game build the cache belongs to
    pub game_build: u32,
    /// Key within the parent
    pub key: u32,
    /// Owning archive (the archive's own key for archives)
    pub archive_key: u32,
    /// Owning group (the group's own key for groups, zero for archives)
    pub group_key: u32,
    /// Resolved name
    pub name: Option<String>,
    /// DJB2 hash of the name
    pub name_hash: Option<i32>,
    /// Unit version
    pub version: u32,
    /// Number of children recorded in the index
    pub child_count: u32,
    /// CRC-32 of the decompressed bytes
    pub checksum: i32,
    /// SHA-256 of the decompressed bytes
    #[serde(with = "hex_digest")]
    pub sha_digest: Option<[u8; 32]>,
    /// Decompressed size
    pub file_size: u32,
    /// CRC-32 of the stored envelope
    pub compressed_checksum: i32,
    /// SHA-256 of the stored envelope
    #[serde(with = "hex_digest")]
    pub compressed_sha_digest: Option<[u8; 32]>,
    /// Stored envelope size
    pub compressed_file_size: u32,
    /// Whirlpool digest carried by the index
    #[serde(with = "hex_digest")]
    pub whirlpool_digest: Option<[u8; 64]>,
    /// Index format byte (archives only)
    pub archive_format: Option<u8>,
    /// Envelope was XTEA encrypted
    pub encrypted: bool,
    /// Number of stripes the file spans in its group
    pub stripe_count: u32,
    /// Cumulative byte count through each stripe
    pub stripes: Vec<u32>,
    /// Decode failure, if any
    pub file_error: Option<FileError>,
}

impl FileIndexRecord {
    /// Create a zeroed record
    pub fn new(
        file_type: FileKind,
        game_build: u32,
        archive_key: u32,
        group_key: u32,
        key: u32,
    ) -> Self {
        Self {
            file_type,
            game_build,
            key,
            archive_key,
            group_key,
            name: None,
            name_hash: None,
            version: 0,
            child_count: 0,
            checksum: ABSENT_CHECKSUM,
            sha_digest: None,
            file_size: 0,
            compressed_checksum: ABSENT_CHECKSUM,
            compressed_sha_digest: None,
            compressed_file_size: 0,
            whirlpool_digest: None,
            archive_format: None,
            encrypted: false,
            stripe_count: 0,
            stripes: Vec::new(),
            file_error: None,
        }
    }

    /// Identity used by the persistence layer
    pub fn filter(&self) -> RecordFilter {
        RecordFilter {
            file_type: self.file_type,
            game_build: self.game_build,
            key: self.key,
            archive_key: self.archive_key,
            group_key: self.group_key,
        }
    }

    /// Name, or the decimal name hash, or the decimal key
    pub fn display_name(&self) -> String {
        match (&self.name, self.name_hash) {
            (Some(name), _) => name.clone(),
            (None, Some(hash)) => hash.to_string(),
            (None, None) => self.key.to_string(),
        }
    }
}

/// Digests are stored as lowercase hex strings
mod hex_digest {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(
        digest: &Option<[u8; N]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match digest {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, const N: usize>(
        deserializer: D,
    ) -> Result<Option<[u8; N]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let mut digest = [0u8; N];
        hex::decode_to_slice(&text, &mut digest).map_err(D::Error::custom)?;
        Ok(Some(digest))
    }
}
