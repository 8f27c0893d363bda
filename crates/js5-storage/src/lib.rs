//! Local JS5 cache storage for RuneScape-style game clients.
//!
//! This crate reads and writes the on-disk cache a client keeps next to its
//! installation and exposes it as a tree of entities:
//!
//! - **Archive**: one of up to 255 top-level containers, described by an
//!   index stored in the meta archive (255)
//! - **Group**: the unit actually stored as one sector chain
//! - **Flat file**: a child of a group, the smallest addressable unit
//!
//! # Storage Layout
//!
//! ```text
//! main_file_cache.dat2     shared data file, 520-byte chained sectors
//! main_file_cache.idx0..N  one index file per archive, 6 bytes per entry
//! main_file_cache.idx255   meta index, one entry per archive
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use js5_storage::{Js5Store, StoreConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::load("config/cache.json")?;
//! let mut store = Js5Store::open(config, "/path/to/cache")?;
//!
//! store.decode_all()?;
//! for archive in store.archives() {
//!     println!("{}: {} groups", archive.key(), archive.children.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use js5_crypto::CryptoError;
use js5_formats::FormatError;
use thiserror::Error;

// Store and archive configuration
pub mod config;

// Per-archive codec state
pub mod context;

// Archive / group / flat file tree
pub mod entity;

// Name hash lookup
pub mod name_table;

// Index metadata records
pub mod record;

// Persistence interface
pub mod repository;

// Sector chains in the data and index files
pub mod sector;

// Orchestration over the whole cache
pub mod store;

// Change detection
pub mod validate;

pub use config::{ArchiveConfig, EncryptionConfig, StoreConfig};
pub use context::CodecContext;
pub use entity::{Archive, CacheEntity, FlatFile, Group, Key};
pub use name_table::{NameHashTable, NameTable};
pub use record::{FileError, FileIndexRecord, FileKind};
pub use repository::{IndexRepository, MemoryRepository, RecordFilter};
pub use sector::SectorStore;
pub use store::Js5Store;
pub use validate::validate;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary layout error while reading or writing sectors.
    #[error("Binary layout error: {0}")]
    BinRw(#[from] binrw::Error),

    /// Codec error from an envelope, index or group.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Key handling error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid regular expression.
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error. Aborts the whole operation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller error. Aborts the whole operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Index entry absent or empty.
    #[error("File {file} missing from archive {archive}")]
    FileMissing {
        /// Archive key
        archive: u8,
        /// File key within the archive index
        file: u32,
    },

    /// Sector chain does not belong to the requested file.
    #[error("Corrupt sector chain for file {file} in archive {archive}: {reason}")]
    CorruptChain {
        /// Archive key
        archive: u8,
        /// File key within the archive index
        file: u32,
        /// What did not match
        reason: String,
    },

    /// Unit requires a key the key store does not have.
    #[error("No valid XTEA key for {0}")]
    MissingEncryptionKeys(String),

    /// Lookup key does not resolve to an entity.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl StorageError {
    /// Kind recorded on a unit's metadata when this error ends its decode
    ///
    /// Returns `None` for errors that must abort the whole batch.
    pub fn file_error(&self) -> Option<FileError> {
        match self {
            Self::FileMissing { .. } => Some(FileError::FileMissing),
            Self::CorruptChain { .. } | Self::BinRw(_) => Some(FileError::CorruptChain),
            Self::MissingEncryptionKeys(_) => Some(FileError::MissingEncryptionKeys),
            Self::Format(err) => Some(FileError::from(err)),
            _ => None,
        }
    }

    /// Whether the error aborts a batch instead of being recorded
    pub fn is_fatal(&self) -> bool {
        self.file_error().is_none()
    }
}

/// Version information for the storage system.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared data file name.
pub const DATA_FILE: &str = "main_file_cache.dat2";

/// Index file name prefix, followed by the archive key.
pub const INDEX_FILE_PREFIX: &str = "main_file_cache.idx";

/// Key of the meta archive holding every archive index.
pub const MAIN_ARCHIVE: u8 = 255;

/// Index file name for an archive
pub fn index_file_name(archive: u8) -> String {
    format!("{INDEX_FILE_PREFIX}{archive}")
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_index_file_name() {
        assert_eq!(index_file_name(0), "main_file_cache.idx0");
        assert_eq!(index_file_name(255), "main_file_cache.idx255");
    }

    #[test]
    fn test_recoverable_errors() {
        let missing = StorageError::FileMissing {
            archive: 2,
            file: 10,
        };
        assert_eq!(missing.file_error(), Some(FileError::FileMissing));
        assert!(!missing.is_fatal());

        let mismatch = StorageError::Format(FormatError::CompressionLengthMismatch {
            expected: 10,
            actual: 9,
        });
        assert_eq!(
            mismatch.file_error(),
            Some(FileError::CompressionLengthMismatch)
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(StorageError::Config("no main archive".to_string()).is_fatal());
        assert!(StorageError::InvalidArgument("255/255".to_string()).is_fatal());
        assert!(StorageError::Io(std::io::Error::other("disk")).is_fatal());
    }
}
