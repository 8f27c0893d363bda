//! Binary codecs for JS5 game caches
//!
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::missing_panics_doc)] // Slices are bounds-checked before indexing
//! This crate provides symmetric (decoder and encoder) implementations of the
//! formats stored inside a JS5 cache once the sector chains have been read:
//!
//! # Supported Formats
//!
//! - **Compression envelope**: method byte, lengths, payload and optional
//!   trailing version, for `none`, headerless `bzip2` and `gzip` payloads
//! - **Encryption envelope**: the XTEA-protected region of an envelope
//! - **Archive index**: the table of contents of one archive (groups, child
//!   files, names, checksums, digests, sizes and versions)
//! - **Group stripes**: the interleaved layout of groups with several files
//!
//! # Pipeline
//!
//! ```text
//! sector chain bytes → decrypt_envelope → decompress → ArchiveIndex::parse
//!                                                    → decode_group
//! ```
//!
//! # Example
//!
//! ```
//! use js5_formats::compression::{CompressionMethod, compress, decompress};
//! use js5_formats::group::{StripedFile, decode_group, encode_group};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let files = vec![
//!     StripedFile::new(0, b"first".to_vec()),
//!     StripedFile::new(1, b"second".to_vec()),
//! ];
//!
//! let group = encode_group(&files)?;
//! let envelope = compress(CompressionMethod::Gzip, &group, Some(3))?;
//!
//! let unpacked = decompress(&envelope)?;
//! assert_eq!(unpacked.version, 3);
//!
//! let decoded = decode_group(&unpacked.data, &[0, 1])?;
//! assert_eq!(decoded, files);
//! # Ok(())
//! # }
//! ```

pub mod archive_index;
pub mod buffer;
pub mod compression;
pub mod encryption;
pub mod error;
pub mod group;

pub use archive_index::{ArchiveFormat, ArchiveIndex, FileEntry, GroupEntry, IndexFlags};
pub use buffer::ByteReader;
pub use compression::{CompressionMethod, Decompressed, EnvelopeHeader};
pub use error::{FormatError, Result};
pub use group::StripedFile;
