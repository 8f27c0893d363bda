//! Error types for the JS5 codecs

use thiserror::Error;

/// Errors that can occur when decoding or encoding cache formats
#[derive(Debug, Error)]
pub enum FormatError {
    /// A read ran past the end of the buffer
    #[error("Reader underflow at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Underflow {
        /// Read position when the read was attempted
        offset: usize,
        /// Bytes the read required
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Unknown compression method byte
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u8),

    /// Compressor or decompressor failure
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Decompressed output length disagrees with the envelope
    #[error("Decompressed length mismatch: envelope says {expected}, got {actual}")]
    CompressionLengthMismatch {
        /// Length recorded in the envelope
        expected: u32,
        /// Length actually produced
        actual: usize,
    },

    /// No usable XTEA key for an encrypted envelope
    #[error("Missing or invalid encryption keys")]
    MissingEncryptionKeys,

    /// Archive index header is not understood
    #[error("Invalid archive format: {0}")]
    InvalidArchiveFormat(String),

    /// Group stripe footer does not fit inside the group
    #[error("Invalid group footer: {stripes} stripes x {files} files does not fit in {len} bytes")]
    InvalidGroupFooter {
        /// Stripe count read from the last byte
        stripes: usize,
        /// Number of child files
        files: usize,
        /// Group length in bytes
        len: usize,
    },

    /// A value does not fit the field it is encoded into
    #[error("Value {value} out of range for {field}")]
    ValueOutOfRange {
        /// Field being encoded
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// IO error from a compression stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, FormatError>;

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FormatError::Underflow {
            offset: 4,
            needed: 2,
            remaining: 1,
        };
        assert!(err.to_string().contains("offset 4"));

        let err = FormatError::CompressionLengthMismatch {
            expected: 100,
            actual: 99,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("99"));

        let err = FormatError::InvalidGroupFooter {
            stripes: 9,
            files: 2,
            len: 10,
        };
        assert!(err.to_string().contains("9 stripes"));
    }
}
