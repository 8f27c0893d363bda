//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Key file could not be parsed
    #[error("Key file parse error: {0}")]
    KeyFileParse(#[from] serde_json::Error),

    /// Key file could not be read
    #[error("Key file I/O error: {0}")]
    Io(#[from] std::io::Error),
}
