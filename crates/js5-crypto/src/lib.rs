//! Cryptographic primitives for JS5 game caches
//!
//! This crate provides the small set of primitives the cache codecs need:
//!
//! - **Encryption**: the XTEA block cipher protecting selected group files
//! - **Key Management**: per-file XTEA keys selected by game build
//! - **Hashing**: the DJB2 string hash used for group and file names
//!
//! # Examples
//!
//! ## Name Hashing
//!
//! ```
//! use js5_crypto::djb2::djb2;
//!
//! assert_eq!(djb2("hello"), 99_162_322);
//! ```
//!
//! ## XTEA Round Trip
//!
//! ```
//! use js5_crypto::xtea::{XteaKey, decrypt_xtea, encrypt_xtea};
//!
//! let key = XteaKey::new([1, 2, 3, 4]);
//! let plain = b"sixteen byte msg".to_vec();
//!
//! let cipher = encrypt_xtea(&plain, &key);
//! assert_ne!(cipher, plain);
//! assert_eq!(decrypt_xtea(&cipher, &key), plain);
//! ```

#![warn(missing_docs)]

pub mod djb2;
pub mod error;
pub mod keys;
pub mod xtea;

pub use error::CryptoError;

// Re-export commonly used types
pub use djb2::djb2;
pub use keys::{XteaKeyEntry, XteaKeyStore};
pub use xtea::{XteaCipher, XteaKey};
