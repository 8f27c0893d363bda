//! XTEA encryption envelope
//!
//! Encrypted units keep their method byte and compressed length in the clear;
//! everything after them is encrypted up to, but not including, a trailing
//! version field. Whether a version trailer exists is decided before
//! decryption from the lengths alone: when at least two bytes remain past
//! `compressed_len + 9`, the last two bytes are left in the clear.

use std::ops::Range;

use js5_crypto::xtea::{XteaCipher, XteaKey};

use crate::buffer::ByteReader;
use crate::error::{FormatError, Result};

/// Bytes before the encrypted region (method byte and compressed length).
pub const CLEAR_HEADER_SIZE: usize = 5;

/// Byte range of `envelope` covered by encryption
pub fn encrypted_region(envelope: &[u8]) -> Result<Range<usize>> {
    let mut reader = ByteReader::new(envelope);
    reader.read_u8()?;
    let compressed_len = reader.read_u32()?;

    let start = reader.position();
    let total = envelope.len() as i64;
    let mut length_offset = start;
    if total - (i64::from(compressed_len) + start as i64 + 4) >= 2 {
        length_offset += 2;
    }

    let length = envelope.len() - length_offset;
    Ok(start..start + length)
}

/// Decrypt the protected region of an envelope
pub fn decrypt_envelope(envelope: &[u8], key: &XteaKey) -> Result<Vec<u8>> {
    apply(envelope, key, XteaCipher::decrypt_in_place)
}

/// Encrypt the protected region of an envelope
pub fn encrypt_envelope(envelope: &[u8], key: &XteaKey) -> Result<Vec<u8>> {
    apply(envelope, key, XteaCipher::encrypt_in_place)
}

fn apply(
    envelope: &[u8],
    key: &XteaKey,
    transform: fn(&XteaCipher, &mut [u8]),
) -> Result<Vec<u8>> {
    if !key.is_valid() {
        return Err(FormatError::MissingEncryptionKeys);
    }

    let region = encrypted_region(envelope)?;
    let mut output = envelope.to_vec();
    transform(&XteaCipher::new(key), &mut output[region]);
    Ok(output)
}
