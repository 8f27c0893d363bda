//! XTEA block cipher as used by JS5 caches
//!
//! This implements the 32-round XTEA variant the client uses to protect
//! selected group files (map locations being the classic example):
//! - 128-bit key held as four signed 32-bit words
//! - 64-bit blocks read as two big-endian words
//! - Trailing bytes that do not fill a whole block are left untouched

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// XTEA key schedule constant.
pub const GOLDEN_RATIO: u32 = 0x9E37_79B9;

/// Number of Feistel rounds.
pub const ROUNDS: u32 = 32;

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 8;

/// A 128-bit XTEA key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XteaKey(pub [i32; 4]);

impl XteaKey {
    /// The all-zero key, which is never a usable key
    pub const ZERO: Self = Self([0; 4]);

    /// Create a key from four words
    pub const fn new(words: [i32; 4]) -> Self {
        Self(words)
    }

    /// A key is usable when at least one word is non-zero.
    pub fn is_valid(&self) -> bool {
        self.0.iter().any(|&word| word != 0)
    }

    /// Key words reinterpreted as unsigned for the round function
    pub fn words(&self) -> [u32; 4] {
        self.0.map(|word| word as u32)
    }

    /// Parse key from a 32 character hex string (four big-endian words)
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid hex: {e}")))?;

        if bytes.len() != 16 {
            return Err(CryptoError::InvalidKeySize {
                expected: 16,
                actual: bytes.len(),
            });
        }

        let mut words = [0i32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self(words))
    }

    /// Encode the key as 32 upper-case hex characters
    pub fn to_hex(&self) -> String {
        let bytes: Vec<u8> = self.0.iter().flat_map(|word| word.to_be_bytes()).collect();
        hex::encode_upper(bytes)
    }
}

impl fmt::Display for XteaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[i32; 4]> for XteaKey {
    fn from(words: [i32; 4]) -> Self {
        Self(words)
    }
}

/// XTEA cipher bound to one key
#[derive(Debug, Clone, Copy)]
pub struct XteaCipher {
    key: [u32; 4],
}

impl XteaCipher {
    /// Create a cipher for the given key
    pub fn new(key: &XteaKey) -> Self {
        Self { key: key.words() }
    }

    /// Encrypt one block
    pub fn encrypt_block(&self, [mut v0, mut v1]: [u32; 2]) -> [u32; 2] {
        let mut sum = 0u32;
        for _ in 0..ROUNDS {
            v0 = v0.wrapping_add(
                (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                    ^ sum.wrapping_add(self.key[(sum & 3) as usize]),
            );
            sum = sum.wrapping_add(GOLDEN_RATIO);
            v1 = v1.wrapping_add(
                (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                    ^ sum.wrapping_add(self.key[((sum >> 11) & 3) as usize]),
            );
        }
        [v0, v1]
    }

    /// Decrypt one block
    pub fn decrypt_block(&self, [mut v0, mut v1]: [u32; 2]) -> [u32; 2] {
        let mut sum = GOLDEN_RATIO.wrapping_mul(ROUNDS);
        for _ in 0..ROUNDS {
            v1 = v1.wrapping_sub(
                (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                    ^ sum.wrapping_add(self.key[((sum >> 11) & 3) as usize]),
            );
            sum = sum.wrapping_sub(GOLDEN_RATIO);
            v0 = v0.wrapping_sub(
                (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                    ^ sum.wrapping_add(self.key[(sum & 3) as usize]),
            );
        }
        [v0, v1]
    }

    /// Encrypt every whole block of `data` in place
    pub fn encrypt_in_place(&self, data: &mut [u8]) {
        Self::apply(data, |block| self.encrypt_block(block));
    }

    /// Decrypt every whole block of `data` in place
    pub fn decrypt_in_place(&self, data: &mut [u8]) {
        Self::apply(data, |block| self.decrypt_block(block));
    }

    fn apply(data: &mut [u8], round: impl Fn([u32; 2]) -> [u32; 2]) {
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let v0 = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let v1 = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            let [v0, v1] = round([v0, v1]);
            chunk[..4].copy_from_slice(&v0.to_be_bytes());
            chunk[4..].copy_from_slice(&v1.to_be_bytes());
        }
    }
}

/// Decrypt data with XTEA, copying any partial trailing block verbatim
pub fn decrypt_xtea(data: &[u8], key: &XteaKey) -> Vec<u8> {
    let mut output = data.to_vec();
    XteaCipher::new(key).decrypt_in_place(&mut output);
    output
}

/// Encrypt data with XTEA, copying any partial trailing block verbatim
pub fn encrypt_xtea(data: &[u8], key: &XteaKey) -> Vec<u8> {
    let mut output = data.to_vec();
    XteaCipher::new(key).encrypt_in_place(&mut output);
    output
}
