//! Compression envelope
//!
//! Every unit stored in the cache is wrapped in a small envelope:
//!
//! ```text
//! none:        [0x00][u32 len][payload][u16 version]?
//! bzip2/gzip:  [method][u32 compressed len][u32 raw len][payload][u16 version]?
//! ```
//!
//! bzip2 payloads are stored without the 4-byte `BZh1` stream header; it is
//! stripped after compression and put back before decompression.

use std::io::{Read, Write};

use bytes::BufMut;
use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder};
use serde::{Deserialize, Serialize};

use crate::buffer::ByteReader;
use crate::error::{FormatError, Result};

/// Maximum allowed decompression size (1 GB)
///
/// Limits decompression output so a corrupt or hostile length field cannot
/// make the decoder allocate without bound.
pub const MAX_DECOMPRESSION_SIZE: usize = 1024 * 1024 * 1024;

/// Stream header the client omits from bzip2 payloads.
pub const BZIP2_HEADER: &[u8; 4] = b"BZh1";

/// Compression method tag stored in the first envelope byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionMethod {
    /// Stored as-is
    #[default]
    None = 0,
    /// Headerless bzip2
    #[serde(alias = "bzip")]
    Bzip2 = 1,
    /// gzip
    Gzip = 2,
}

impl CompressionMethod {
    /// Parse from byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Bzip2),
            2 => Ok(Self::Gzip),
            other => Err(FormatError::UnsupportedCompression(other)),
        }
    }

    /// Get byte representation
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Size of the envelope header for this method
    pub const fn header_size(self) -> usize {
        match self {
            Self::None => 5,
            Self::Bzip2 | Self::Gzip => 9,
        }
    }
}

/// Parsed envelope header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Compression method
    pub method: CompressionMethod,
    /// Length of the stored payload
    pub compressed_len: u32,
    /// Length after decompression, absent for uncompressed envelopes
    pub uncompressed_len: Option<u32>,
}

impl EnvelopeHeader {
    /// Read the header from the start of an envelope
    pub fn parse(reader: &mut ByteReader<'_>) -> Result<Self> {
        let method = CompressionMethod::from_byte(reader.read_u8()?)?;
        let compressed_len = reader.read_u32()?;
        let uncompressed_len = match method {
            CompressionMethod::None => None,
            CompressionMethod::Bzip2 | CompressionMethod::Gzip => Some(reader.read_u32()?),
        };
        Ok(Self {
            method,
            compressed_len,
            uncompressed_len,
        })
    }

    /// Offset one past the payload, where the optional version starts
    pub const fn payload_end(&self) -> usize {
        self.method.header_size() + self.compressed_len as usize
    }
}

/// Result of opening an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompressed {
    /// Method the payload was stored with
    pub method: CompressionMethod,
    /// Decompressed bytes
    pub data: Vec<u8>,
    /// Trailing version, 0 when the envelope has none
    pub version: u16,
}

/// Wrap `data` in an envelope, compressing it with `method`
pub fn compress(method: CompressionMethod, data: &[u8], version: Option<u16>) -> Result<Vec<u8>> {
    let raw_len = u32::try_from(data.len()).map_err(|_| FormatError::ValueOutOfRange {
        field: "envelope length",
        value: data.len() as u64,
    })?;

    let payload = match method {
        CompressionMethod::None => None,
        CompressionMethod::Bzip2 => Some(compress_bzip2(data)?),
        CompressionMethod::Gzip => Some(compress_gzip(data)?),
    };

    let payload_len = payload.as_ref().map_or(data.len(), Vec::len);
    let mut output = Vec::with_capacity(method.header_size() + payload_len + 2);
    output.put_u8(method.as_byte());

    match payload {
        None => {
            output.put_u32(raw_len);
            output.put_slice(data);
        }
        Some(payload) => {
            output.put_u32(payload.len() as u32);
            output.put_u32(raw_len);
            output.put_slice(&payload);
        }
    }

    if let Some(version) = version {
        output.put_u16(version);
    }

    Ok(output)
}

/// Open an envelope produced by [`compress`] (after any decryption)
pub fn decompress(envelope: &[u8]) -> Result<Decompressed> {
    let mut reader = ByteReader::new(envelope);
    let header = EnvelopeHeader::parse(&mut reader)?;
    let payload = reader.read_bytes(header.compressed_len as usize)?;

    let data = match (header.method, header.uncompressed_len) {
        (CompressionMethod::None, _) | (_, None) => payload.to_vec(),
        (method, Some(expected)) => {
            let data = match method {
                CompressionMethod::Bzip2 => decompress_bzip2(payload, expected)?,
                _ => decompress_gzip(payload, expected)?,
            };
            if data.len() != expected as usize {
                return Err(FormatError::CompressionLengthMismatch {
                    expected,
                    actual: data.len(),
                });
            }
            data
        }
    };

    let version = if reader.remaining() >= 2 {
        reader.read_u16()?
    } else {
        0
    };

    Ok(Decompressed {
        method: header.method,
        data,
        version,
    })
}

fn compress_bzip2(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(1));
    encoder
        .write_all(data)
        .map_err(|e| FormatError::CompressionError(format!("bzip2 compression failed: {e}")))?;
    let mut stream = encoder
        .finish()
        .map_err(|e| FormatError::CompressionError(format!("bzip2 compression failed: {e}")))?;

    if !stream.starts_with(BZIP2_HEADER) {
        return Err(FormatError::CompressionError(
            "bzip2 stream does not start with BZh1".to_string(),
        ));
    }
    stream.drain(..BZIP2_HEADER.len());
    Ok(stream)
}

fn decompress_bzip2(payload: &[u8], expected: u32) -> Result<Vec<u8>> {
    let decoder = bzip2::read::BzDecoder::new(BZIP2_HEADER.as_slice().chain(payload));
    read_limited(decoder, expected, "bzip2")
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(data, Compression::default());
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .map_err(|e| FormatError::CompressionError(format!("gzip compression failed: {e}")))?;
    Ok(compressed)
}

fn decompress_gzip(payload: &[u8], expected: u32) -> Result<Vec<u8>> {
    read_limited(GzDecoder::new(payload), expected, "gzip")
}

/// Drain a decoder, refusing to grow past [`MAX_DECOMPRESSION_SIZE`]
fn read_limited(mut decoder: impl Read, expected: u32, codec: &str) -> Result<Vec<u8>> {
    let mut decompressed = Vec::with_capacity((expected as usize).min(MAX_DECOMPRESSION_SIZE));
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = decoder.read(&mut buffer).map_err(|e| {
            FormatError::CompressionError(format!("{codec} decompression failed: {e}"))
        })?;

        if bytes_read == 0 {
            break;
        }

        if decompressed.len() + bytes_read > MAX_DECOMPRESSION_SIZE {
            return Err(FormatError::CompressionError(format!(
                "Decompressed size exceeds limit of {} bytes",
                MAX_DECOMPRESSION_SIZE
            )));
        }

        decompressed.extend_from_slice(&buffer[..bytes_read]);
    }

    Ok(decompressed)
}
