//! Group stripe format
//!
//! A group with several child files stores their bytes interleaved in
//! stripes, followed by a footer of per-file stripe lengths and a trailing
//! stripe count:
//!
//! ```text
//! stripe 0: file 0 bytes, file 1 bytes, ...
//! stripe 1: file 0 bytes, file 1 bytes, ...
//! ...
//! footer:   i32 length per (stripe, file), stripe-major
//! u8        stripe count
//! ```
//!
//! Each footer value is the number of bytes that file contributes to that
//! stripe. A group with exactly one child is stored as that child's bytes
//! with no footer.

use bytes::BufMut;

use crate::buffer::ByteReader;
use crate::error::{FormatError, Result};

/// Largest stripe count the trailing byte can hold.
pub const MAX_STRIPES: usize = u8::MAX as usize;

/// Child file of a group together with its stripe boundaries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripedFile {
    /// File key within the group
    pub key: u32,
    /// File contents
    pub data: Vec<u8>,
    /// Cumulative byte count through each stripe
    pub stripes: Vec<u32>,
}

impl StripedFile {
    /// Create a file stored in a single stripe
    pub fn new(key: u32, data: Vec<u8>) -> Self {
        let stripes = vec![data.len() as u32];
        Self { key, data, stripes }
    }

    /// Create a file with explicit cumulative stripe boundaries
    pub fn with_stripes(key: u32, data: Vec<u8>, stripes: Vec<u32>) -> Self {
        Self { key, data, stripes }
    }

    /// Number of stripes the file is split across
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Byte length of each stripe
    pub fn stripe_lengths(&self) -> impl Iterator<Item = u32> + '_ {
        let mut previous = 0;
        self.stripes.iter().map(move |&end| {
            let length = end.saturating_sub(previous);
            previous = end;
            length
        })
    }
}

/// Split group bytes into child files
///
/// `keys` lists the child keys in ascending order, as recorded by the
/// archive index. Stripe data that would run into the footer is clamped at
/// the footer rather than rejected.
pub fn decode_group(data: &[u8], keys: &[u32]) -> Result<Vec<StripedFile>> {
    match keys {
        [] => return Ok(Vec::new()),
        [key] => {
            return Ok(vec![StripedFile::new(*key, data.to_vec())]);
        }
        _ => {}
    }

    let Some((&stripe_byte, body)) = data.split_last() else {
        return Err(FormatError::Underflow {
            offset: 0,
            needed: 1,
            remaining: 0,
        });
    };
    let stripe_count = usize::from(stripe_byte);
    let files = keys.len();

    let footer_start = stripe_count
        .checked_mul(files)
        .and_then(|entries| entries.checked_mul(4))
        .and_then(|footer_len| body.len().checked_sub(footer_len))
        .ok_or(FormatError::InvalidGroupFooter {
            stripes: stripe_count,
            files,
            len: data.len(),
        })?;

    let mut lengths = vec![vec![0u32; stripe_count]; files];
    let mut totals = vec![0usize; files];
    let mut footer = ByteReader::new(&body[footer_start..]);
    for stripe in 0..stripe_count {
        for (file, row) in lengths.iter_mut().enumerate() {
            let delta = footer.read_i32()?;
            let delta = u32::try_from(delta).map_err(|_| FormatError::ValueOutOfRange {
                field: "stripe length",
                value: u64::from(delta as u32),
            })?;
            row[stripe] = delta;
            totals[file] += delta as usize;
        }
    }

    let mut outputs: Vec<StripedFile> = keys
        .iter()
        .zip(&totals)
        .map(|(&key, &total)| StripedFile {
            key,
            data: Vec::with_capacity(total.min(footer_start)),
            stripes: Vec::with_capacity(stripe_count),
        })
        .collect();

    let mut position = 0usize;
    for stripe in 0..stripe_count {
        for (output, row) in outputs.iter_mut().zip(&lengths) {
            let end = position.saturating_add(row[stripe] as usize).min(footer_start);
            output.data.extend_from_slice(&body[position..end]);
            output.stripes.push(output.data.len() as u32);
            position = end;
        }
    }

    Ok(outputs)
}

/// Stripe boundaries [`encode_group`] writes for each file
///
/// Every file is padded to the largest stripe count in the group and its
/// last boundary is pinned to its data length. A lone file is one stripe.
pub fn group_stripes(files: &[StripedFile]) -> Result<Vec<Vec<u32>>> {
    if let [file] = files {
        return Ok(vec![vec![file.data.len() as u32]]);
    }

    let stripe_count = files
        .iter()
        .map(StripedFile::stripe_count)
        .max()
        .unwrap_or(0)
        .max(1);
    if stripe_count > MAX_STRIPES {
        return Err(FormatError::ValueOutOfRange {
            field: "stripe count",
            value: stripe_count as u64,
        });
    }

    files
        .iter()
        .map(|file| normalize_stripes(file, stripe_count))
        .collect()
}

/// Interleave child files into group bytes
///
/// Files are written in the order given, with the boundaries from
/// [`group_stripes`].
pub fn encode_group(files: &[StripedFile]) -> Result<Vec<u8>> {
    match files {
        [] => return Ok(Vec::new()),
        [file] => return Ok(file.data.clone()),
        _ => {}
    }

    let boundaries = group_stripes(files)?;
    let stripe_count = boundaries.first().map_or(1, Vec::len);

    let data_len: usize = files.iter().map(|file| file.data.len()).sum();
    let mut out = Vec::with_capacity(data_len + stripe_count * files.len() * 4 + 1);

    for stripe in 0..stripe_count {
        for (file, ends) in files.iter().zip(&boundaries) {
            let start = if stripe == 0 { 0 } else { ends[stripe - 1] };
            out.put_slice(&file.data[start as usize..ends[stripe] as usize]);
        }
    }

    for stripe in 0..stripe_count {
        for ends in &boundaries {
            let start = if stripe == 0 { 0 } else { ends[stripe - 1] };
            out.put_i32((ends[stripe] - start) as i32);
        }
    }

    out.put_u8(stripe_count as u8);
    Ok(out)
}

/// Produce `stripe_count` ascending boundaries ending at the data length
fn normalize_stripes(file: &StripedFile, stripe_count: usize) -> Result<Vec<u32>> {
    let len = u32::try_from(file.data.len())
        .ok()
        .filter(|&len| i32::try_from(len).is_ok())
        .ok_or(FormatError::ValueOutOfRange {
            field: "file length",
            value: file.data.len() as u64,
        })?;

    let mut ends = Vec::with_capacity(stripe_count);
    let mut previous = 0;
    for stripe in 0..stripe_count {
        let end = file
            .stripes
            .get(stripe)
            .copied()
            .unwrap_or(len)
            .clamp(previous, len);
        ends.push(end);
        previous = end;
    }
    if let Some(last) = ends.last_mut() {
        *last = len;
    }
    Ok(ends)
}
