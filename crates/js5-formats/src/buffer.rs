//! Bounds-checked byte cursor
//!
//! Every codec reads through [`ByteReader`], which keeps an explicit position
//! and fails with [`FormatError::Underflow`] instead of panicking when the
//! input is short. Writing goes straight into a `Vec<u8>` through
//! [`bytes::BufMut`], with [`put_u24`] and [`put_smart`] covering the two
//! widths `BufMut` does not name.

use bytes::{Buf, BufMut};

use crate::error::{FormatError, Result};

/// Largest value a smart integer can hold.
pub const SMART_MAX: u32 = 0x7FFF_FFFF;

/// Largest value the short form of a smart integer can hold.
pub const SMART_SHORT_MAX: u32 = 0x7FFF;

/// Cursor over a borrowed byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current read position
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Move the read position, which may be anywhere up to the end of the data
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(FormatError::Underflow {
                offset: self.position,
                needed: position - self.position,
                remaining: self.remaining(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Bytes left to read
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Total length of the underlying data
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the underlying data is empty
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(FormatError::Underflow {
                offset: self.position,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn take<T>(&mut self, width: usize, read: impl FnOnce(&mut &[u8]) -> T) -> Result<T> {
        self.ensure(width)?;
        let mut window = &self.data[self.position..self.position + width];
        let value = read(&mut window);
        self.position += width;
        Ok(value)
    }

    /// Read an unsigned byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.take(1, |buf| buf.get_u8())
    }

    /// Read a big-endian unsigned 16-bit integer
    pub fn read_u16(&mut self) -> Result<u16> {
        self.take(2, |buf| buf.get_u16())
    }

    /// Read a big-endian unsigned 24-bit integer
    pub fn read_u24(&mut self) -> Result<u32> {
        self.take(3, |buf| buf.get_uint(3) as u32)
    }

    /// Read a big-endian unsigned 32-bit integer
    pub fn read_u32(&mut self) -> Result<u32> {
        self.take(4, |buf| buf.get_u32())
    }

    /// Read a big-endian signed 32-bit integer
    pub fn read_i32(&mut self) -> Result<i32> {
        self.take(4, |buf| buf.get_i32())
    }

    /// Read a smart integer: two bytes when the top bit of the first byte is
    /// clear, otherwise four bytes with the top bit masked off
    pub fn read_smart(&mut self) -> Result<u32> {
        self.ensure(1)?;
        if self.data[self.position] & 0x80 == 0 {
            self.read_u16().map(u32::from)
        } else {
            self.read_u32().map(|value| value & SMART_MAX)
        }
    }

    /// Borrow the next `len` bytes and advance past them
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }
}

/// Write a big-endian unsigned 24-bit integer
pub fn put_u24(buf: &mut impl BufMut, value: u32) -> Result<()> {
    if value > 0x00FF_FFFF {
        return Err(FormatError::ValueOutOfRange {
            field: "u24",
            value: u64::from(value),
        });
    }
    buf.put_uint(u64::from(value), 3);
    Ok(())
}

/// Write a smart integer, using the short form when the value allows it
pub fn put_smart(buf: &mut impl BufMut, value: u32) -> Result<()> {
    if value > SMART_MAX {
        return Err(FormatError::ValueOutOfRange {
            field: "smart",
            value: u64::from(value),
        });
    }
    if value <= SMART_SHORT_MAX {
        buf.put_u16(value as u16);
    } else {
        buf.put_u32(value | 0x8000_0000);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut reader = ByteReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0203);
        assert_eq!(reader.read_u24().unwrap(), 0x04_0506);
        assert_eq!(reader.read_i32().unwrap(), -2);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_underflow_does_not_advance() {
        let data = [0x00, 0x01, 0x02];
        let mut reader = ByteReader::new(&data);
        reader.read_u8().unwrap();

        let err = reader.read_u32().unwrap_err();
        assert!(matches!(
            err,
            FormatError::Underflow {
                offset: 1,
                needed: 4,
                remaining: 2
            }
        ));
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn test_smart_round_trip() {
        for value in [0, 1, 0x7FFF, 0x8000, 0x1234_5678, SMART_MAX] {
            let mut buf = Vec::new();
            put_smart(&mut buf, value).unwrap();
            assert_eq!(buf.len(), if value <= SMART_SHORT_MAX { 2 } else { 4 });

            let mut reader = ByteReader::new(&buf);
            assert_eq!(reader.read_smart().unwrap(), value);
        }
    }

    #[test]
    fn test_smart_rejects_large_values() {
        let mut buf = Vec::new();
        assert!(put_smart(&mut buf, 0x8000_0000).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_u24_bounds() {
        let mut buf = Vec::new();
        put_u24(&mut buf, 0x00AB_CDEF).unwrap();
        assert_eq!(buf, [0xAB, 0xCD, 0xEF]);
        assert!(put_u24(&mut buf, 0x0100_0000).is_err());
    }

    #[test]
    fn test_read_bytes_and_seek() {
        let data = b"headerpayload";
        let mut reader = ByteReader::new(data);
        assert_eq!(reader.read_bytes(6).unwrap(), b"header");
        assert_eq!(reader.read_array::<3>().unwrap(), *b"pay");

        reader.seek(0).unwrap();
        assert_eq!(reader.read_u8().unwrap(), b'h');
        assert!(reader.seek(data.len() + 1).is_err());
        reader.seek(data.len()).unwrap();
        assert_eq!(reader.remaining(), 0);
    }
}
