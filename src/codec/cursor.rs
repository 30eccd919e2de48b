//! Bounds-checked read cursor over a contiguous byte slice.
//!
//! Used for decoding PDU blobs and SIM elementary-file records once they
//! have been lifted out of a frame. Every read returns a decode error on
//! truncation instead of panicking.

use crate::error::{Error, Result};

/// Read cursor over a byte slice.
#[derive(Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Check whether all bytes have been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::decode("truncated field: expected 1 more byte"))?;
        self.pos += 1;
        Ok(b)
    }

    /// Read a 16-bit little-endian integer.
    pub fn read_u16_le(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 16-bit big-endian integer.
    pub fn read_u16_be(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit little-endian integer.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read `n` bytes as a slice view (no copy).
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::decode(format!(
                "truncated field: expected {} bytes, {} available",
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// All unread bytes, consuming the cursor position.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u8_sequence() {
        let mut c = Cursor::new(&[1, 2, 3]);
        assert_eq!(c.read_u8().unwrap(), 1);
        assert_eq!(c.read_u8().unwrap(), 2);
        assert_eq!(c.read_u8().unwrap(), 3);
        assert!(c.is_empty());
        assert!(c.read_u8().is_err());
    }

    #[test]
    fn test_read_multibyte_integers() {
        let mut c = Cursor::new(&[0x34, 0x12, 0x12, 0x34, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(c.read_u16_le().unwrap(), 0x1234);
        assert_eq!(c.read_u16_be().unwrap(), 0x1234);
        assert_eq!(c.read_u32_le().unwrap(), 0x12345678);
    }

    #[test]
    fn test_truncated_read_is_decode_error() {
        let mut c = Cursor::new(&[0xAA]);
        let err = c.read_u32_le().unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        // Position is untouched by a failed read.
        assert_eq!(c.remaining(), 1);
    }

    #[test]
    fn test_read_rest() {
        let mut c = Cursor::new(&[1, 2, 3, 4]);
        c.skip(1).unwrap();
        assert_eq!(c.read_rest(), &[2, 3, 4]);
        assert!(c.is_empty());
    }
}
