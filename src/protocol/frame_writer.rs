//! Outbound frame builder.
//!
//! A frame's length prefix is known only after the payload is fully
//! written, so the builder reserves the 4-byte slot up front and
//! [`finish`](FrameWriter::finish) stamps the big-endian length
//! retroactively before handing the frame to the channel.
//!
//! Inside the frame, integers are 32-bit little-endian, strings are
//! length-prefixed UTF-16LE with a null terminator padded to a 4-byte
//! boundary, and byte blobs are an `i32` length plus padded bytes.

use bytes::Bytes;

use super::codes::{RequestCode, LENGTH_PREFIX_SIZE, RESPONSE_SOLICITED, RESPONSE_UNSOLICITED};

/// Builder for one outbound frame.
#[derive(Debug)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    fn with_prefix_slot() -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0u8; LENGTH_PREFIX_SIZE]);
        Self { buf }
    }

    /// Begin an outbound request frame: `[request_code][token]`.
    pub fn request(code: RequestCode, token: u32) -> Self {
        let mut w = Self::with_prefix_slot();
        w.write_u32(code.as_u32());
        w.write_u32(token);
        w
    }

    /// Begin a solicited response frame: `[kind=0][token][error_code]`.
    ///
    /// The host never sends these; the constructor exists for channel
    /// simulators and tests.
    pub fn solicited(token: u32, error_code: u32) -> Self {
        let mut w = Self::with_prefix_slot();
        w.write_i32(RESPONSE_SOLICITED);
        w.write_u32(token);
        w.write_u32(error_code);
        w
    }

    /// Begin an unsolicited event frame: `[kind=1][event_code]`.
    ///
    /// Host-side counterpart of [`FrameWriter::solicited`]: simulator/test
    /// use only.
    pub fn unsolicited(event_code: u32) -> Self {
        let mut w = Self::with_prefix_slot();
        w.write_i32(RESPONSE_UNSOLICITED);
        w.write_u32(event_code);
        w
    }

    /// Write a 32-bit little-endian integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a 32-bit little-endian unsigned integer.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-prefixed UTF-16LE string. `None` writes the null
    /// marker (`-1`) with no character data.
    pub fn write_string16(&mut self, s: Option<&str>) {
        let Some(s) = s else {
            self.write_i32(-1);
            return;
        };
        let units: Vec<u16> = s.encode_utf16().collect();
        self.write_i32(units.len() as i32);
        for unit in &units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
        // Null terminator, then pad the character data to a 4-byte boundary.
        self.buf.extend_from_slice(&0u16.to_le_bytes());
        if units.len() % 2 == 0 {
            self.buf.extend_from_slice(&0u16.to_le_bytes());
        }
    }

    /// Write a non-null UTF-16LE string.
    pub fn write_str(&mut self, s: &str) {
        self.write_string16(Some(s));
    }

    /// Write a length-prefixed byte blob padded to a 4-byte boundary.
    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
        let pad = (4 - bytes.len() % 4) % 4;
        self.buf.extend_from_slice(&[0u8; 3][..pad]);
    }

    /// Append raw bytes verbatim (used when echoing opaque fragments of an
    /// inbound frame into an outbound one).
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Payload bytes written so far (length prefix excluded).
    pub fn payload_len(&self) -> usize {
        self.buf.len() - LENGTH_PREFIX_SIZE
    }

    /// Stamp the length prefix and hand the finished frame to the channel.
    pub fn finish(mut self) -> Bytes {
        let len = (self.buf.len() - LENGTH_PREFIX_SIZE) as u32;
        self.buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
        Bytes::from(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_is_big_endian_and_exclusive() {
        let mut w = FrameWriter::request(RequestCode::RadioPower, 7);
        w.write_i32(1);
        w.write_i32(1);
        let frame = w.finish();
        // 4 words of payload = 16 bytes.
        assert_eq!(&frame[..4], &[0, 0, 0, 16]);
        assert_eq!(frame.len(), 20);
    }

    #[test]
    fn test_integers_are_little_endian() {
        let mut w = FrameWriter::unsolicited(1000);
        w.write_i32(0x0102_0304);
        let frame = w.finish();
        let payload = &frame[4..];
        // kind = 1, event code = 1000, then the value.
        assert_eq!(&payload[0..4], &[1, 0, 0, 0]);
        assert_eq!(&payload[4..8], &1000u32.to_le_bytes());
        assert_eq!(&payload[8..12], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_string16_padding() {
        // Odd char count: 4 (len) + 2n + 2 (terminator) is already aligned.
        let mut w = FrameWriter::unsolicited(0);
        w.write_str("abc");
        let odd_len = w.payload_len();
        assert_eq!(odd_len % 4, 0);

        // Even char count needs 2 pad bytes.
        let mut w = FrameWriter::unsolicited(0);
        w.write_str("abcd");
        assert_eq!(w.payload_len() % 4, 0);
    }

    #[test]
    fn test_null_string_marker() {
        let mut w = FrameWriter::unsolicited(0);
        w.write_string16(None);
        let frame = w.finish();
        assert_eq!(&frame[frame.len() - 4..], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_byte_array_padding() {
        let mut w = FrameWriter::unsolicited(0);
        w.write_byte_array(&[0xAA; 5]);
        // 4 (len) + 5 + 3 pad.
        assert_eq!(w.payload_len() % 4, 0);
    }
}
