//! Incoming circular frame buffer.
//!
//! Bytes from the channel accumulate in a power-of-two ring; complete
//! length-prefixed frames are handed out as in-place readers. The single
//! read cursor enforces strict FIFO processing, and a [`FrameReader`] that
//! is dropped without consuming its exact frame length force-advances the
//! cursor to the frame boundary - one misbehaving handler must not
//! desynchronize every subsequent frame on the stream.
//!
//! # Example
//!
//! ```
//! use modemwire::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//! buffer.feed(&[0, 0, 0, 4, 0xDE, 0xAD, 0xBE, 0xEF]);
//!
//! let mut frame = buffer.try_extract_frame().unwrap().unwrap();
//! assert_eq!(frame.remaining(), 4);
//! assert_eq!(frame.read_u32().unwrap(), u32::from_le_bytes([0xDE, 0xAD, 0xBE, 0xEF]));
//! ```

use bytes::Bytes;

use super::codes::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use super::frame_writer::FrameWriter;
use crate::error::{Error, Result};

/// Initial ring capacity. Grows by doubling, never drops data.
const INITIAL_CAPACITY: usize = 4096;

/// Growable circular buffer that accumulates inbound bytes and detects
/// complete length-prefixed frames.
pub struct FrameBuffer {
    /// Ring storage; length is always a power of two.
    buf: Vec<u8>,
    /// Monotonic read cursor (masked on access).
    read: usize,
    /// Monotonic write cursor (masked on access).
    write: usize,
    /// Length of a frame whose prefix has been parsed but whose payload
    /// has not fully arrived yet.
    pending_len: Option<usize>,
}

impl FrameBuffer {
    /// Create a frame buffer with the default initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create a frame buffer with at least `capacity` bytes of ring space.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.next_power_of_two()],
            read: 0,
            write: 0,
            pending_len: None,
        }
    }

    /// Number of buffered, unconsumed bytes.
    #[inline]
    pub fn available(&self) -> usize {
        self.write - self.read
    }

    /// Check whether the buffer holds no unconsumed bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Append bytes from the channel, growing the ring (doubling to the
    /// next power of two) if they would overflow. Never drops data.
    pub fn feed(&mut self, data: &[u8]) {
        self.reserve(self.available() + data.len());
        let cap = self.buf.len();
        let wpos = self.write & (cap - 1);
        let first = data.len().min(cap - wpos);
        self.buf[wpos..wpos + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        self.write += data.len();
    }

    /// Discard all buffered bytes and any half-parsed frame header.
    pub fn clear(&mut self) {
        self.read = self.write;
        self.pending_len = None;
    }

    /// Try to extract the next complete frame.
    ///
    /// Returns `Ok(None)` while more bytes are needed. A zero or oversized
    /// length prefix is a protocol violation: the stream cannot be
    /// resynchronized past it, so the caller should clear the buffer.
    ///
    /// The returned reader borrows the buffer, so at most one frame is
    /// current at a time; dropping it advances the cursor to the frame
    /// boundary regardless of how much the handler consumed.
    pub fn try_extract_frame(&mut self) -> Result<Option<FrameReader<'_>>> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if self.available() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                self.copy_out(self.read, &mut prefix);
                self.read += LENGTH_PREFIX_SIZE;
                let len = u32::from_be_bytes(prefix) as usize;
                if len == 0 || len > MAX_FRAME_SIZE {
                    return Err(Error::protocol(format!("invalid frame length {len}")));
                }
                self.pending_len = Some(len);
                len
            }
        };
        if self.available() < len {
            return Ok(None);
        }
        self.pending_len = None;
        let start = self.read;
        Ok(Some(FrameReader {
            start,
            len,
            pos: 0,
            buffer: self,
        }))
    }

    /// Grow the ring so it can hold `needed` bytes.
    fn reserve(&mut self, needed: usize) {
        let cap = self.buf.len();
        if needed <= cap {
            return;
        }
        let new_cap = needed.next_power_of_two().max(cap * 2);
        let mut new_buf = vec![0u8; new_cap];
        let avail = self.available();
        let (a, b) = self.segments(self.read, avail);
        new_buf[..a.len()].copy_from_slice(a);
        new_buf[a.len()..avail].copy_from_slice(b);
        self.buf = new_buf;
        self.read = 0;
        self.write = avail;
    }

    /// Up to two contiguous slices covering `n` bytes starting at the
    /// monotonic offset `abs` (second slice is the wrapped tail).
    fn segments(&self, abs: usize, n: usize) -> (&[u8], &[u8]) {
        let cap = self.buf.len();
        let p = abs & (cap - 1);
        let first = n.min(cap - p);
        (&self.buf[p..p + first], &self.buf[..n - first])
    }

    fn copy_out(&self, abs: usize, out: &mut [u8]) {
        let (a, b) = self.segments(abs, out.len());
        out[..a.len()].copy_from_slice(a);
        out[a.len()..].copy_from_slice(b);
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// In-place reader over the current frame.
///
/// Reads never cross the frame boundary: running out of frame is a decode
/// error, and [`seek`](FrameReader::seek) outside the frame is a protocol
/// violation. Dropping the reader realigns the buffer's read cursor to the
/// end of the frame, logging if the handler under- or over-consumed.
pub struct FrameReader<'a> {
    buffer: &'a mut FrameBuffer,
    /// Monotonic offset of the frame's first payload byte.
    start: usize,
    /// Frame payload length.
    len: usize,
    /// Read position relative to `start`.
    pos: usize,
}

impl FrameReader<'_> {
    /// Frame payload length.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.len
    }

    /// Unread bytes left in the frame.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// Fill `out` from the frame, handling ring wraparound.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        if self.remaining() < out.len() {
            return Err(Error::decode(format!(
                "frame truncated: wanted {} bytes, {} left",
                out.len(),
                self.remaining()
            )));
        }
        self.buffer.copy_out(self.start + self.pos, out);
        self.pos += out.len();
        Ok(())
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    /// Read a 16-bit little-endian integer.
    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    /// Read a 32-bit little-endian integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    /// Read a 32-bit little-endian unsigned integer.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    /// Read `n` raw bytes into an owned buffer.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        let mut out = vec![0u8; n];
        self.read_exact(&mut out)?;
        Ok(Bytes::from(out))
    }

    /// Read a length-prefixed UTF-16LE string; the `-1` marker is `None`.
    pub fn read_string16(&mut self) -> Result<Option<String>> {
        let n = self.read_i32()?;
        if n == -1 {
            return Ok(None);
        }
        if n < 0 {
            return Err(Error::decode(format!("invalid string length {n}")));
        }
        let n = n as usize;
        if n * 2 > self.remaining() {
            return Err(Error::decode(format!(
                "string length {n} exceeds frame remainder"
            )));
        }
        let mut units = Vec::with_capacity(n);
        for _ in 0..n {
            units.push(self.read_u16()?);
        }
        if self.read_u16()? != 0 {
            return Err(Error::decode("missing string terminator"));
        }
        // Character data is padded to a 4-byte boundary.
        if n % 2 == 0 {
            self.read_u16()?;
        }
        String::from_utf16(&units).map(Some).map_err(|_| Error::decode("invalid UTF-16 string"))
    }

    /// Read a non-null string; the null marker is a decode error.
    pub fn read_str(&mut self) -> Result<String> {
        self.read_string16()?
            .ok_or_else(|| Error::decode("unexpected null string"))
    }

    /// Read a length-prefixed byte blob padded to a 4-byte boundary.
    pub fn read_byte_array(&mut self) -> Result<Bytes> {
        let n = self.read_i32()?;
        if n < 0 {
            return Err(Error::decode(format!("invalid byte array length {n}")));
        }
        let bytes = self.read_bytes(n as usize)?;
        let pad = (4 - (n as usize) % 4) % 4;
        if pad > 0 {
            self.read_bytes(pad)?;
        }
        Ok(bytes)
    }

    /// Reposition the read cursor relative to its current position, within
    /// the bounds of the current frame only. Out of bounds is a protocol
    /// violation, not a clamp.
    pub fn seek(&mut self, offset: i64) -> Result<()> {
        let target = self.pos as i64 + offset;
        if target < 0 || target > self.len as i64 {
            return Err(Error::protocol(format!(
                "seek to {target} outside frame of {} bytes",
                self.len
            )));
        }
        self.pos = target as usize;
        Ok(())
    }

    /// Consume the rest of the frame without interpretation. Used when a
    /// message type is recognized but its tail is not needed, or when an
    /// unknown code is tolerated and discarded.
    pub fn discard_remaining(&mut self) {
        self.pos = self.len;
    }

    /// Copy `n` bytes verbatim from the current frame position into an
    /// outbound frame, without semantic reinterpretation.
    pub fn copy_raw(&mut self, n: usize, out: &mut FrameWriter) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::decode(format!(
                "raw copy of {n} bytes exceeds frame remainder {}",
                self.remaining()
            )));
        }
        let (a, b) = self.buffer.segments(self.start + self.pos, n);
        out.write_raw(a);
        out.write_raw(b);
        self.pos += n;
        Ok(())
    }
}

impl Drop for FrameReader<'_> {
    fn drop(&mut self) {
        if self.pos != self.len {
            tracing::warn!(
                consumed = self.pos,
                frame_len = self.len,
                "handler misconsumed frame; force-advancing to frame boundary"
            );
        }
        self.buffer.read = self.start + self.len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestCode;

    /// Helper: length-prefixed frame around `payload`.
    fn make_frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn drain_payloads(buffer: &mut FrameBuffer) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(mut frame) = buffer.try_extract_frame().unwrap() {
            let bytes = frame.read_bytes(frame.remaining()).unwrap();
            out.push(bytes.to_vec());
        }
        out
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(&make_frame(b"hello"));

        let frames = drain_payloads(&mut buffer);
        assert_eq!(frames, vec![b"hello".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_incomplete_frame_waits() {
        let mut buffer = FrameBuffer::new();
        let frame = make_frame(b"abcdef");

        buffer.feed(&frame[..3]);
        assert!(buffer.try_extract_frame().unwrap().is_none());

        buffer.feed(&frame[3..7]);
        assert!(buffer.try_extract_frame().unwrap().is_none());

        buffer.feed(&frame[7..]);
        let frames = drain_payloads(&mut buffer);
        assert_eq!(frames, vec![b"abcdef".to_vec()]);
    }

    #[test]
    fn test_chunking_determinism() {
        // The same multi-frame stream must yield identical frames whether
        // fed all at once, byte by byte, or in odd-sized chunks.
        let mut stream = Vec::new();
        for i in 0u8..7 {
            stream.extend(make_frame(&vec![i; (i as usize + 1) * 3]));
        }

        let mut all_at_once = FrameBuffer::new();
        all_at_once.feed(&stream);
        let expected = drain_payloads(&mut all_at_once);
        assert_eq!(expected.len(), 7);

        let mut byte_at_a_time = FrameBuffer::new();
        let mut collected = Vec::new();
        for &b in &stream {
            byte_at_a_time.feed(&[b]);
            collected.extend(drain_payloads(&mut byte_at_a_time));
        }
        assert_eq!(collected, expected);

        let mut chunked = FrameBuffer::new();
        let mut collected = Vec::new();
        for chunk in stream.chunks(5) {
            chunked.feed(chunk);
            collected.extend(drain_payloads(&mut chunked));
        }
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_wraparound() {
        // Small ring forces frames to straddle the wrap point repeatedly.
        let mut buffer = FrameBuffer::with_capacity(32);
        for round in 0u8..20 {
            let payload = vec![round; 11];
            buffer.feed(&make_frame(&payload));
            let frames = drain_payloads(&mut buffer);
            assert_eq!(frames, vec![payload]);
        }
    }

    #[test]
    fn test_growth_preserves_data() {
        let mut buffer = FrameBuffer::with_capacity(16);
        let big = vec![0x5A; 1000];
        buffer.feed(&make_frame(&big));
        let frames = drain_payloads(&mut buffer);
        assert_eq!(frames, vec![big]);
    }

    #[test]
    fn test_invalid_length_prefix_rejected() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(&[0, 0, 0, 0, 1, 2, 3]);
        assert!(buffer.try_extract_frame().is_err());

        let mut buffer = FrameBuffer::new();
        buffer.feed(&u32::MAX.to_be_bytes());
        assert!(buffer.try_extract_frame().is_err());
    }

    #[test]
    fn test_underconsume_realigns_to_boundary() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(&make_frame(&[1, 2, 3, 4, 5, 6, 7, 8]));
        buffer.feed(&make_frame(b"next"));

        {
            let mut frame = buffer.try_extract_frame().unwrap().unwrap();
            // Under-read: consume only 2 of 8 bytes, then drop.
            frame.read_u16().unwrap();
        }

        // The next frame is unaffected.
        let frames = drain_payloads(&mut buffer);
        assert_eq!(frames, vec![b"next".to_vec()]);
    }

    #[test]
    fn test_read_past_frame_end_is_decode_error() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(&make_frame(&[1, 2]));
        let mut frame = buffer.try_extract_frame().unwrap().unwrap();
        assert!(matches!(frame.read_i32(), Err(Error::Decode(_))));
        // Failed reads do not move the cursor.
        assert_eq!(frame.remaining(), 2);
    }

    #[test]
    fn test_seek_bounds() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(&make_frame(&[0; 12]));
        let mut frame = buffer.try_extract_frame().unwrap().unwrap();

        frame.seek(8).unwrap();
        frame.seek(-4).unwrap();
        assert_eq!(frame.remaining(), 8);

        assert!(matches!(frame.seek(9), Err(Error::Protocol(_))));
        assert!(matches!(frame.seek(-5), Err(Error::Protocol(_))));
        frame.discard_remaining();
    }

    #[test]
    fn test_string16_roundtrip_through_ring() {
        for text in ["", "a", "ab", "héllo wörld", "電話"] {
            let mut w = FrameWriter::unsolicited(0);
            w.write_str(text);
            w.write_i32(0x7777);
            let frame = w.finish();

            let mut buffer = FrameBuffer::new();
            buffer.feed(&frame);
            let mut reader = buffer.try_extract_frame().unwrap().unwrap();
            assert_eq!(reader.read_i32().unwrap(), 1);
            assert_eq!(reader.read_u32().unwrap(), 0);
            assert_eq!(reader.read_str().unwrap(), text);
            // Padding must leave the next field aligned.
            assert_eq!(reader.read_i32().unwrap(), 0x7777);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn test_null_string_roundtrip() {
        let mut w = FrameWriter::unsolicited(0);
        w.write_string16(None);
        let frame = w.finish();

        let mut buffer = FrameBuffer::new();
        buffer.feed(&frame);
        let mut reader = buffer.try_extract_frame().unwrap().unwrap();
        reader.seek(8).unwrap();
        assert_eq!(reader.read_string16().unwrap(), None);
    }

    #[test]
    fn test_byte_array_roundtrip_through_ring() {
        let blob = [0xDEu8, 0xAD, 0xBE, 0xEF, 0x99];
        let mut w = FrameWriter::unsolicited(0);
        w.write_byte_array(&blob);
        w.write_i32(42);
        let frame = w.finish();

        let mut buffer = FrameBuffer::new();
        buffer.feed(&frame);
        let mut reader = buffer.try_extract_frame().unwrap().unwrap();
        reader.seek(8).unwrap();
        assert_eq!(&reader.read_byte_array().unwrap()[..], &blob);
        assert_eq!(reader.read_i32().unwrap(), 42);
    }

    #[test]
    fn test_copy_raw_echoes_verbatim() {
        // Wrap a fragment of an inbound frame into a new outbound envelope.
        let mut buffer = FrameBuffer::with_capacity(16);
        // Force a wrap first so the copied fragment straddles the ring edge.
        buffer.feed(&make_frame(&[0; 9]));
        drain_payloads(&mut buffer);

        buffer.feed(&make_frame(&[9, 8, 7, 6, 5, 4]));
        let mut reader = buffer.try_extract_frame().unwrap().unwrap();
        reader.seek(1).unwrap();

        let mut out = FrameWriter::request(RequestCode::SmsAcknowledge, 1);
        let before = out.payload_len();
        reader.copy_raw(4, &mut out).unwrap();
        reader.discard_remaining();
        drop(reader);
        assert_eq!(out.payload_len(), before + 4);

        let echoed = out.finish();
        assert_eq!(&echoed[echoed.len() - 4..], &[8, 7, 6, 5]);
    }
}
