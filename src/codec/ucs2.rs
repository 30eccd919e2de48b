//! Fixed-width UTF-16BE ("UCS2") text, used by SMS user data and SIM
//! alpha identifiers when the content leaves the 7-bit alphabet.

use crate::error::{Error, Result};

/// Encode text as big-endian 16-bit code units.
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Decode big-endian 16-bit code units into text.
///
/// Odd-length input and unpaired surrogates are decode errors.
pub fn decode(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::decode("odd-length UCS2 data"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| Error::decode("unpaired UTF-16 surrogate"))
}
