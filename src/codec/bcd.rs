//! Swapped-nibble BCD dialing numbers and hex-string transport.
//!
//! Dialing numbers travel as BCD with the nibble order reversed within each
//! byte: digit pair `ab` transmits as byte `0xba`. Nibble `0xF` is filler,
//! used to pad odd-length numbers, and terminates decoding. Nibbles
//! `0xA..=0xE` map to the extended dialing set `* # a b c`.
//!
//! The protocol's string-oriented framing variant carries byte payloads as
//! ASCII hex digit pairs; [`from_hex`]/[`to_hex`] are those primitives, and
//! they reject anything outside `0-9A-Fa-f` with a decode error.

use crate::error::{Error, Result};

/// Dialing-set characters for nibbles `0xA..=0xE`.
const EXTENDED_DIGITS: [char; 5] = ['*', '#', 'a', 'b', 'c'];

/// Filler nibble: pads odd-length numbers and terminates decoding.
const FILLER: u8 = 0xF;

fn digit_to_nibble(c: char) -> Result<u8> {
    match c {
        '0'..='9' => Ok(c as u8 - b'0'),
        '*' => Ok(0xA),
        '#' => Ok(0xB),
        'a' => Ok(0xC),
        'b' => Ok(0xD),
        'c' => Ok(0xE),
        _ => Err(Error::decode(format!("invalid BCD digit {c:?}"))),
    }
}

fn nibble_to_digit(n: u8) -> char {
    debug_assert!(n < FILLER);
    match n {
        0..=9 => (b'0' + n) as char,
        _ => EXTENDED_DIGITS[(n - 0xA) as usize],
    }
}

/// Encode a digit string as swapped-nibble BCD.
///
/// Odd-length input is padded with the `0xF` filler in the final high
/// nibble. Characters outside `0-9 * # a b c` are rejected.
pub fn encode(digits: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(digits.len().div_ceil(2));
    let mut chars = digits.chars();
    while let Some(first) = chars.next() {
        let lo = digit_to_nibble(first)?;
        let hi = match chars.next() {
            Some(second) => digit_to_nibble(second)?,
            None => FILLER,
        };
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Decode swapped-nibble BCD into a digit string.
///
/// Stops at the first `0xF` filler nibble. Exact inverse of [`encode`] for
/// any digit string.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let lo = b & 0xF;
        if lo == FILLER {
            break;
        }
        out.push(nibble_to_digit(lo));
        let hi = b >> 4;
        if hi == FILLER {
            break;
        }
        out.push(nibble_to_digit(hi));
    }
    Ok(out)
}

/// Encode a pair of decimal digits (0..=99) as one swapped-BCD byte.
///
/// Used for the 7-byte service-centre timestamp, where each calendar field
/// is a two-digit pair.
pub fn encode_digit_pair(value: u8) -> u8 {
    let tens = value / 10;
    let units = value % 10;
    (units << 4) | tens
}

/// Decode one swapped-BCD byte into a pair of decimal digits.
pub fn decode_digit_pair(byte: u8) -> Result<u8> {
    let tens = byte & 0xF;
    let units = byte >> 4;
    if tens > 9 || units > 9 {
        return Err(Error::decode(format!("invalid BCD pair byte {byte:#04x}")));
    }
    Ok(tens * 10 + units)
}

/// Decode the subscriber-identity layout: first byte is the encoded length,
/// the second byte carries parity bits in the low nibble and the first
/// digit in the high nibble, remaining digits are swapped BCD.
pub fn decode_imsi(bytes: &[u8]) -> Result<String> {
    if bytes.len() < 2 {
        return Err(Error::decode("identity record shorter than 2 bytes"));
    }
    let len = bytes[0] as usize;
    if len < 1 || len > bytes.len() - 1 {
        return Err(Error::decode(format!("identity length {len} out of range")));
    }
    let first = bytes[1] >> 4;
    if first > 9 {
        return Err(Error::decode("identity first digit out of range"));
    }
    let mut out = String::with_capacity(15);
    out.push((b'0' + first) as char);
    out.push_str(&decode(&bytes[2..=len])?);
    Ok(out)
}

/// Value of one ASCII hex digit. Rejects anything outside `0-9A-Fa-f`.
pub fn hex_digit_value(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(Error::decode(format!(
            "invalid hex digit {:?}",
            c as char
        ))),
    }
}

/// Decode an ASCII hex string (two digits per byte) into raw bytes.
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    let raw = s.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(Error::decode("odd-length hex string"));
    }
    let mut out = Vec::with_capacity(raw.len() / 2);
    for pair in raw.chunks_exact(2) {
        out.push((hex_digit_value(pair[0])? << 4) | hex_digit_value(pair[1])?);
    }
    Ok(out)
}

/// Encode raw bytes as an uppercase ASCII hex string.
pub fn to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0xF) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_even_length() {
        assert_eq!(encode("1234").unwrap(), vec![0x21, 0x43]);
    }

    #[test]
    fn test_encode_odd_length_pads_filler() {
        assert_eq!(encode("123").unwrap(), vec![0x21, 0xF3]);
    }

    #[test]
    fn test_decode_stops_at_filler() {
        assert_eq!(decode(&[0x21, 0xF3]).unwrap(), "123");
        assert_eq!(decode(&[0x21, 0x43, 0xFF]).unwrap(), "1234");
    }

    #[test]
    fn test_extended_dialing_set() {
        let wire = encode("*#ab").unwrap();
        assert_eq!(wire, vec![0xBA, 0xDC]);
        assert_eq!(decode(&wire).unwrap(), "*#ab");
    }

    #[test]
    fn test_encode_rejects_non_digit() {
        assert!(encode("12x4").is_err());
    }

    #[test]
    fn test_roundtrip_all_lengths_and_parities() {
        let digits = "0123456789*#abc";
        for n in 0..=digits.len() {
            let s = &digits[..n];
            assert_eq!(decode(&encode(s).unwrap()).unwrap(), s, "length {n}");
        }
    }

    #[test]
    fn test_digit_pair() {
        assert_eq!(encode_digit_pair(26), 0x62);
        assert_eq!(decode_digit_pair(0x62).unwrap(), 26);
        assert!(decode_digit_pair(0xAB).is_err());
    }

    #[test]
    fn test_decode_imsi() {
        // len=8, parity nibble 9 + first digit 3, then swapped BCD.
        let bytes = [0x08, 0x39, 0x10, 0x32, 0x54, 0x76, 0x98, 0x10, 0x32];
        assert_eq!(decode_imsi(&bytes).unwrap(), "301234567890123");
    }

    #[test]
    fn test_decode_imsi_rejects_bad_length() {
        assert!(decode_imsi(&[0x20, 0x39]).is_err());
        assert!(decode_imsi(&[0x08]).is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let bytes = vec![0x00, 0x7F, 0xAB, 0xFF];
        assert_eq!(from_hex(&to_hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_hex_accepts_lowercase() {
        assert_eq!(from_hex("ab0f").unwrap(), vec![0xAB, 0x0F]);
    }

    #[test]
    fn test_hex_rejects_non_hex() {
        assert!(from_hex("0G").is_err());
        assert!(from_hex("0 ").is_err());
        assert!(from_hex("ABC").is_err()); // odd length
        assert!(hex_digit_value(b'z').is_err());
    }
}
