//! GSM 7-bit default alphabet: packed septets and unpacked bytes.
//!
//! The default alphabet maps septet values `0x00..=0x7F` to characters;
//! septet `0x1B` escapes into the extension table for a handful of extra
//! characters (`^ { } \ [ ] ~ | €`). Packed form stuffs septets LSB-first
//! into bytes; unpacked form (used by some SIM text records) stores one
//! septet per byte with `0xFF` padding.

use crate::error::{Error, Result};

/// Escape septet switching the next septet to the extension table.
const ESCAPE: u8 = 0x1B;

/// GSM 7-bit default alphabet, indexed by septet value.
#[rustfmt::skip]
const ALPHABET: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

/// Extension table, reached through the escape septet.
const EXTENSION: [(u8, char); 9] = [
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

fn encode_char(c: char) -> Option<(u8, bool)> {
    if c == '\u{1B}' {
        // The escape position itself is not an encodable character.
        return None;
    }
    if let Some(pos) = ALPHABET.iter().position(|&a| a == c) {
        return Some((pos as u8, false));
    }
    EXTENSION
        .iter()
        .find(|&&(_, e)| e == c)
        .map(|&(sept, _)| (sept, true))
}

fn decode_extension(sept: u8) -> Option<char> {
    EXTENSION
        .iter()
        .find(|&&(s, _)| s == sept)
        .map(|&(_, c)| c)
}

/// Check whether `text` is expressible in the default alphabet.
pub fn is_encodable(text: &str) -> bool {
    text.chars().all(|c| encode_char(c).is_some())
}

/// Number of septets `text` occupies (extension characters take two).
pub fn septet_len(text: &str) -> usize {
    text.chars()
        .map(|c| match encode_char(c) {
            Some((_, true)) => 2,
            _ => 1,
        })
        .sum()
}

/// Convert text to a septet sequence, inserting escape septets for
/// extension characters. Characters outside both tables are rejected.
fn to_septets(text: &str) -> Result<Vec<u8>> {
    let mut septets = Vec::with_capacity(text.len());
    for c in text.chars() {
        match encode_char(c) {
            Some((sept, false)) => septets.push(sept),
            Some((sept, true)) => {
                septets.push(ESCAPE);
                septets.push(sept);
            }
            None => {
                return Err(Error::decode(format!(
                    "character {c:?} not in the 7-bit alphabet"
                )))
            }
        }
    }
    Ok(septets)
}

/// Pack `text` into GSM 7-bit septets, LSB-first.
///
/// Returns the packed bytes and the septet count (the user-data length a
/// PDU carries alongside them).
pub fn pack(text: &str) -> Result<(Vec<u8>, usize)> {
    pack_with_skip(text, 0)
}

/// Pack with `skip_bits` of leading zero fill, used when a user-data
/// header precedes the text and the first septet must start on the next
/// septet boundary after it.
pub fn pack_with_skip(text: &str, skip_bits: u32) -> Result<(Vec<u8>, usize)> {
    let septets = to_septets(text)?;
    let mut out = Vec::with_capacity(septets.len() * 7 / 8 + 2);
    let mut acc: u16 = 0;
    let mut bits = skip_bits;
    for &sept in &septets {
        acc |= u16::from(sept & 0x7F) << bits;
        bits += 7;
        while bits >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push(acc as u8);
    }
    Ok((out, septets.len()))
}

/// Unpack `septet_count` septets from packed bytes into text.
pub fn unpack(bytes: &[u8], septet_count: usize) -> Result<String> {
    unpack_with_skip(bytes, septet_count, 0)
}

/// Unpack with an initial bit offset, used when a user-data header occupies
/// the leading bits and the text restarts on the next septet boundary.
pub fn unpack_with_skip(bytes: &[u8], septet_count: usize, skip_bits: u32) -> Result<String> {
    if bytes.len() * 8 < septet_count * 7 + skip_bits as usize {
        return Err(Error::decode(format!(
            "packed data too short for {septet_count} septets"
        )));
    }
    let mut septets = Vec::with_capacity(septet_count);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    let mut skip = skip_bits;
    for &b in bytes {
        acc |= u32::from(b) << bits;
        bits += 8;
        if skip > 0 {
            let taken = skip.min(bits);
            acc >>= taken;
            bits -= taken;
            skip -= taken;
        }
        while bits >= 7 && septets.len() < septet_count {
            septets.push((acc & 0x7F) as u8);
            acc >>= 7;
            bits -= 7;
        }
        if septets.len() == septet_count {
            break;
        }
    }
    septets_to_text(&septets)
}

fn septets_to_text(septets: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(septets.len());
    let mut iter = septets.iter();
    while let Some(&sept) = iter.next() {
        if sept == ESCAPE {
            match iter.next() {
                Some(&ext) => match decode_extension(ext) {
                    Some(c) => out.push(c),
                    // Reserved escape combination decodes as a space.
                    None => out.push(' '),
                },
                None => {
                    return Err(Error::decode("dangling escape septet"));
                }
            }
        } else {
            out.push(ALPHABET[sept as usize]);
        }
    }
    Ok(out)
}

/// Decode unpacked (one septet per byte) alphabet text, as stored in SIM
/// display-name records. Trailing `0xFF` padding is trimmed.
pub fn decode_unpacked(bytes: &[u8]) -> Result<String> {
    let trimmed = match bytes.iter().position(|&b| b == 0xFF) {
        Some(end) => &bytes[..end],
        None => bytes,
    };
    for &b in trimmed {
        if b > 0x7F {
            return Err(Error::decode(format!(
                "byte {b:#04x} outside the 7-bit alphabet"
            )));
        }
    }
    septets_to_text(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_reference_vector() {
        // "hello" packs to E8 32 9B FD 06 (classic reference vector).
        let (packed, count) = pack("hello").unwrap();
        assert_eq!(count, 5);
        assert_eq!(packed, vec![0xE8, 0x32, 0x9B, 0xFD, 0x06]);
    }

    #[test]
    fn test_roundtrip_basic_alphabet() {
        let text = "The quick brown fox: @£$¥ (0-9) ?!";
        let (packed, count) = pack(text).unwrap();
        assert_eq!(unpack(&packed, count).unwrap(), text);
    }

    #[test]
    fn test_roundtrip_extension_characters() {
        let text = "tables[0] = {x | x ~ y} ^ 10€";
        let (packed, count) = pack(text).unwrap();
        assert_eq!(count, septet_len(text));
        assert_eq!(unpack(&packed, count).unwrap(), text);
    }

    #[test]
    fn test_roundtrip_max_segment() {
        let text: String = std::iter::repeat('a').take(160).collect();
        let (packed, count) = pack(&text).unwrap();
        assert_eq!(count, 160);
        assert_eq!(packed.len(), 140);
        assert_eq!(unpack(&packed, count).unwrap(), text);
    }

    #[test]
    fn test_roundtrip_every_length() {
        let base = "Pack me tightly 123";
        for n in 0..base.len() {
            let s = &base[..n];
            let (packed, count) = pack(s).unwrap();
            assert_eq!(unpack(&packed, count).unwrap(), s, "length {n}");
        }
    }

    #[test]
    fn test_unencodable_character_rejected() {
        assert!(pack("snowman \u{2603}").is_err());
        assert!(!is_encodable("\u{2603}"));
    }

    #[test]
    fn test_unpack_truncated_rejected() {
        let (packed, count) = pack("hello world").unwrap();
        assert!(unpack(&packed[..2], count).is_err());
    }

    #[test]
    fn test_unpack_with_skip() {
        // Simulate a 6-byte header: text starts at the next septet
        // boundary, i.e. after 48 + 1 = 49 bits.
        let (packed, count) = pack("hi").unwrap();
        let mut padded = vec![0u8; 6];
        // Shift packed data left by 1 bit into the padded stream.
        let mut acc: u32 = 0;
        let mut bits = 1u32;
        for &b in &packed {
            acc |= u32::from(b) << bits;
            padded.push(acc as u8);
            acc >>= 8;
        }
        padded.push(acc as u8);
        assert_eq!(unpack_with_skip(&padded[6..], count, 1).unwrap(), "hi");
    }

    #[test]
    fn test_decode_unpacked_trims_padding() {
        let bytes = [0x48, 0x69, 0xFF, 0xFF];
        assert_eq!(decode_unpacked(&bytes).unwrap(), "Hi");
        assert!(decode_unpacked(&[0x48, 0x80]).is_err());
    }
}
