//! SMS transfer-layer PDU encode/decode.
//!
//! Covers the three inbound shapes (SMS-DELIVER, status report, cell
//! broadcast page) and SMS-SUBMIT encoding with concatenation headers for
//! bodies that exceed one segment. All functions are pure; reassembly of
//! concatenated parts happens in the session layer.

use serde::Serialize;

use crate::codec::{bcd, gsm7, ucs2, Cursor};
use crate::error::{Error, Result};

/// Concatenation info from the user-data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcatInfo {
    pub reference: u16,
    pub total: u8,
    pub sequence: u8,
}

/// A decoded SMS-DELIVER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsDeliver {
    pub sender: String,
    /// Service-centre timestamp, `yy/MM/dd,hh:mm:ss±zz`.
    pub timestamp: String,
    pub pid: u8,
    pub dcs: u8,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concat: Option<ConcatInfo>,
}

/// A decoded SMS-STATUS-REPORT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub message_ref: u8,
    pub recipient: String,
    pub timestamp: String,
    /// TP-Status octet; `0` is "received by the SME".
    pub status: u8,
}

/// One page of a cell broadcast message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellBroadcastPage {
    pub serial: u16,
    pub geographic_scope: u8,
    pub message_code: u16,
    pub update_number: u8,
    pub message_id: u16,
    pub dcs: u8,
    pub page: u8,
    pub total_pages: u8,
    pub body: String,
}

/// Text alphabet selected by the data coding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alphabet {
    Gsm7,
    Octet,
    Ucs2,
}

fn alphabet_from_dcs(dcs: u8) -> Alphabet {
    // General data coding group: bits 3..2 select the alphabet. Other
    // groups (message waiting, data download) default to GSM-7.
    if dcs & 0xC0 == 0 || dcs & 0xF0 == 0xF0 {
        match (dcs >> 2) & 0x03 {
            1 => Alphabet::Octet,
            2 => Alphabet::Ucs2,
            _ => Alphabet::Gsm7,
        }
    } else {
        Alphabet::Gsm7
    }
}

/// Decode a sender/recipient address field: digit count, type-of-address
/// octet, then swapped BCD digits or a packed 7-bit alphanumeric.
fn decode_address(cur: &mut Cursor<'_>) -> Result<String> {
    let digits = cur.read_u8()? as usize;
    if digits > 20 {
        return Err(Error::decode(format!("address of {digits} digits")));
    }
    let toa = cur.read_u8()?;
    let raw = cur.read_bytes(digits.div_ceil(2))?;
    if toa & 0x70 == 0x50 {
        // Alphanumeric: the "digit" count is in semi-octets.
        let septets = digits * 4 / 7;
        return gsm7::unpack(raw, septets);
    }
    let mut number = bcd::decode(raw)?;
    number.truncate(digits);
    if toa & 0x70 == 0x10 {
        number.insert(0, '+');
    }
    Ok(number)
}

/// Decode the 7-byte service-centre timestamp.
fn decode_timestamp(cur: &mut Cursor<'_>) -> Result<String> {
    let mut fields = [0u8; 6];
    for field in &mut fields {
        *field = bcd::decode_digit_pair(cur.read_u8()?)?;
    }
    let tz = cur.read_u8()?;
    // The timezone byte is swapped BCD in quarter hours, with the sign in
    // bit 3 of the tens nibble.
    let sign = if tz & 0x08 != 0 { '-' } else { '+' };
    let quarters = (tz & 0x07) * 10 + (tz >> 4);
    let [yy, mo, dd, hh, mi, ss] = fields;
    Ok(format!(
        "{yy:02}/{mo:02}/{dd:02},{hh:02}:{mi:02}:{ss:02}{sign}{quarters:02}"
    ))
}

/// Parse the user-data header, returning any concatenation info and the
/// header length in bytes (excluding the length octet itself).
fn parse_udh(header: &[u8]) -> Result<Option<ConcatInfo>> {
    let mut cur = Cursor::new(header);
    let mut concat = None;
    while !cur.is_empty() {
        let id = cur.read_u8()?;
        let len = cur.read_u8()? as usize;
        let data = cur.read_bytes(len)?;
        match (id, len) {
            (0x00, 3) => {
                concat = Some(ConcatInfo {
                    reference: u16::from(data[0]),
                    total: data[1],
                    sequence: data[2],
                });
            }
            (0x08, 4) => {
                concat = Some(ConcatInfo {
                    reference: u16::from_be_bytes([data[0], data[1]]),
                    total: data[2],
                    sequence: data[3],
                });
            }
            _ => {
                tracing::debug!(id, len, "unhandled user-data header element");
            }
        }
    }
    Ok(concat)
}

/// Decode the user data of a DELIVER-family PDU.
fn decode_user_data(
    cur: &mut Cursor<'_>,
    dcs: u8,
    has_udh: bool,
) -> Result<(String, Option<ConcatInfo>)> {
    let udl = cur.read_u8()? as usize;
    let alphabet = alphabet_from_dcs(dcs);

    let (concat, header_bytes) = if has_udh {
        let udhl = cur.read_u8()? as usize;
        let header = cur.read_bytes(udhl)?;
        (parse_udh(header)?, udhl + 1)
    } else {
        (None, 0)
    };

    let body = match alphabet {
        Alphabet::Gsm7 => {
            // The length is in septets and covers the header plus fill.
            let header_septets = (header_bytes * 8).div_ceil(7);
            let fill_bits = (header_septets * 7 - header_bytes * 8) as u32;
            let septets = udl
                .checked_sub(header_septets)
                .ok_or_else(|| Error::decode("user data shorter than its header"))?;
            let packed = cur.read_bytes((septets * 7 + fill_bits as usize).div_ceil(8))?;
            gsm7::unpack_with_skip(packed, septets, fill_bits)?
        }
        Alphabet::Ucs2 => {
            let len = udl
                .checked_sub(header_bytes)
                .ok_or_else(|| Error::decode("user data shorter than its header"))?;
            ucs2::decode(cur.read_bytes(len)?)?
        }
        Alphabet::Octet => {
            let len = udl
                .checked_sub(header_bytes)
                .ok_or_else(|| Error::decode("user data shorter than its header"))?;
            // 8-bit data rendered as Latin-1, matching how legacy modems
            // deliver binary-class text.
            cur.read_bytes(len)?.iter().map(|&b| b as char).collect()
        }
    };
    Ok((body, concat))
}

/// Skip the service-centre address prefix that precedes inbound PDUs.
fn skip_smsc(cur: &mut Cursor<'_>) -> Result<()> {
    let len = cur.read_u8()? as usize;
    cur.skip(len)?;
    Ok(())
}

/// Decode an inbound SMS-DELIVER PDU (including its SMSC prefix).
pub fn decode_deliver(pdu: &[u8]) -> Result<SmsDeliver> {
    let mut cur = Cursor::new(pdu);
    skip_smsc(&mut cur)?;

    let first_octet = cur.read_u8()?;
    if first_octet & 0x03 != 0x00 {
        return Err(Error::decode(format!(
            "not a DELIVER PDU: first octet {first_octet:#04x}"
        )));
    }
    let has_udh = first_octet & 0x40 != 0;

    let sender = decode_address(&mut cur)?;
    let pid = cur.read_u8()?;
    let dcs = cur.read_u8()?;
    let timestamp = decode_timestamp(&mut cur)?;
    let (body, concat) = decode_user_data(&mut cur, dcs, has_udh)?;

    Ok(SmsDeliver {
        sender,
        timestamp,
        pid,
        dcs,
        body,
        concat,
    })
}

/// Decode an inbound SMS-STATUS-REPORT PDU (including its SMSC prefix).
pub fn decode_status_report(pdu: &[u8]) -> Result<StatusReport> {
    let mut cur = Cursor::new(pdu);
    skip_smsc(&mut cur)?;

    let first_octet = cur.read_u8()?;
    if first_octet & 0x03 != 0x02 {
        return Err(Error::decode(format!(
            "not a STATUS-REPORT PDU: first octet {first_octet:#04x}"
        )));
    }
    let message_ref = cur.read_u8()?;
    let recipient = decode_address(&mut cur)?;
    let timestamp = decode_timestamp(&mut cur)?;
    // Discharge time, same shape, not surfaced.
    decode_timestamp(&mut cur)?;
    let status = cur.read_u8()?;

    Ok(StatusReport {
        message_ref,
        recipient,
        timestamp,
        status,
    })
}

/// Decode one cell broadcast page in the GSM serial/message-id layout.
pub fn decode_broadcast_page(data: &[u8]) -> Result<CellBroadcastPage> {
    let mut cur = Cursor::new(data);
    let serial = cur.read_u16_be()?;
    let message_id = cur.read_u16_be()?;
    let dcs = cur.read_u8()?;
    let page_param = cur.read_u8()?;
    let page = page_param >> 4;
    let total_pages = page_param & 0x0F;
    if page == 0 || total_pages == 0 || page > total_pages {
        return Err(Error::decode(format!(
            "invalid page parameter {page_param:#04x}"
        )));
    }

    let content = cur.read_rest();
    let body = match alphabet_from_dcs(dcs) {
        Alphabet::Ucs2 => ucs2::decode(content)?,
        _ => {
            let septets = content.len() * 8 / 7;
            let text = gsm7::unpack(content, septets)?;
            // Pages are padded with carriage returns to their fixed size.
            text.trim_end_matches('\r').to_owned()
        }
    };

    Ok(CellBroadcastPage {
        serial,
        geographic_scope: (serial >> 14) as u8,
        message_code: (serial >> 4) & 0x03FF,
        update_number: (serial & 0x0F) as u8,
        message_id,
        dcs,
        page,
        total_pages,
        body,
    })
}

/// Encode a destination address field.
fn encode_address(number: &str, out: &mut Vec<u8>) -> Result<()> {
    let (toa, digits) = match number.strip_prefix('+') {
        Some(rest) => (0x91u8, rest),
        None => (0x81u8, number),
    };
    if digits.is_empty() {
        return Err(Error::decode("empty destination address"));
    }
    out.push(digits.chars().count() as u8);
    out.push(toa);
    out.extend(bcd::encode(digits)?);
    Ok(())
}

// Segment capacities per TS 23.040: one SMS carries 140 user-data octets.
const GSM7_SINGLE: usize = 160;
const GSM7_SEGMENT: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_SEGMENT: usize = 67;

/// Split `body` into chunks that each fit one segment, never splitting an
/// extension character from its escape septet.
fn split_gsm7(body: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut used = 0usize;
    for c in body.chars() {
        let cost = gsm7::septet_len(&c.to_string());
        if used + cost > limit {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(c);
        used += cost;
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_chars(body: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(limit).map(|c| c.iter().collect()).collect()
}

/// Encode `body` to `destination` as one or more SMS-SUBMIT PDUs.
///
/// The alphabet is chosen by scanning the body: GSM-7 when every character
/// is representable, UCS2 otherwise. Bodies that exceed one segment get an
/// 8-bit concatenation header carrying `concat_ref`.
pub fn encode_submit(destination: &str, body: &str, concat_ref: u8) -> Result<Vec<Vec<u8>>> {
    let use_gsm7 = gsm7::is_encodable(body);
    let chunks = if use_gsm7 {
        if gsm7::septet_len(body) <= GSM7_SINGLE {
            vec![body.to_owned()]
        } else {
            split_gsm7(body, GSM7_SEGMENT)
        }
    } else if body.chars().count() <= UCS2_SINGLE {
        vec![body.to_owned()]
    } else {
        split_chars(body, UCS2_SEGMENT)
    };

    let total = chunks.len();
    if total > u8::MAX as usize {
        return Err(Error::decode("message body too long to segment"));
    }

    let mut pdus = Vec::with_capacity(total);
    for (i, chunk) in chunks.iter().enumerate() {
        let with_udh = total > 1;
        let mut pdu = Vec::with_capacity(chunk.len() + 16);
        let mut first_octet = 0x01u8; // SMS-SUBMIT, no validity period
        if with_udh {
            first_octet |= 0x40;
        }
        pdu.push(first_octet);
        pdu.push(0x00); // TP-MR, assigned by the modem
        encode_address(destination, &mut pdu)?;
        pdu.push(0x00); // TP-PID
        pdu.push(if use_gsm7 { 0x00 } else { 0x08 }); // TP-DCS

        let udh: &[u8] = if with_udh {
            &[0x05, 0x00, 0x03, concat_ref, total as u8, (i + 1) as u8]
        } else {
            &[]
        };

        if use_gsm7 {
            let header_septets = (udh.len() * 8).div_ceil(7);
            let fill_bits = (header_septets * 7 - udh.len() * 8) as u32;
            let (packed, septets) = gsm7::pack_with_skip(chunk, fill_bits)?;
            pdu.push((header_septets + septets) as u8); // TP-UDL in septets
            pdu.extend_from_slice(udh);
            pdu.extend(packed);
        } else {
            let encoded = ucs2::encode(chunk);
            pdu.push((udh.len() + encoded.len()) as u8); // TP-UDL in octets
            pdu.extend_from_slice(udh);
            pdu.extend(encoded);
        }
        pdus.push(pdu);
    }
    Ok(pdus)
}
