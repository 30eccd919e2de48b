//! SIM toolkit proactive command decoding.
//!
//! Proactive commands arrive as a BER-TLV envelope (tag `D0`) whose inner
//! TLVs describe the command. Each modeled command type becomes a variant
//! with explicit optional fields; unmodeled types survive as
//! [`ProactiveCommand::Other`] so the owning service can still respond to
//! them.

use serde::Serialize;

use crate::codec::{gsm7, ucs2, Cursor};
use crate::error::{Error, Result};

const ENVELOPE_TAG: u8 = 0xD0;

// Inner TLV tags, comprehension bit masked off.
const TAG_COMMAND_DETAILS: u8 = 0x01;
const TAG_DEVICE_IDENTITIES: u8 = 0x02;
const TAG_ALPHA_ID: u8 = 0x05;
const TAG_TEXT: u8 = 0x0D;
const TAG_ITEM: u8 = 0x0F;
const TAG_ITEM_ID: u8 = 0x10;
const TAG_RESPONSE_LENGTH: u8 = 0x11;

// Command type codes carried in the command details TLV.
const CMD_DISPLAY_TEXT: u8 = 0x21;
const CMD_GET_INKEY: u8 = 0x22;
const CMD_GET_INPUT: u8 = 0x23;
const CMD_SELECT_ITEM: u8 = 0x24;
const CMD_SETUP_MENU: u8 = 0x25;

/// The command details TLV, echoed back in every terminal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDetails {
    pub number: u8,
    pub type_code: u8,
    pub qualifier: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub identifier: u8,
    pub text: String,
}

/// A decoded proactive command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ProactiveCommand {
    DisplayText {
        details: CommandDetails,
        text: Option<String>,
        high_priority: bool,
        wait_for_dismissal: bool,
    },
    GetInkey {
        details: CommandDetails,
        prompt: Option<String>,
        digits_only: bool,
        yes_no: bool,
    },
    GetInput {
        details: CommandDetails,
        prompt: Option<String>,
        digits_only: bool,
        hide_input: bool,
        min_length: u8,
        max_length: u8,
    },
    SetupMenu {
        details: CommandDetails,
        title: Option<String>,
        items: Vec<MenuItem>,
    },
    SelectItem {
        details: CommandDetails,
        title: Option<String>,
        items: Vec<MenuItem>,
        default_item: Option<u8>,
    },
    /// Command types this driver does not model. Tolerated, not dropped.
    Other { details: CommandDetails },
}

impl ProactiveCommand {
    pub fn details(&self) -> &CommandDetails {
        match self {
            ProactiveCommand::DisplayText { details, .. }
            | ProactiveCommand::GetInkey { details, .. }
            | ProactiveCommand::GetInput { details, .. }
            | ProactiveCommand::SetupMenu { details, .. }
            | ProactiveCommand::SelectItem { details, .. }
            | ProactiveCommand::Other { details } => details,
        }
    }
}

/// Read a BER length: one byte, or `0x81` followed by a one-byte length.
fn read_tlv_len(cur: &mut Cursor<'_>) -> Result<usize> {
    match cur.read_u8()? {
        0x81 => Ok(cur.read_u8()? as usize),
        n if n < 0x80 => Ok(n as usize),
        other => Err(Error::decode(format!("unsupported TLV length {other:#04x}"))),
    }
}

/// Decode a text-string TLV body: one coding byte, then the text.
fn decode_text(body: &[u8]) -> Result<String> {
    let Some((&coding, data)) = body.split_first() else {
        return Ok(String::new());
    };
    match coding & 0x0C {
        0x00 => {
            let septets = data.len() * 8 / 7;
            gsm7::unpack(data, septets)
        }
        0x04 => Ok(data.iter().map(|&b| b as char).collect()),
        0x08 => ucs2::decode(data),
        other => Err(Error::decode(format!("unknown text coding {other:#04x}"))),
    }
}

/// Accumulated inner TLVs, independent of command type.
#[derive(Default)]
struct Fields {
    details: Option<CommandDetails>,
    alpha_id: Option<String>,
    text: Option<String>,
    items: Vec<MenuItem>,
    item_id: Option<u8>,
    response_length: Option<(u8, u8)>,
}

fn collect_fields(cur: &mut Cursor<'_>) -> Result<Fields> {
    let mut fields = Fields::default();
    while !cur.is_empty() {
        let tag = cur.read_u8()? & 0x7F;
        let len = read_tlv_len(cur)?;
        let body = cur.read_bytes(len)?;
        match tag {
            TAG_COMMAND_DETAILS => {
                if body.len() != 3 {
                    return Err(Error::decode("command details TLV must be 3 bytes"));
                }
                fields.details = Some(CommandDetails {
                    number: body[0],
                    type_code: body[1],
                    qualifier: body[2],
                });
            }
            TAG_DEVICE_IDENTITIES => {
                // Source/destination pair; routing is implied by context.
            }
            TAG_ALPHA_ID => {
                fields.alpha_id = Some(decode_text(&prepend_coding(body))?);
            }
            TAG_TEXT => {
                fields.text = Some(decode_text(body)?);
            }
            TAG_ITEM => {
                let Some((&identifier, rest)) = body.split_first() else {
                    continue; // empty item TLV marks an empty menu
                };
                fields.items.push(MenuItem {
                    identifier,
                    text: decode_text(&prepend_coding(rest))?,
                });
            }
            TAG_ITEM_ID => {
                if let Some(&id) = body.first() {
                    fields.item_id = Some(id);
                }
            }
            TAG_RESPONSE_LENGTH => {
                if body.len() == 2 {
                    fields.response_length = Some((body[0], body[1]));
                }
            }
            other => {
                tracing::debug!(tag = other, len, "unhandled proactive command TLV");
            }
        }
    }
    Ok(fields)
}

/// Alpha identifiers carry bare 8-bit or UCS2 text without a coding byte;
/// reuse the text decoder by synthesizing one.
fn prepend_coding(body: &[u8]) -> Vec<u8> {
    let coding = if body.first() == Some(&0x80) {
        // 0x80 prefix marks UCS2 alpha identifiers.
        return std::iter::once(0x08u8)
            .chain(body[1..].iter().copied())
            .collect();
    } else {
        0x04u8
    };
    std::iter::once(coding).chain(body.iter().copied()).collect()
}

/// Decode a proactive command envelope.
pub fn decode(data: &[u8]) -> Result<ProactiveCommand> {
    let mut cur = Cursor::new(data);
    let tag = cur.read_u8()?;
    if tag != ENVELOPE_TAG {
        return Err(Error::decode(format!(
            "not a proactive command envelope: tag {tag:#04x}"
        )));
    }
    let len = read_tlv_len(&mut cur)?;
    let mut inner = Cursor::new(cur.read_bytes(len)?);
    let fields = collect_fields(&mut inner)?;

    let details = fields
        .details
        .ok_or_else(|| Error::decode("proactive command without command details"))?;
    let qualifier = details.qualifier;

    Ok(match details.type_code {
        CMD_DISPLAY_TEXT => ProactiveCommand::DisplayText {
            details,
            text: fields.text,
            high_priority: qualifier & 0x01 != 0,
            wait_for_dismissal: qualifier & 0x80 != 0,
        },
        CMD_GET_INKEY => ProactiveCommand::GetInkey {
            details,
            prompt: fields.text,
            digits_only: qualifier & 0x01 == 0,
            yes_no: qualifier & 0x04 != 0,
        },
        CMD_GET_INPUT => {
            let (min_length, max_length) = fields.response_length.unwrap_or((0, u8::MAX));
            ProactiveCommand::GetInput {
                details,
                prompt: fields.text,
                digits_only: qualifier & 0x01 == 0,
                hide_input: qualifier & 0x04 != 0,
                min_length,
                max_length,
            }
        }
        CMD_SELECT_ITEM => ProactiveCommand::SelectItem {
            details,
            title: fields.alpha_id,
            items: fields.items,
            default_item: fields.item_id,
        },
        CMD_SETUP_MENU => ProactiveCommand::SetupMenu {
            details,
            title: fields.alpha_id,
            items: fields.items,
        },
        _ => ProactiveCommand::Other { details },
    })
}

/// General result codes for a terminal response.
pub const RESULT_OK: u8 = 0x00;
pub const RESULT_USER_TERMINATED: u8 = 0x10;
pub const RESULT_UNABLE_TO_PROCESS: u8 = 0x20;
pub const RESULT_BEYOND_CAPABILITIES: u8 = 0x32;

/// Encode the terminal response TLVs for a command, with an optional text
/// payload (Get Inkey / Get Input answers).
///
/// Bodies over 0x7F bytes use the `0x81` extended length form; a text that
/// does not fit a one-byte length at all is rejected.
pub fn encode_terminal_response(
    details: &CommandDetails,
    result: u8,
    input: Option<&str>,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&[
        0x81,
        0x03,
        details.number,
        details.type_code,
        details.qualifier,
    ]);
    // Device identities: terminal to SIM.
    out.extend_from_slice(&[0x82, 0x02, 0x82, 0x81]);
    out.extend_from_slice(&[0x83, 0x01, result]);
    if let Some(text) = input {
        let encoded = ucs2::encode(text);
        let body_len = encoded.len() + 1;
        if body_len > 0xFF {
            return Err(Error::protocol(format!(
                "terminal response text too long: {body_len} bytes"
            )));
        }
        out.push(0x8D);
        if body_len > 0x7F {
            out.push(0x81);
        }
        out.push(body_len as u8);
        out.push(0x08);
        out.extend(encoded);
    }
    Ok(out)
}
