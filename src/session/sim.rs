//! SIM status and the chained elementary-file fetch.
//!
//! When the card reaches `Ready` the session pulls a fixed sequence of
//! records: ICCID, IMSI, service table, display name, subscriber number.
//! Each fetch is its own request/response round trip; the pending entry's
//! [`Purpose`] carries which file and which step, so the response handler
//! can chain the next step without stored callbacks. A record the card
//! does not provision fails its round trip and is skipped, never fatal to
//! the chain.

use crate::bus::ModemEvent;
use crate::codec::{bcd, gsm7, ucs2};
use crate::error::{Error, Result};
use crate::protocol::{FrameReader, RemoteError, RequestCode};
use crate::router::{PendingRequest, Purpose};
use crate::session::state::{AppState, AppType, CardState, SimApplication, SimState, SimStatus};
use crate::session::{Outbox, Session};

// ICC file-system commands.
const CMD_READ_BINARY: u32 = 0xB0;
const CMD_READ_RECORD: u32 = 0xB2;
const CMD_GET_RESPONSE: u32 = 0xC0;

/// Fixed size of a GET_RESPONSE header for an elementary file.
const GET_RESPONSE_EF_SIZE: i32 = 15;

/// Status word for a successful ICC exchange.
const SW1_OK: u32 = 0x90;

/// The elementary files this driver reads, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfId {
    Iccid,
    Imsi,
    ServiceTable,
    Spn,
    Msisdn,
}

impl EfId {
    pub fn file_id(self) -> u16 {
        match self {
            EfId::Iccid => 0x2FE2,
            EfId::Imsi => 0x6F07,
            EfId::ServiceTable => 0x6F38,
            EfId::Spn => 0x6F46,
            EfId::Msisdn => 0x6F40,
        }
    }

    fn path(self) -> &'static str {
        match self {
            EfId::Iccid => "3F00",
            EfId::Msisdn => "3F007F10",
            _ => "3F007F20",
        }
    }

    fn next_in_chain(self) -> Option<EfId> {
        match self {
            EfId::Iccid => Some(EfId::Imsi),
            EfId::Imsi => Some(EfId::ServiceTable),
            EfId::ServiceTable => Some(EfId::Spn),
            EfId::Spn => Some(EfId::Msisdn),
            EfId::Msisdn => None,
        }
    }
}

/// Which round trip of a file fetch a pending request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IccIoStep {
    /// Header read: learn the file's size and structure.
    GetResponse,
    /// Body read of a transparent file.
    ReadBinary,
    /// One record of a linear-fixed file.
    ReadRecord {
        record: u8,
        total: u8,
        record_size: u8,
    },
    /// Plain request that answers with the value directly (IMSI).
    Direct,
}

impl Session {
    // --- SIM status ---------------------------------------------------------

    pub(crate) fn on_sim_status(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        if let Some(error) = error {
            tracing::warn!(token = pending.token, ?error, "SIM status fetch failed");
            return Ok(());
        }
        let status = self.parse_sim_status(reader)?;
        let sim_state = status.sim_state();
        let changed = self
            .state
            .sim_status
            .as_ref()
            .map(|old| old != &status)
            .unwrap_or(true);
        self.state.sim_status = Some(status.clone());
        if changed {
            self.emit(ModemEvent::SimStatusChanged {
                card_state: status.card_state,
                sim_state,
                applications: status.applications,
            });
        }
        if sim_state == SimState::Ready && self.state.icc.iccid.is_none() {
            self.start_icc_fetch(EfId::Iccid, outbox);
        }
        Ok(())
    }

    fn parse_sim_status(&self, reader: &mut FrameReader<'_>) -> Result<SimStatus> {
        let card_state = CardState::from_wire(reader.read_u32()?)?;
        let _universal_pin_state = reader.read_i32()?;
        let gsm_umts_index = reader.read_i32()?;
        let _cdma_index = reader.read_i32()?;
        if !self.state.quirks.legacy_wire_layout {
            let _ims_index = reader.read_i32()?;
        }
        let count = reader.read_i32()?;
        if !(0..=8).contains(&count) {
            return Err(Error::decode(format!("implausible application count {count}")));
        }
        let mut applications = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let app_type = AppType::from_wire(reader.read_u32()?);
            let app_state = AppState::from_wire(reader.read_u32()?);
            let _perso_substate = reader.read_i32()?;
            let aid = reader.read_string16()?;
            let _label = reader.read_string16()?;
            let _pin1_replaced = reader.read_i32()?;
            let _pin1 = reader.read_i32()?;
            let _pin2 = reader.read_i32()?;
            applications.push(SimApplication {
                app_type,
                app_state,
                aid,
            });
        }
        // The telephony application index decides which entry leads.
        if gsm_umts_index > 0 && (gsm_umts_index as usize) < applications.len() {
            applications.swap(0, gsm_umts_index as usize);
        }
        Ok(SimStatus {
            card_state,
            applications,
        })
    }

    // --- chained record fetch -------------------------------------------------

    fn start_icc_fetch(&mut self, file: EfId, outbox: &mut Outbox<'_>) {
        if file == EfId::Imsi {
            // IMSI has a dedicated request; the file read is the fallback.
            outbox.send_empty(
                RequestCode::GetImsi,
                Purpose::IccIo {
                    step: IccIoStep::Direct,
                    file,
                },
            );
            return;
        }
        self.send_sim_io(
            outbox,
            file,
            CMD_GET_RESPONSE,
            0,
            0,
            GET_RESPONSE_EF_SIZE,
            IccIoStep::GetResponse,
        );
    }

    fn send_sim_io(
        &mut self,
        outbox: &mut Outbox<'_>,
        file: EfId,
        command: u32,
        p1: i32,
        p2: i32,
        p3: i32,
        step: IccIoStep,
    ) {
        let aid = self.state.first_aid();
        let (_, mut frame) = outbox.begin(RequestCode::SimIo, Purpose::IccIo { step, file });
        frame.write_u32(command);
        frame.write_u32(u32::from(file.file_id()));
        frame.write_str(file.path());
        frame.write_i32(p1);
        frame.write_i32(p2);
        frame.write_i32(p3);
        frame.write_string16(None); // command data
        frame.write_string16(None); // pin2
        if !self.state.quirks.legacy_wire_layout {
            frame.write_string16(aid.as_deref());
        }
        outbox.push(frame);
    }

    /// Continue past `file`, or close the chain and publish what was
    /// learned.
    fn advance_icc_chain(&mut self, file: EfId, outbox: &mut Outbox<'_>) {
        match file.next_in_chain() {
            Some(next) => self.start_icc_fetch(next, outbox),
            None => self.emit(ModemEvent::IccInfoChanged {
                info: self.state.icc.clone(),
            }),
        }
    }

    /// A record that is not provisioned fails its exchange; the chain
    /// moves on.
    fn skip_record(&mut self, file: EfId, reason: &str, outbox: &mut Outbox<'_>) {
        tracing::debug!(?file, reason, "skipping card record");
        self.advance_icc_chain(file, outbox);
    }

    pub(crate) fn on_icc_io(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        let Purpose::IccIo { step, file } = pending.purpose else {
            tracing::warn!(token = pending.token, "ICC response without a fetch purpose");
            return Ok(());
        };

        if step == IccIoStep::Direct {
            return self.on_direct_imsi(file, error, reader, outbox);
        }

        if error.is_some() {
            self.skip_record(file, "remote error", outbox);
            return Ok(());
        }
        let sw1 = reader.read_u32()?;
        let _sw2 = reader.read_u32()?;
        let payload = reader.read_string16()?;
        if sw1 != SW1_OK {
            self.skip_record(file, "status word not ok", outbox);
            return Ok(());
        }
        let data = match payload {
            Some(hex) => bcd::from_hex(&hex)?,
            None => Vec::new(),
        };

        match step {
            IccIoStep::GetResponse => self.on_get_response(file, &data, outbox),
            IccIoStep::ReadBinary => {
                self.store_transparent(file, &data)?;
                self.advance_icc_chain(file, outbox);
                Ok(())
            }
            IccIoStep::ReadRecord {
                record,
                total,
                record_size,
            } => self.on_read_record(file, record, total, record_size, data, outbox),
            IccIoStep::Direct => unreachable!("handled above"),
        }
    }

    fn on_direct_imsi(
        &mut self,
        file: EfId,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        if error.is_some() {
            // Some basebands reject the dedicated request; read the file.
            self.send_sim_io(
                outbox,
                file,
                CMD_GET_RESPONSE,
                0,
                0,
                GET_RESPONSE_EF_SIZE,
                IccIoStep::GetResponse,
            );
            return Ok(());
        }
        self.state.icc.imsi = reader.read_string16()?;
        self.advance_icc_chain(file, outbox);
        Ok(())
    }

    /// Parse a GET_RESPONSE header and issue the body read it calls for.
    fn on_get_response(&mut self, file: EfId, data: &[u8], outbox: &mut Outbox<'_>) -> Result<()> {
        if data.len() < GET_RESPONSE_EF_SIZE as usize {
            return Err(Error::decode(format!(
                "file header of {} bytes for {file:?}",
                data.len()
            )));
        }
        let file_size = u16::from_be_bytes([data[2], data[3]]);
        let structure = data[13];
        match structure {
            0 => {
                // Transparent: one binary read of the whole body.
                let p3 = i32::from(file_size.min(0xFF));
                self.send_sim_io(outbox, file, CMD_READ_BINARY, 0, 0, p3, IccIoStep::ReadBinary);
            }
            1 | 3 => {
                // Linear fixed (or cyclic): read records sequentially.
                let record_size = data[14];
                if record_size == 0 || file_size == 0 {
                    self.skip_record(file, "empty record file", outbox);
                    return Ok(());
                }
                let total = (file_size / u16::from(record_size)).min(255) as u8;
                self.send_sim_io(
                    outbox,
                    file,
                    CMD_READ_RECORD,
                    1, // absolute record number
                    4, // absolute addressing mode
                    i32::from(record_size),
                    IccIoStep::ReadRecord {
                        record: 1,
                        total,
                        record_size,
                    },
                );
            }
            other => {
                self.skip_record(file, "unknown structure", outbox);
                tracing::debug!(structure = other, ?file, "unsupported file structure");
            }
        }
        Ok(())
    }

    fn on_read_record(
        &mut self,
        file: EfId,
        record: u8,
        total: u8,
        record_size: u8,
        data: Vec<u8>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        let combined = self.sim_records.add_part(
            file.file_id(),
            record as usize,
            total as usize,
            data,
        )?;
        if let Some(all) = combined {
            self.store_records(file, &all, record_size)?;
            self.advance_icc_chain(file, outbox);
            return Ok(());
        }
        // Sequential reads: the degenerate in-order reassembly case.
        self.send_sim_io(
            outbox,
            file,
            CMD_READ_RECORD,
            i32::from(record) + 1,
            4,
            i32::from(record_size),
            IccIoStep::ReadRecord {
                record: record + 1,
                total,
                record_size,
            },
        );
        Ok(())
    }

    fn store_transparent(&mut self, file: EfId, data: &[u8]) -> Result<()> {
        match file {
            EfId::Iccid => {
                self.state.icc.iccid = Some(bcd::decode(data)?);
            }
            EfId::Imsi => {
                self.state.icc.imsi = Some(bcd::decode_imsi(data)?);
            }
            EfId::ServiceTable => {
                self.state.service_table = Some(data.to_vec());
            }
            EfId::Spn => {
                self.state.icc.spn = decode_spn(data)?;
            }
            EfId::Msisdn => {
                return Err(Error::decode("subscriber number file is not transparent"));
            }
        }
        Ok(())
    }

    fn store_records(&mut self, file: EfId, data: &[u8], record_size: u8) -> Result<()> {
        match file {
            EfId::Msisdn => {
                self.state.icc.msisdn = data
                    .chunks(record_size as usize)
                    .find_map(decode_dialing_record);
                Ok(())
            }
            other => Err(Error::decode(format!(
                "unexpected record read for {other:?}"
            ))),
        }
    }
}

/// Service provider name: one display-condition byte, then the name in
/// either the unpacked 7-bit alphabet or UCS2 with an `0x80` marker.
fn decode_spn(data: &[u8]) -> Result<Option<String>> {
    let Some((_condition, name)) = data.split_first() else {
        return Ok(None);
    };
    if name.is_empty() || name.iter().all(|&b| b == 0xFF) {
        return Ok(None);
    }
    let text = if name[0] == 0x80 {
        let end = name
            .iter()
            .rposition(|&b| b != 0xFF)
            .map(|i| i + 1)
            .unwrap_or(name.len());
        let body = &name[1..end];
        ucs2::decode(&body[..body.len() & !1])?
    } else {
        gsm7::decode_unpacked(name)?
    };
    Ok(Some(text))
}

/// Decode one alpha-id + dialing-number record; `None` for unused records.
/// The number occupies the fixed 14-byte footer.
fn decode_dialing_record(record: &[u8]) -> Option<String> {
    if record.len() < 14 {
        return None;
    }
    let footer = &record[record.len() - 14..];
    let len = footer[0] as usize;
    if len == 0 || len == 0xFF || len > 11 {
        return None;
    }
    let toa = footer[1];
    let digits = bcd::decode(&footer[2..1 + len]).ok()?;
    if digits.is_empty() {
        return None;
    }
    Some(if toa == 0x91 {
        format!("+{digits}")
    } else {
        digits
    })
}
