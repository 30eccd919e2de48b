//! Network registration, operator identity, and packet data contexts.
//!
//! The network picture is four independent round trips (voice reg, data
//! reg, operator, selection mode) that logically form one notification. An
//! accumulator marks each leg as received; the combined event is emitted
//! through the deferred queue so the last-arriving leg's handler finishes
//! before the event leaves.

use crate::bus::ModemEvent;
use crate::error::{Error, Result};
use crate::protocol::{FrameReader, RemoteError, RequestCode};
use crate::router::{PendingRequest, Purpose};
use crate::session::state::{
    DataCall, DataCallState, OperatorInfo, PendingNetworkInfo, RegStatus, RegistrationInfo,
    SelectionMode,
};
use crate::session::{Deferred, Outbox, Session};

fn parse_hex_field(field: Option<&str>) -> Option<u32> {
    let s = field?;
    u32::from_str_radix(s, 16).ok()
}

/// Parse a registration response: a string list whose first entries are
/// status, location area (hex), cell id (hex), and radio technology.
fn parse_registration(reader: &mut FrameReader<'_>) -> Result<RegistrationInfo> {
    let count = reader.read_i32()?;
    if count < 1 {
        return Err(Error::decode("empty registration response"));
    }
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        fields.push(reader.read_string16()?);
    }
    let status = fields[0]
        .as_deref()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| Error::decode("missing registration status"))?;
    Ok(RegistrationInfo {
        status: RegStatus::from_wire(status),
        radio_tech: fields
            .get(3)
            .and_then(|f| f.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        lac: parse_hex_field(fields.get(1).and_then(|f| f.as_deref())),
        cid: parse_hex_field(fields.get(2).and_then(|f| f.as_deref())),
    })
}

fn parse_operator(reader: &mut FrameReader<'_>) -> Result<OperatorInfo> {
    let count = reader.read_i32()?;
    if count < 3 {
        return Err(Error::decode(format!("operator response with {count} fields")));
    }
    let long_name = reader.read_string16()?;
    let short_name = reader.read_string16()?;
    let numeric = reader.read_string16()?;
    for _ in 3..count {
        reader.read_string16()?;
    }
    Ok(OperatorInfo {
        long_name,
        short_name,
        numeric,
    })
}

impl Session {
    /// Fire the four network-info legs and open a fresh accumulator.
    /// A refresh that lands while one is open restarts the batch.
    pub(crate) fn begin_network_info(&mut self, outbox: &mut Outbox<'_>) {
        self.state.pending_network = Some(PendingNetworkInfo::default());
        outbox.send_empty(RequestCode::VoiceRegistrationState, Purpose::NetworkInfo);
        outbox.send_empty(RequestCode::DataRegistrationState, Purpose::NetworkInfo);
        outbox.send_empty(RequestCode::Operator, Purpose::NetworkInfo);
        outbox.send_empty(RequestCode::QueryNetworkSelectionMode, Purpose::NetworkInfo);
    }

    /// One leg of the batch answered.
    pub(crate) fn on_network_leg(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        let parse_result = if error.is_some() {
            Ok(()) // leg failed remotely; mark received with nothing learned
        } else {
            self.parse_network_leg(pending.code, reader)
        };

        let Some(acc) = self.state.pending_network.as_mut() else {
            // Stale leg from a superseded batch.
            reader.discard_remaining();
            return parse_result;
        };
        match pending.code {
            RequestCode::VoiceRegistrationState => acc.voice_received = true,
            RequestCode::DataRegistrationState => acc.data_received = true,
            RequestCode::Operator => acc.operator_received = true,
            RequestCode::QueryNetworkSelectionMode => acc.selection_received = true,
            _ => {}
        }
        if acc.is_complete() {
            self.defer(Deferred::EmitNetworkInfo);
        }
        parse_result
    }

    fn parse_network_leg(
        &mut self,
        code: RequestCode,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        let Some(acc) = self.state.pending_network.as_mut() else {
            reader.discard_remaining();
            return Ok(());
        };
        match code {
            RequestCode::VoiceRegistrationState => {
                acc.info.voice_registration = Some(parse_registration(reader)?);
            }
            RequestCode::DataRegistrationState => {
                acc.info.data_registration = Some(parse_registration(reader)?);
            }
            RequestCode::Operator => {
                acc.info.operator = Some(parse_operator(reader)?);
            }
            RequestCode::QueryNetworkSelectionMode => {
                let _count = reader.read_i32()?;
                acc.info.selection_mode = Some(if reader.read_i32()? == 0 {
                    SelectionMode::Automatic
                } else {
                    SelectionMode::Manual
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Deferred continuation: close the accumulator and publish the
    /// combined picture.
    pub(crate) fn emit_network_info(&mut self) {
        let Some(acc) = self.state.pending_network.take() else {
            return;
        };
        self.state.network = acc.info.clone();
        self.emit(ModemEvent::NetworkInfoChanged { info: acc.info });
    }

    // --- packet data ------------------------------------------------------

    /// Parse the data-call records shared by the list response, the list
    /// changed event, and (on modern layouts) the setup response.
    fn parse_data_calls(&self, reader: &mut FrameReader<'_>) -> Result<Vec<DataCall>> {
        let legacy = self.state.quirks.legacy_wire_layout;
        if !legacy {
            let _version = reader.read_i32()?;
        }
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(Error::decode(format!("negative data call count {count}")));
        }
        let mut calls = Vec::with_capacity(count as usize);
        for _ in 0..count {
            calls.push(if legacy {
                let context_id = reader.read_u32()?;
                let active = reader.read_i32()?;
                let _kind = reader.read_string16()?;
                let apn = reader.read_string16()?;
                let address = reader.read_string16()?;
                DataCall {
                    context_id,
                    state: if active != 0 {
                        DataCallState::Connected
                    } else {
                        DataCallState::Disconnected
                    },
                    apn,
                    interface: None,
                    addresses: split_list(address),
                    dnses: Vec::new(),
                    gateways: Vec::new(),
                }
            } else {
                let status = reader.read_i32()?;
                let context_id = reader.read_u32()?;
                let active = reader.read_i32()?;
                let _kind = reader.read_string16()?;
                let interface = reader.read_string16()?;
                let addresses = reader.read_string16()?;
                let dnses = reader.read_string16()?;
                let gateways = reader.read_string16()?;
                DataCall {
                    context_id,
                    state: match (status, active) {
                        (0, 0) => DataCallState::Disconnected,
                        (0, _) => DataCallState::Connected,
                        _ => DataCallState::Disconnected,
                    },
                    apn: None,
                    interface,
                    addresses: split_list(addresses),
                    dnses: split_list(dnses),
                    gateways: split_list(gateways),
                }
            });
        }
        Ok(calls)
    }

    /// Shared by the solicited list response and the unsolicited changed
    /// event; both carry the full current set.
    pub(crate) fn on_data_call_list(
        &mut self,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        if error.is_some() {
            return Ok(());
        }
        let calls = self.parse_data_calls(reader)?;
        self.state.active_data_calls = calls
            .iter()
            .map(|call| (call.context_id, call.clone()))
            .collect();
        self.emit(ModemEvent::DataCallListChanged { calls });
        Ok(())
    }

    pub(crate) fn on_setup_data_call(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        if error.is_some() {
            self.emit(ModemEvent::DataCallSetupResult {
                token: pending.token,
                call: None,
                error,
            });
            return Ok(());
        }
        let call = if self.state.quirks.legacy_wire_layout {
            // Legacy shape: three strings, context id first.
            let _count = reader.read_i32()?;
            let context_id = reader
                .read_str()?
                .parse::<u32>()
                .map_err(|_| Error::decode("non-numeric context id"))?;
            let interface = reader.read_string16()?;
            let address = reader.read_string16()?;
            DataCall {
                context_id,
                state: DataCallState::Connected,
                apn: None,
                interface,
                addresses: split_list(address),
                dnses: Vec::new(),
                gateways: Vec::new(),
            }
        } else {
            self.parse_data_calls(reader)?
                .into_iter()
                .next()
                .ok_or_else(|| Error::decode("setup response without a data call record"))?
        };
        self.state
            .active_data_calls
            .insert(call.context_id, call.clone());
        self.emit(ModemEvent::DataCallSetupResult {
            token: pending.token,
            call: Some(call),
            error: None,
        });
        Ok(())
    }

    pub(crate) fn on_deactivate_data_call(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        if let Some(error) = error {
            self.emit(ModemEvent::RequestFailed {
                token: pending.token,
                code: pending.code,
                error,
            });
            return Ok(());
        }
        // The response carries no record; refresh the list to learn which
        // context went away.
        outbox.send_empty(RequestCode::DataCallList, Purpose::None);
        Ok(())
    }
}

fn split_list(field: Option<String>) -> Vec<String> {
    field
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventCode, FrameWriter};
    use crate::session::tests::Fixture;
    use bytes::Bytes;

    fn answer_leg(fx: &mut Fixture, code: RequestCode, build: impl FnOnce(&mut FrameWriter)) {
        let token = fx
            .queue
            .iter()
            .find_map(|frame| {
                let c = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
                (c == code.as_u32())
                    .then(|| u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]))
            })
            .expect("leg not requested");
        let mut w = FrameWriter::solicited(token, 0);
        build(&mut w);
        fx.process(w.finish());
    }

    fn registration_response(w: &mut FrameWriter, status: &str, lac: &str, cid: &str, tech: &str) {
        w.write_i32(4);
        w.write_str(status);
        w.write_str(lac);
        w.write_str(cid);
        w.write_str(tech);
    }

    #[test]
    fn test_network_info_batches_four_legs() {
        let mut fx = Fixture::new();
        fx.process(
            FrameWriter::unsolicited(EventCode::VoiceNetworkStateChanged.as_u32()).finish(),
        );
        assert_eq!(fx.queue.len(), 4);

        answer_leg(&mut fx, RequestCode::VoiceRegistrationState, |w| {
            registration_response(w, "1", "00C3", "0000A401", "3")
        });
        assert!(fx.events_drained().is_empty(), "three legs still open");

        answer_leg(&mut fx, RequestCode::DataRegistrationState, |w| {
            registration_response(w, "5", "00C3", "0000A401", "3")
        });
        answer_leg(&mut fx, RequestCode::Operator, |w| {
            w.write_i32(3);
            w.write_str("Example Net");
            w.write_str("ExNet");
            w.write_str("26201");
        });
        assert!(fx.events_drained().is_empty());

        answer_leg(&mut fx, RequestCode::QueryNetworkSelectionMode, |w| {
            w.write_i32(1);
            w.write_i32(0);
        });

        let events = fx.events_drained();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ModemEvent::NetworkInfoChanged { info } => {
                let voice = info.voice_registration.as_ref().unwrap();
                assert_eq!(voice.status, RegStatus::Registered);
                assert_eq!(voice.lac, Some(0xC3));
                assert_eq!(voice.cid, Some(0xA401));
                assert_eq!(
                    info.data_registration.as_ref().unwrap().status,
                    RegStatus::RegisteredRoaming
                );
                assert_eq!(
                    info.operator.as_ref().unwrap().numeric.as_deref(),
                    Some("26201")
                );
                assert_eq!(info.selection_mode, Some(SelectionMode::Automatic));
            }
            other => panic!("wrong event: {other:?}"),
        }
        assert_eq!(fx.session.state.network.selection_mode, Some(SelectionMode::Automatic));
    }

    #[test]
    fn test_failed_leg_still_completes_batch() {
        let mut fx = Fixture::new();
        fx.process(
            FrameWriter::unsolicited(EventCode::VoiceNetworkStateChanged.as_u32()).finish(),
        );

        // Answer all four, operator with a remote error.
        let frames: Vec<Bytes> = fx.queue.iter().cloned().collect();
        for frame in frames {
            let code = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
            let token = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
            let response = if code == RequestCode::Operator.as_u32() {
                FrameWriter::solicited(token, 2).finish()
            } else if code == RequestCode::QueryNetworkSelectionMode.as_u32() {
                let mut w = FrameWriter::solicited(token, 0);
                w.write_i32(1);
                w.write_i32(1);
                w.finish()
            } else {
                let mut w = FrameWriter::solicited(token, 0);
                registration_response(&mut w, "0", "FFFF", "FFFFFFFF", "0");
                w.finish()
            };
            fx.process(response);
        }

        let events = fx.events_drained();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ModemEvent::NetworkInfoChanged { info } if info.operator.is_none()
                && info.selection_mode == Some(SelectionMode::Manual)
        ));
    }

    fn modern_data_call(w: &mut FrameWriter, cid: u32, active: i32) {
        w.write_i32(0); // status ok
        w.write_u32(cid);
        w.write_i32(active);
        w.write_string16(Some("IP"));
        w.write_string16(Some("rmnet0"));
        w.write_string16(Some("10.0.0.2/24"));
        w.write_string16(Some("8.8.8.8 8.8.4.4"));
        w.write_string16(Some("10.0.0.1"));
    }

    #[test]
    fn test_data_call_list_changed() {
        let mut fx = Fixture::new();
        let mut w = FrameWriter::unsolicited(EventCode::DataCallListChanged.as_u32());
        w.write_i32(11); // record version
        w.write_i32(1);
        modern_data_call(&mut w, 1, 2);
        fx.process(w.finish());

        let events = fx.events_drained();
        match &events[0] {
            ModemEvent::DataCallListChanged { calls } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].state, DataCallState::Connected);
                assert_eq!(calls[0].dnses, vec!["8.8.8.8", "8.8.4.4"]);
            }
            other => panic!("wrong event: {other:?}"),
        }
        assert!(fx.session.state.active_data_calls.contains_key(&1));
    }

    #[test]
    fn test_setup_data_call_modern() {
        let mut fx = Fixture::new();
        let token = fx.router.next_token();
        fx.router
            .register(token, RequestCode::SetupDataCall, Purpose::None);

        let mut w = FrameWriter::solicited(token, 0);
        w.write_i32(11);
        w.write_i32(1);
        modern_data_call(&mut w, 3, 1);
        fx.process(w.finish());

        let events = fx.events_drained();
        assert!(matches!(
            &events[0],
            ModemEvent::DataCallSetupResult { call: Some(call), error: None, .. }
                if call.context_id == 3 && call.interface.as_deref() == Some("rmnet0")
        ));
    }

    #[test]
    fn test_setup_data_call_legacy() {
        let mut fx = Fixture::new();
        fx.session.state.quirks.legacy_wire_layout = true;
        let token = fx.router.next_token();
        fx.router
            .register(token, RequestCode::SetupDataCall, Purpose::None);

        let mut w = FrameWriter::solicited(token, 0);
        w.write_i32(3);
        w.write_str("1");
        w.write_str("ppp0");
        w.write_str("10.1.2.3");
        fx.process(w.finish());

        let events = fx.events_drained();
        assert!(matches!(
            &events[0],
            ModemEvent::DataCallSetupResult { call: Some(call), .. }
                if call.context_id == 1 && call.addresses == vec!["10.1.2.3"]
        ));
    }

    #[test]
    fn test_deactivate_refreshes_list() {
        let mut fx = Fixture::new();
        let token = fx.router.next_token();
        fx.router
            .register(token, RequestCode::DeactivateDataCall, Purpose::None);
        fx.process(FrameWriter::solicited(token, 0).finish());
        assert_eq!(fx.queued_codes(), vec![RequestCode::DataCallList.as_u32()]);
    }
}
