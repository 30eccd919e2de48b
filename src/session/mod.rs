//! The per-channel session state machine.
//!
//! [`Session`] owns everything the driver knows about one modem channel
//! and hosts the handler for every solicited response and unsolicited
//! event. Handlers run synchronously in the frame-processing context; work
//! that must happen after the current handler's stack unwinds (the batched
//! network-info emission) goes through the deferred queue, drained by the
//! driver after each frame.
//!
//! The module is split by concern: call-list reconciliation in `calls`,
//! network registration in `network`, the chained SIM record fetch in
//! `sim`, PDU codecs in `sms`, proactive commands in `stk`.

pub mod sim;
pub mod sms;
pub mod state;
pub mod stk;

mod calls;
mod network;

use std::collections::VecDeque;

use bytes::Bytes;

use crate::assembler::Assembler;
use crate::bus::{EventBus, ModemEvent};
use crate::codec::bcd;
use crate::error::Result;
use crate::protocol::{
    EventCode, FrameReader, FrameWriter, RemoteError, RequestCode,
};
use crate::router::{CallListTrigger, PendingRequest, Purpose, RequestRouter};

pub use state::SessionState;

/// Work queued by a handler to run after its own stack unwinds, on the
/// same processing context.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Deferred {
    EmitNetworkInfo,
}

/// Borrowed access to the token table and the outbound frame queue,
/// handed to handlers so they can chain follow-up requests.
pub struct Outbox<'a> {
    pub(crate) router: &'a mut RequestRouter,
    pub(crate) queue: &'a mut VecDeque<Bytes>,
}

impl Outbox<'_> {
    /// Allocate a token, record the pending entry, and open a request
    /// frame for it.
    pub(crate) fn begin(&mut self, code: RequestCode, purpose: Purpose) -> (u32, FrameWriter) {
        let token = self.router.next_token();
        self.router.register(token, code, purpose);
        (token, FrameWriter::request(code, token))
    }

    /// Queue a finished frame for the writer.
    pub(crate) fn push(&mut self, frame: FrameWriter) {
        self.queue.push_back(frame.finish());
    }

    /// Send a request with an empty payload.
    pub(crate) fn send_empty(&mut self, code: RequestCode, purpose: Purpose) -> u32 {
        let (token, frame) = self.begin(code, purpose);
        self.push(frame);
        token
    }
}

/// Reassembly key for concatenated SMS: sender plus segment reference.
type SmsKey = (String, u16);
/// Reassembly key for broadcast pages: serial plus message id, with the
/// serial masked per the geographic scope.
type CbKey = (u16, u16);

pub struct Session {
    pub state: SessionState,
    bus: EventBus,
    deferred: VecDeque<Deferred>,
    sms_parts: Assembler<SmsKey>,
    cb_parts: Assembler<CbKey>,
    pub(crate) sim_records: Assembler<u16>,
    next_concat_ref: u8,
}

impl Session {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: SessionState::new(),
            bus,
            deferred: VecDeque::new(),
            sms_parts: Assembler::new(),
            cb_parts: Assembler::new(),
            sim_records: Assembler::new(),
            next_concat_ref: 0,
        }
    }

    pub(crate) fn emit(&self, event: ModemEvent) {
        self.bus.emit(event);
    }

    pub(crate) fn defer(&mut self, work: Deferred) {
        self.deferred.push_back(work);
    }

    /// Next concatenation reference for an outbound multipart message.
    pub(crate) fn next_concat_ref(&mut self) -> u8 {
        self.next_concat_ref = self.next_concat_ref.wrapping_add(1);
        self.next_concat_ref
    }

    /// Run deferred continuations. Called by the driver strictly after the
    /// triggering frame's handler has returned.
    pub fn drain_deferred(&mut self) {
        while let Some(work) = self.deferred.pop_front() {
            match work {
                Deferred::EmitNetworkInfo => self.emit_network_info(),
            }
        }
    }

    /// Abandon all partial reassembly at a channel boundary.
    pub fn clear_reassembly(&mut self) {
        self.sms_parts.clear();
        self.cb_parts.clear();
        self.sim_records.clear();
    }

    /// Dispatch a solicited response to its handler.
    pub fn on_solicited(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        use RequestCode::*;
        match pending.code {
            GetSimStatus => self.on_sim_status(pending, error, reader, outbox),
            EnterSimPin | EnterSimPuk => self.on_pin_result(pending, error, reader, outbox),
            GetCurrentCalls => self.on_call_list(pending, error, reader, outbox),
            Dial | Hangup | Answer => self.on_call_action(pending, error, outbox),
            LastCallFailCause => self.on_fail_cause(pending, error, reader),
            SignalStrength => self.on_signal_strength(error, reader),
            VoiceRegistrationState | DataRegistrationState | Operator
            | QueryNetworkSelectionMode => self.on_network_leg(pending, error, reader),
            RadioPower | SetPreferredNetworkType | StkTerminalResponse | SmsAcknowledge
            | SetNetworkSelectionAutomatic => {
                self.on_plain(pending, error);
                Ok(())
            }
            GetPreferredNetworkType => self.on_preferred_network_type(pending, error, reader),
            SendSms => self.on_send_sms_result(pending, error, reader),
            SetupDataCall => self.on_setup_data_call(pending, error, reader),
            DeactivateDataCall => self.on_deactivate_data_call(pending, error, outbox),
            DataCallList => self.on_data_call_list(error, reader),
            SimIo | GetImsi => self.on_icc_io(pending, error, reader, outbox),
            BasebandVersion => self.on_baseband_version(pending, error, reader),
            DeviceIdentity => self.on_device_identity(pending, error, reader),
        }
    }

    /// Dispatch an unsolicited event to its handler.
    pub fn on_unsolicited(
        &mut self,
        code: EventCode,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        use EventCode::*;
        match code {
            RadioStateChanged => self.on_radio_state_changed(reader, outbox),
            RilConnected => self.on_connected(reader, outbox),
            SimStatusChanged => {
                reader.discard_remaining();
                outbox.send_empty(RequestCode::GetSimStatus, Purpose::None);
                Ok(())
            }
            CallStateChanged => {
                reader.discard_remaining();
                self.request_call_list(CallListTrigger::StateChange, outbox);
                Ok(())
            }
            VoiceNetworkStateChanged => {
                reader.discard_remaining();
                self.begin_network_info(outbox);
                Ok(())
            }
            NewSms => self.on_new_sms(reader, outbox),
            NewSmsStatusReport => self.on_status_report(reader, outbox),
            NewBroadcastSms => self.on_broadcast_sms(reader),
            OnUssd => self.on_ussd(reader),
            NitzTimeReceived => {
                let time = reader.read_str()?;
                self.emit(ModemEvent::NitzTimeReceived { time });
                Ok(())
            }
            SignalStrength => self.on_signal_strength(None, reader),
            DataCallListChanged => self.on_data_call_list(None, reader),
            StkProactiveCommand => self.on_stk_command(reader),
        }
    }

    // --- radio power and connection -------------------------------------

    fn on_radio_state_changed(
        &mut self,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        let _count = reader.read_i32()?;
        let new_state = state::RadioState::from_wire(reader.read_u32()?);
        let old_state = self.state.radio_state.replace(new_state);
        if old_state == Some(new_state) {
            return Ok(());
        }

        self.emit(ModemEvent::RadioStateChanged { state: new_state });
        match new_state {
            state::RadioState::Ready => self.radio_ready_cascade(outbox),
            _ => {
                // IMEI and ICC identity survive a radio reset; live calls
                // and data contexts do not.
                self.state.clear_ephemeral();
            }
        }
        Ok(())
    }

    /// Entering `Ready` kicks off the standing queries: who is this modem,
    /// what card is in it, what network is it on, and the preferred
    /// network type the owner configured previously.
    fn radio_ready_cascade(&mut self, outbox: &mut Outbox<'_>) {
        outbox.send_empty(RequestCode::DeviceIdentity, Purpose::None);
        outbox.send_empty(RequestCode::BasebandVersion, Purpose::None);
        outbox.send_empty(RequestCode::GetSimStatus, Purpose::None);
        self.begin_network_info(outbox);
        if let Some(kind) = self.state.preferred_network_type {
            let (_, mut frame) =
                outbox.begin(RequestCode::SetPreferredNetworkType, Purpose::None);
            frame.write_i32(1);
            frame.write_u32(kind);
            outbox.push(frame);
        } else {
            outbox.send_empty(RequestCode::GetPreferredNetworkType, Purpose::None);
        }
    }

    fn on_connected(
        &mut self,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        let _count = reader.read_i32()?;
        let version = reader.read_u32()?;

        if self.state.protocol_version.is_some() {
            // Reconnect. The layout may change underneath us, so nothing
            // in flight may be decoded under the new rules: drain every
            // pending token and abandon partial reassembly first.
            tracing::warn!(version, "modem reconnected; resetting channel state");
            for orphan in outbox.router.reset() {
                self.emit(ModemEvent::RequestCancelled {
                    token: orphan.token,
                    code: orphan.code,
                });
            }
            self.clear_reassembly();
            self.state.clear_ephemeral();
        }

        self.state.protocol_version = Some(version);
        self.state.quirks.legacy_wire_layout = version < 5;
        self.emit(ModemEvent::Connected { version });
        Ok(())
    }

    // --- plain results ----------------------------------------------------

    /// Requests whose success needs no event; failures still surface.
    fn on_plain(&mut self, pending: PendingRequest, error: Option<RemoteError>) {
        if let Some(error) = error {
            self.emit(ModemEvent::RequestFailed {
                token: pending.token,
                code: pending.code,
                error,
            });
        }
    }

    fn on_preferred_network_type(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        if error.is_some() {
            self.on_plain(pending, error);
            return Ok(());
        }
        let _count = reader.read_i32()?;
        self.state.preferred_network_type = Some(reader.read_u32()?);
        Ok(())
    }

    fn on_baseband_version(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        if error.is_some() {
            self.on_plain(pending, error);
            return Ok(());
        }
        self.state.baseband_version = reader.read_string16()?;
        self.emit(ModemEvent::DeviceIdentityChanged {
            imei: self.state.imei.clone(),
            baseband_version: self.state.baseband_version.clone(),
        });
        Ok(())
    }

    fn on_device_identity(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        if error.is_some() {
            self.on_plain(pending, error);
            return Ok(());
        }
        let count = reader.read_i32()?;
        if count < 1 {
            return Ok(());
        }
        // imei, imeisv, esn, meid; only the first matters here.
        self.state.imei = reader.read_string16()?;
        for _ in 1..count {
            reader.read_string16()?;
        }
        self.emit(ModemEvent::DeviceIdentityChanged {
            imei: self.state.imei.clone(),
            baseband_version: self.state.baseband_version.clone(),
        });
        Ok(())
    }

    // --- PIN / PUK --------------------------------------------------------

    fn on_pin_result(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        // The retry count is optional on the wire; absent means unknown.
        let retry_count = if reader.remaining() >= 8 {
            let _count = reader.read_i32()?;
            reader.read_i32()?
        } else {
            -1
        };
        self.emit(ModemEvent::PinResult {
            token: pending.token,
            retry_count,
            error,
        });
        if error.is_none() {
            // Unlock succeeded; the card state is about to change.
            outbox.send_empty(RequestCode::GetSimStatus, Purpose::None);
        }
        Ok(())
    }

    // --- signal strength ---------------------------------------------------

    fn on_signal_strength(
        &mut self,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        if error.is_some() {
            return Ok(());
        }
        // The record carries a dozen technology-specific fields; only the
        // leading GSM pair is modeled.
        let signal_strength = reader.read_u32()?;
        let bit_error_rate = reader.read_u32()?;
        reader.discard_remaining();
        self.emit(ModemEvent::SignalStrengthChanged {
            signal_strength,
            bit_error_rate,
        });
        Ok(())
    }

    // --- SMS ---------------------------------------------------------------

    fn on_new_sms(
        &mut self,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        let hex = reader.read_str()?;
        let pdu = match bcd::from_hex(&hex) {
            Ok(pdu) => pdu,
            Err(err) => {
                self.acknowledge_sms(outbox, false);
                return Err(err);
            }
        };
        match sms::decode_deliver(&pdu) {
            Ok(message) => {
                self.acknowledge_sms(outbox, true);
                self.deliver_sms(message)
            }
            Err(err) => {
                self.acknowledge_sms(outbox, false);
                Err(err)
            }
        }
    }

    /// Route a decoded DELIVER through reassembly if it is one segment of
    /// a concatenated message, else emit it directly.
    fn deliver_sms(&mut self, message: sms::SmsDeliver) -> Result<()> {
        let Some(concat) = message.concat else {
            self.emit(ModemEvent::SmsReceived { message });
            return Ok(());
        };
        let key = (message.sender.clone(), concat.reference);
        let part = message.body.clone().into_bytes();
        let Some(combined) =
            self.sms_parts
                .add_part(key, concat.sequence as usize, concat.total as usize, part)?
        else {
            return Ok(());
        };
        let body = String::from_utf8(combined.to_vec())
            .map_err(|_| crate::error::Error::decode("reassembled body is not UTF-8"))?;
        self.emit(ModemEvent::SmsReceived {
            message: sms::SmsDeliver {
                body,
                ..message
            },
        });
        Ok(())
    }

    /// Acknowledge receipt so the modem releases the message. Failure ack
    /// carries the unspecified-error cause.
    pub(crate) fn acknowledge_sms(&mut self, outbox: &mut Outbox<'_>, success: bool) {
        let (_, mut frame) = outbox.begin(RequestCode::SmsAcknowledge, Purpose::None);
        frame.write_i32(2);
        frame.write_i32(if success { 1 } else { 0 });
        frame.write_i32(if success { 0 } else { 0xFF });
        outbox.push(frame);
    }

    fn on_status_report(
        &mut self,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        let hex = reader.read_str()?;
        let pdu = bcd::from_hex(&hex)?;
        let report = sms::decode_status_report(&pdu)?;
        self.acknowledge_sms(outbox, true);
        self.emit(ModemEvent::SmsStatusReport { report });
        Ok(())
    }

    fn on_broadcast_sms(&mut self, reader: &mut FrameReader<'_>) -> Result<()> {
        let data = reader.read_byte_array()?;
        let page = sms::decode_broadcast_page(&data)?;

        // The geographic scope decides how widely the serial number
        // identifies a message; immediate-scope serials are unique per
        // cell, so the message code alone keys those.
        let masked_serial = match page.geographic_scope {
            0 | 3 => page.serial & 0x3FF0,
            _ => page.serial,
        };
        let key = (masked_serial, page.message_id);
        let Some(combined) = self.cb_parts.add_part(
            key,
            page.page as usize,
            page.total_pages as usize,
            page.body.clone().into_bytes(),
        )?
        else {
            return Ok(());
        };
        let body = String::from_utf8(combined.to_vec())
            .map_err(|_| crate::error::Error::decode("reassembled body is not UTF-8"))?;
        self.emit(ModemEvent::CellBroadcastReceived {
            message_id: page.message_id,
            serial: page.serial,
            total_pages: page.total_pages,
            body,
        });
        Ok(())
    }

    fn on_send_sms_result(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        let message_ref = if error.is_none() && reader.remaining() >= 4 {
            let mref = reader.read_i32()?;
            reader.discard_remaining(); // ack PDU and error-class tail
            mref
        } else {
            -1
        };
        self.emit(ModemEvent::SendSmsResult {
            token: pending.token,
            message_ref,
            error,
        });
        Ok(())
    }

    // --- USSD and STK -------------------------------------------------------

    fn on_ussd(&mut self, reader: &mut FrameReader<'_>) -> Result<()> {
        let _count = reader.read_i32()?;
        let type_code = reader.read_str()?;
        let message = reader.read_string16()?;
        // Type "1" means the network is holding the session open for
        // further input.
        self.emit(ModemEvent::UssdReceived {
            session_active: type_code == "1",
            message,
        });
        Ok(())
    }

    fn on_stk_command(&mut self, reader: &mut FrameReader<'_>) -> Result<()> {
        let hex = reader.read_str()?;
        let data = bcd::from_hex(&hex)?;
        let command = stk::decode(&data)?;
        self.emit(ModemEvent::StkCommand { command });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::protocol::FrameBuffer;
    use tokio::sync::mpsc::UnboundedReceiver;

    pub(crate) struct Fixture {
        pub session: Session,
        pub router: RequestRouter,
        pub queue: VecDeque<Bytes>,
        pub events: UnboundedReceiver<ModemEvent>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let (bus, events) = EventBus::new();
            Self {
                session: Session::new(bus),
                router: RequestRouter::new(),
                queue: VecDeque::new(),
                events,
            }
        }

        /// Feed one frame through classification and dispatch.
        pub fn process(&mut self, frame: Bytes) {
            let mut buffer = FrameBuffer::new();
            buffer.feed(&frame);
            let mut reader = buffer.try_extract_frame().unwrap().unwrap();
            let inbound = self.router.classify(&mut reader).unwrap();
            let mut outbox = Outbox {
                router: &mut self.router,
                queue: &mut self.queue,
            };
            match inbound {
                Some(crate::router::Inbound::Solicited { token, error }) => {
                    if let Some(pending) = outbox.router.complete(token) {
                        self.session
                            .on_solicited(pending, error, &mut reader, &mut outbox)
                            .unwrap();
                    }
                }
                Some(crate::router::Inbound::Unsolicited(code)) => {
                    self.session
                        .on_unsolicited(code, &mut reader, &mut outbox)
                        .unwrap();
                }
                None => {}
            }
            drop(reader);
            self.session.drain_deferred();
        }

        pub fn events_drained(&mut self) -> Vec<ModemEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// Request codes of the frames queued by handlers, in order.
        pub fn queued_codes(&mut self) -> Vec<u32> {
            self.queue
                .iter()
                .map(|frame| u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]))
                .collect()
        }
    }

    fn radio_state_frame(state: u32) -> Bytes {
        let mut w = FrameWriter::unsolicited(EventCode::RadioStateChanged.as_u32());
        w.write_i32(1);
        w.write_u32(state);
        w.finish()
    }

    #[test]
    fn test_radio_ready_cascade() {
        let mut fx = Fixture::new();
        fx.process(radio_state_frame(10));

        let events = fx.events_drained();
        assert!(matches!(
            events[0],
            ModemEvent::RadioStateChanged {
                state: state::RadioState::Ready
            }
        ));

        let codes = fx.queued_codes();
        assert!(codes.contains(&RequestCode::DeviceIdentity.as_u32()));
        assert!(codes.contains(&RequestCode::GetSimStatus.as_u32()));
        assert!(codes.contains(&RequestCode::VoiceRegistrationState.as_u32()));
        assert!(codes.contains(&RequestCode::GetPreferredNetworkType.as_u32()));
    }

    #[test]
    fn test_radio_off_clears_calls_keeps_identity() {
        let mut fx = Fixture::new();
        fx.session.state.radio_state = Some(state::RadioState::Ready);
        fx.session.state.imei = Some("490154203237518".into());
        fx.session.state.active_calls.insert(
            1,
            state::Call {
                index: 1,
                state: state::CallState::Active,
                number: None,
                name: None,
                is_mt: false,
                is_multiparty: false,
                is_voice: true,
            },
        );

        fx.process(radio_state_frame(0));
        assert!(fx.session.state.active_calls.is_empty());
        assert!(fx.session.state.imei.is_some());
    }

    #[test]
    fn test_repeated_radio_state_is_not_reemitted() {
        let mut fx = Fixture::new();
        fx.process(radio_state_frame(0));
        fx.events_drained();
        fx.process(radio_state_frame(0));
        assert!(fx.events_drained().is_empty());
    }

    fn connected_frame(version: u32) -> Bytes {
        let mut w = FrameWriter::unsolicited(EventCode::RilConnected.as_u32());
        w.write_i32(1);
        w.write_u32(version);
        w.finish()
    }

    #[test]
    fn test_connected_sets_quirks() {
        let mut fx = Fixture::new();
        fx.process(connected_frame(4));
        assert!(fx.session.state.quirks.legacy_wire_layout);

        let mut fx = Fixture::new();
        fx.process(connected_frame(9));
        assert!(!fx.session.state.quirks.legacy_wire_layout);
    }

    #[test]
    fn test_reconnect_drains_pending_and_reassembly() {
        let mut fx = Fixture::new();
        fx.process(connected_frame(9));
        fx.events_drained();

        let token = fx.router.next_token();
        fx.router.register(token, RequestCode::Dial, Purpose::None);
        fx.session
            .sms_parts
            .add_part(("12".into(), 1), 1, 2, b"x".to_vec())
            .unwrap();

        fx.process(connected_frame(4));
        assert_eq!(fx.router.pending_count(), 0);
        assert_eq!(fx.session.sms_parts.pending(), 0);
        assert!(fx.session.state.quirks.legacy_wire_layout);

        let events = fx.events_drained();
        assert!(events
            .iter()
            .any(|e| matches!(e, ModemEvent::RequestCancelled { code: RequestCode::Dial, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ModemEvent::Connected { version: 4 })));
    }

    #[test]
    fn test_pin_result_without_retry_field() {
        let mut fx = Fixture::new();
        let token = fx.router.next_token();
        fx.router
            .register(token, RequestCode::EnterSimPin, Purpose::None);

        fx.process(FrameWriter::solicited(token, 0).finish());
        let events = fx.events_drained();
        assert!(matches!(
            events[0],
            ModemEvent::PinResult {
                retry_count: -1,
                error: None,
                ..
            }
        ));
        // Success refreshes the SIM status.
        assert_eq!(
            fx.queued_codes(),
            vec![RequestCode::GetSimStatus.as_u32()]
        );
    }

    #[test]
    fn test_pin_result_with_retry_count() {
        let mut fx = Fixture::new();
        let token = fx.router.next_token();
        fx.router
            .register(token, RequestCode::EnterSimPin, Purpose::None);

        let mut w = FrameWriter::solicited(token, 3);
        w.write_i32(1);
        w.write_i32(2);
        fx.process(w.finish());

        let events = fx.events_drained();
        assert!(matches!(
            events[0],
            ModemEvent::PinResult {
                retry_count: 2,
                error: Some(RemoteError::PasswordIncorrect),
                ..
            }
        ));
        assert!(fx.queue.is_empty());
    }

    fn sms_frame(pdu: &[u8]) -> Bytes {
        let mut w = FrameWriter::unsolicited(EventCode::NewSms.as_u32());
        w.write_str(&bcd::to_hex(pdu));
        w.finish()
    }

    fn concat_pdu(reference: u8, seq: u8, total: u8, text: &str) -> Vec<u8> {
        let mut pdu = vec![
            0x00,
            0x44,
            0x04,
            0x81,
            0x21,
            0x43,
            0x00,
            0x00,
            0x11,
            0x60,
            0x42,
            0x01,
            0x82,
            0x44,
            0x80,
        ];
        let (packed, septets) = crate::codec::gsm7::pack_with_skip(text, 1).unwrap();
        pdu.push((7 + septets) as u8);
        pdu.extend_from_slice(&[0x05, 0x00, 0x03, reference, total, seq]);
        pdu.extend(packed);
        pdu
    }

    #[test]
    fn test_multipart_sms_reversed_order() {
        let mut fx = Fixture::new();
        fx.process(sms_frame(&concat_pdu(7, 2, 2, "world")));
        // The first part acknowledges but must not emit.
        assert!(fx.events_drained().is_empty());
        assert_eq!(
            fx.queued_codes(),
            vec![RequestCode::SmsAcknowledge.as_u32()]
        );

        fx.process(sms_frame(&concat_pdu(7, 1, 2, "hello ")));
        let events = fx.events_drained();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ModemEvent::SmsReceived { message } => assert_eq!(message.body, "hello world"),
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_sms_is_nacked() {
        let mut fx = Fixture::new();
        let mut buffer = FrameBuffer::new();
        let mut w = FrameWriter::unsolicited(EventCode::NewSms.as_u32());
        w.write_str("zz-not-hex");
        buffer.feed(&w.finish());
        let mut reader = buffer.try_extract_frame().unwrap().unwrap();
        let inbound = fx.router.classify(&mut reader).unwrap();
        assert!(matches!(
            inbound,
            Some(crate::router::Inbound::Unsolicited(EventCode::NewSms))
        ));
        let mut outbox = Outbox {
            router: &mut fx.router,
            queue: &mut fx.queue,
        };
        let result = fx
            .session
            .on_unsolicited(EventCode::NewSms, &mut reader, &mut outbox);
        assert!(result.is_err());
        drop(reader);

        // The negative acknowledgement still went out. Payload layout:
        // code, token, field count, success flag, cause.
        let frame = fx.queue.pop_front().unwrap();
        let success = i32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]]);
        assert_eq!(success, 0);
    }

    #[test]
    fn test_ussd_session_flag() {
        let mut fx = Fixture::new();
        let mut w = FrameWriter::unsolicited(EventCode::OnUssd.as_u32());
        w.write_i32(2);
        w.write_str("1");
        w.write_str("Balance: 12.50");
        fx.process(w.finish());

        let events = fx.events_drained();
        assert!(matches!(
            &events[0],
            ModemEvent::UssdReceived {
                session_active: true,
                message: Some(m)
            } if m == "Balance: 12.50"
        ));
    }
}
