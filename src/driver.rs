//! The synchronous protocol engine.
//!
//! [`Driver`] ties the pieces together: raw transport bytes go in through
//! [`Driver::process`], decoded state changes come out on the event bus,
//! and frames to send accumulate in an outbound queue the transport layer
//! drains. The driver itself never touches a socket, which keeps every
//! protocol rule testable with plain byte slices.
//!
//! # Example
//!
//! ```
//! use modemwire::{Driver, EventBus};
//!
//! let (bus, mut events) = EventBus::new();
//! let mut driver = Driver::new(bus);
//!
//! driver.radio_power(true);
//! for frame in driver.take_outbound() {
//!     // hand to the transport
//!     let _ = frame;
//! }
//! ```

use std::collections::VecDeque;

use bytes::Bytes;

use crate::bus::EventBus;
use crate::error::Result;
use crate::protocol::{FrameBuffer, RequestCode};
use crate::router::{CallListTrigger, Inbound, Purpose, RequestRouter};
use crate::session::{sms, stk, Outbox, Session, SessionState};

pub struct Driver {
    buffer: FrameBuffer,
    router: RequestRouter,
    session: Session,
    outbound: VecDeque<Bytes>,
}

impl Driver {
    pub fn new(bus: EventBus) -> Self {
        Self {
            buffer: FrameBuffer::new(),
            router: RequestRouter::new(),
            session: Session::new(bus),
            outbound: VecDeque::new(),
        }
    }

    /// Everything currently known about the channel.
    #[inline]
    pub fn state(&self) -> &SessionState {
        &self.session.state
    }

    /// Number of requests awaiting a response.
    #[inline]
    pub fn pending_requests(&self) -> usize {
        self.router.pending_count()
    }

    /// Take every frame queued for the transport, in send order.
    pub fn take_outbound(&mut self) -> Vec<Bytes> {
        self.outbound.drain(..).collect()
    }

    /// Feed raw transport bytes and run every complete frame through
    /// classification and dispatch.
    ///
    /// Arbitrary chunking is fine; partial frames wait in the buffer. A
    /// handler error affects only its own frame: the reader realigns to
    /// the frame boundary and processing continues with the next one. An
    /// invalid length prefix means the stream itself is corrupt, so the
    /// buffered input is dropped wholesale.
    pub fn process(&mut self, bytes: &[u8]) {
        self.buffer.feed(bytes);
        let mut corrupt = false;
        loop {
            let mut reader = match self.buffer.try_extract_frame() {
                Ok(Some(reader)) => reader,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(error = %err, "corrupt stream; dropping buffered input");
                    corrupt = true;
                    break;
                }
            };
            let inbound = match self.router.classify(&mut reader) {
                Ok(Some(inbound)) => inbound,
                Ok(None) => {
                    reader.discard_remaining();
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "unreadable frame header");
                    reader.discard_remaining();
                    continue;
                }
            };

            let mut outbox = Outbox {
                router: &mut self.router,
                queue: &mut self.outbound,
            };
            match inbound {
                Inbound::Solicited { token, error } => {
                    match outbox.router.complete(token) {
                        Some(pending) => {
                            if let Err(err) =
                                self.session
                                    .on_solicited(pending, error, &mut reader, &mut outbox)
                            {
                                tracing::warn!(
                                    token,
                                    code = ?pending.code,
                                    error = %err,
                                    "response handler failed"
                                );
                            }
                        }
                        None => reader.discard_remaining(),
                    }
                }
                Inbound::Unsolicited(code) => {
                    if let Err(err) = self.session.on_unsolicited(code, &mut reader, &mut outbox)
                    {
                        tracing::warn!(event = ?code, error = %err, "event handler failed");
                    }
                }
            }
            drop(reader);
            self.session.drain_deferred();
        }
        if corrupt {
            self.buffer.clear();
        }
    }

    fn outbox(&mut self) -> Outbox<'_> {
        Outbox {
            router: &mut self.router,
            queue: &mut self.outbound,
        }
    }

    // --- requests -----------------------------------------------------------

    /// Power the radio on or off. Returns the request token.
    pub fn radio_power(&mut self, on: bool) -> u32 {
        let (token, mut frame) = self.outbox().begin(RequestCode::RadioPower, Purpose::None);
        frame.write_i32(1);
        frame.write_i32(if on { 1 } else { 0 });
        self.outbound.push_back(frame.finish());
        token
    }

    pub fn get_sim_status(&mut self) -> u32 {
        self.outbox()
            .send_empty(RequestCode::GetSimStatus, Purpose::None)
    }

    /// Unlock the card with its PIN. The result arrives as a `PinResult`
    /// event carrying this token.
    pub fn enter_pin(&mut self, pin: &str) -> u32 {
        self.secret_request(RequestCode::EnterSimPin, &[pin])
    }

    /// Unlock a PUK-blocked card, setting a new PIN.
    pub fn enter_puk(&mut self, puk: &str, new_pin: &str) -> u32 {
        self.secret_request(RequestCode::EnterSimPuk, &[puk, new_pin])
    }

    fn secret_request(&mut self, code: RequestCode, fields: &[&str]) -> u32 {
        let legacy = self.session.state.quirks.legacy_wire_layout;
        let aid = self.session.state.first_aid();
        let (token, mut frame) = self.outbox().begin(code, Purpose::None);
        let count = fields.len() as i32 + if legacy { 0 } else { 1 };
        frame.write_i32(count);
        for field in fields {
            frame.write_str(field);
        }
        if !legacy {
            frame.write_string16(aid.as_deref());
        }
        self.outbound.push_back(frame.finish());
        token
    }

    /// Place a voice call. Completion triggers a call-list snapshot whose
    /// diff produces the `CallChanged` events.
    pub fn dial(&mut self, number: &str) -> u32 {
        let (token, mut frame) = self.outbox().begin(
            RequestCode::Dial,
            Purpose::CallListAfter(CallListTrigger::DialComplete),
        );
        frame.write_str(number);
        frame.write_i32(0); // CLIR: subscription default
        frame.write_i32(0); // no user-to-user payload
        self.outbound.push_back(frame.finish());
        token
    }

    /// Hang up the call at `index`.
    pub fn hangup(&mut self, index: u32) -> u32 {
        let (token, mut frame) = self.outbox().begin(
            RequestCode::Hangup,
            Purpose::CallListAfter(CallListTrigger::HangupComplete),
        );
        frame.write_i32(1);
        frame.write_u32(index);
        self.outbound.push_back(frame.finish());
        token
    }

    /// Answer the ringing call.
    pub fn answer(&mut self) -> u32 {
        self.outbox().send_empty(
            RequestCode::Answer,
            Purpose::CallListAfter(CallListTrigger::AnswerComplete),
        )
    }

    /// Request a fresh call-list snapshot.
    pub fn get_current_calls(&mut self) -> u32 {
        self.outbox().send_empty(
            RequestCode::GetCurrentCalls,
            Purpose::CallListAfter(CallListTrigger::StateChange),
        )
    }

    /// Send a text message, splitting into concatenated segments when it
    /// exceeds a single PDU. Returns one token per segment; each completes
    /// with its own `SendSmsResult` event.
    pub fn send_sms(&mut self, destination: &str, body: &str) -> Result<Vec<u32>> {
        let reference = self.session.next_concat_ref();
        let pdus = sms::encode_submit(destination, body, reference)?;
        let mut tokens = Vec::with_capacity(pdus.len());
        for pdu in pdus {
            let hex = crate::codec::bcd::to_hex(&pdu);
            let (token, mut frame) = self.outbox().begin(RequestCode::SendSms, Purpose::None);
            frame.write_i32(2);
            frame.write_string16(None); // service centre: card default
            frame.write_str(&hex);
            self.outbound.push_back(frame.finish());
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Bring up a data context on `apn`.
    pub fn setup_data_call(&mut self, apn: &str, username: &str, password: &str) -> u32 {
        let (token, mut frame) = self
            .outbox()
            .begin(RequestCode::SetupDataCall, Purpose::None);
        frame.write_i32(7);
        frame.write_str("1"); // radio technology: default bearer
        frame.write_str("0"); // data profile: default
        frame.write_str(apn);
        frame.write_str(username);
        frame.write_str(password);
        frame.write_str("3"); // auth: PAP or CHAP as the network asks
        frame.write_str("IP");
        self.outbound.push_back(frame.finish());
        token
    }

    /// Tear down the data context `context_id`. Success refreshes the
    /// data-call list.
    pub fn deactivate_data_call(&mut self, context_id: u32) -> u32 {
        let (token, mut frame) = self
            .outbox()
            .begin(RequestCode::DeactivateDataCall, Purpose::None);
        frame.write_i32(2);
        frame.write_str(&context_id.to_string());
        frame.write_str("0"); // reason: no specific cause
        self.outbound.push_back(frame.finish());
        token
    }

    pub fn get_data_call_list(&mut self) -> u32 {
        self.outbox()
            .send_empty(RequestCode::DataCallList, Purpose::None)
    }

    /// Refresh registration, operator, and selection-mode state. The
    /// combined result arrives as one `NetworkInfoChanged` event.
    pub fn get_network_info(&mut self) {
        let mut outbox = Outbox {
            router: &mut self.router,
            queue: &mut self.outbound,
        };
        self.session.begin_network_info(&mut outbox);
    }

    pub fn select_network_automatic(&mut self) -> u32 {
        self.outbox()
            .send_empty(RequestCode::SetNetworkSelectionAutomatic, Purpose::None)
    }

    /// Set the preferred network technology. Remembered and reapplied when
    /// the radio cycles back to ready.
    pub fn set_preferred_network_type(&mut self, kind: u32) -> u32 {
        self.session.state.preferred_network_type = Some(kind);
        let (token, mut frame) = self
            .outbox()
            .begin(RequestCode::SetPreferredNetworkType, Purpose::None);
        frame.write_i32(1);
        frame.write_u32(kind);
        self.outbound.push_back(frame.finish());
        token
    }

    /// Answer a proactive card command.
    pub fn stk_terminal_response(
        &mut self,
        command: &stk::CommandDetails,
        result: u8,
        input: Option<&str>,
    ) -> Result<u32> {
        let payload = stk::encode_terminal_response(command, result, input)?;
        let hex = crate::codec::bcd::to_hex(&payload);
        let (token, mut frame) = self
            .outbox()
            .begin(RequestCode::StkTerminalResponse, Purpose::None);
        frame.write_str(&hex);
        self.outbound.push_back(frame.finish());
        Ok(token)
    }

    pub fn get_device_identity(&mut self) -> u32 {
        self.outbox()
            .send_empty(RequestCode::DeviceIdentity, Purpose::None)
    }
}
