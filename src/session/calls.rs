//! Call-list reconciliation.
//!
//! Individual call notifications from the modem are unreliable: deltas go
//! missing and arrive twice. Instead of trusting them, every call-related
//! trigger fetches the full current call list and diffs it against the
//! book. Calls that vanished are parked until a chained fail-cause fetch
//! attaches a reason, then reported as disconnected.

use std::collections::HashMap;

use crate::bus::ModemEvent;
use crate::error::Result;
use crate::protocol::{FrameReader, RemoteError, RequestCode};
use crate::router::{CallListTrigger, PendingRequest, Purpose};
use crate::session::state::{Call, CallState};
use crate::session::{Outbox, Session};

/// Parse one call-list snapshot. The modern layout appends supplementary
/// user-to-user info that legacy basebands do not send.
fn parse_call_list(reader: &mut FrameReader<'_>, legacy: bool) -> Result<Vec<Call>> {
    let count = reader.read_i32()?;
    if count < 0 {
        return Err(crate::error::Error::decode(format!(
            "negative call count {count}"
        )));
    }
    let mut calls = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let state = CallState::from_wire(reader.read_u32()?)?;
        let index = reader.read_u32()?;
        let _toa = reader.read_i32()?;
        let is_multiparty = reader.read_i32()? != 0;
        let is_mt = reader.read_i32()? != 0;
        let _als = reader.read_i32()?;
        let is_voice = reader.read_i32()? != 0;
        let _is_voice_privacy = reader.read_i32()?;
        let number = reader.read_string16()?;
        let _number_presentation = reader.read_i32()?;
        let name = reader.read_string16()?;
        let _name_presentation = reader.read_i32()?;
        if !legacy {
            let uus_count = reader.read_i32()?;
            for _ in 0..uus_count {
                // type, dcs, data
                reader.read_i32()?;
                reader.read_i32()?;
                reader.read_byte_array()?;
            }
        }
        calls.push(Call {
            index,
            state,
            number,
            name,
            is_mt,
            is_multiparty,
            is_voice,
        });
    }
    Ok(calls)
}

impl Session {
    /// Snapshot the call list; the response reconciles the book.
    pub(crate) fn request_call_list(&mut self, trigger: CallListTrigger, outbox: &mut Outbox<'_>) {
        outbox.send_empty(
            RequestCode::GetCurrentCalls,
            Purpose::CallListAfter(trigger),
        );
    }

    /// A call-control action finished. Whatever the outcome, the call list
    /// may have moved; fetch a snapshot.
    pub(crate) fn on_call_action(
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
        }
        let trigger = match pending.code {
            RequestCode::Dial => CallListTrigger::DialComplete,
            RequestCode::Hangup => CallListTrigger::HangupComplete,
            _ => CallListTrigger::AnswerComplete,
        };
        self.request_call_list(trigger, outbox);
        Ok(())
    }

    pub(crate) fn on_call_list(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
        outbox: &mut Outbox<'_>,
    ) -> Result<()> {
        if let Some(error) = error {
            tracing::warn!(token = pending.token, ?error, "call list fetch failed");
            return Ok(());
        }
        let snapshot = parse_call_list(reader, self.state.quirks.legacy_wire_layout)?;
        self.reconcile_calls(snapshot, outbox);
        Ok(())
    }

    /// Diff a snapshot against the book: new and state-changed calls are
    /// announced now, vanished calls after their fail cause arrives.
    fn reconcile_calls(&mut self, snapshot: Vec<Call>, outbox: &mut Outbox<'_>) {
        let mut previous: HashMap<u32, Call> = std::mem::take(&mut self.state.active_calls);

        for call in snapshot {
            let changed = match previous.remove(&call.index) {
                None => true,
                Some(old) => old.state != call.state,
            };
            if changed {
                self.emit(ModemEvent::CallChanged { call: call.clone() });
            }
            self.state.active_calls.insert(call.index, call);
        }

        if previous.is_empty() {
            return;
        }
        // Everything left in `previous` vanished. One fail-cause round
        // trip covers the batch; the cause applies to all of them.
        let fetch_needed = self.state.pending_disconnects.is_empty();
        let mut vanished: Vec<Call> = previous.into_values().collect();
        vanished.sort_by_key(|call| call.index);
        self.state.pending_disconnects.extend(vanished);
        if fetch_needed {
            outbox.send_empty(
                RequestCode::LastCallFailCause,
                Purpose::FailCauseForDisconnects,
            );
        }
    }

    pub(crate) fn on_fail_cause(
        &mut self,
        pending: PendingRequest,
        error: Option<RemoteError>,
        reader: &mut FrameReader<'_>,
    ) -> Result<()> {
        let _ = pending;
        let fail_cause = if error.is_none() && reader.remaining() >= 8 {
            let _count = reader.read_i32()?;
            Some(reader.read_u32()?)
        } else {
            None
        };
        for call in std::mem::take(&mut self.state.pending_disconnects) {
            self.emit(ModemEvent::CallDisconnected { call, fail_cause });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventCode, FrameWriter};
    use crate::session::tests::Fixture;

    fn write_call(w: &mut FrameWriter, index: u32, state: u32, number: &str) {
        w.write_u32(state);
        w.write_u32(index);
        w.write_i32(0x81); // toa
        w.write_i32(0); // multiparty
        w.write_i32(0); // mt
        w.write_i32(0); // als
        w.write_i32(1); // voice
        w.write_i32(0); // voice privacy
        w.write_string16(Some(number));
        w.write_i32(0); // number presentation
        w.write_string16(None); // name
        w.write_i32(0); // name presentation
        w.write_i32(0); // no uus records
    }

    fn call_list_frame(token: u32, calls: &[(u32, u32, &str)]) -> bytes::Bytes {
        let mut w = FrameWriter::solicited(token, 0);
        w.write_i32(calls.len() as i32);
        for &(index, state, number) in calls {
            write_call(&mut w, index, state, number);
        }
        w.finish()
    }

    fn register_call_list(fx: &mut Fixture) -> u32 {
        let token = fx.router.next_token();
        fx.router.register(
            token,
            RequestCode::GetCurrentCalls,
            Purpose::CallListAfter(CallListTrigger::StateChange),
        );
        token
    }

    #[test]
    fn test_initial_snapshot_announces_every_call() {
        let mut fx = Fixture::new();
        let token = register_call_list(&mut fx);
        fx.process(call_list_frame(token, &[(1, 0, "555"), (2, 4, "556")]));

        let events = fx.events_drained();
        assert_eq!(events.len(), 2);
        assert_eq!(fx.session.state.active_calls.len(), 2);
        assert_eq!(
            fx.session.state.active_calls[&2].state,
            CallState::Incoming
        );
    }

    #[test]
    fn test_diff_emits_exactly_the_changes() {
        let mut fx = Fixture::new();
        let token = register_call_list(&mut fx);
        fx.process(call_list_frame(token, &[(1, 0, "555"), (2, 4, "556")]));
        fx.events_drained();
        fx.queue.clear();

        // {1: Active, 2: Incoming} -> {1: Active, 3: Dialing}
        let token = register_call_list(&mut fx);
        fx.process(call_list_frame(token, &[(1, 0, "555"), (3, 2, "557")]));

        let events = fx.events_drained();
        assert_eq!(events.len(), 1, "only the new call is announced now");
        assert!(matches!(
            &events[0],
            ModemEvent::CallChanged { call } if call.index == 3 && call.state == CallState::Dialing
        ));

        // The vanished call waits for the fail cause.
        assert_eq!(fx.session.state.pending_disconnects.len(), 1);
        assert_eq!(
            fx.queued_codes(),
            vec![RequestCode::LastCallFailCause.as_u32()]
        );

        // Fail cause arrives: 16 = normal clearing.
        let cause_token = fx.queue.pop_front().map(|f| {
            u32::from_le_bytes([f[8], f[9], f[10], f[11]])
        });
        let mut w = FrameWriter::solicited(cause_token.unwrap(), 0);
        w.write_i32(1);
        w.write_u32(16);
        fx.process(w.finish());

        let events = fx.events_drained();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ModemEvent::CallDisconnected { call, fail_cause: Some(16) } if call.index == 2
        ));
        assert!(fx.session.state.pending_disconnects.is_empty());
    }

    #[test]
    fn test_state_change_within_same_index() {
        let mut fx = Fixture::new();
        let token = register_call_list(&mut fx);
        fx.process(call_list_frame(token, &[(1, 2, "555")])); // dialing
        fx.events_drained();

        let token = register_call_list(&mut fx);
        fx.process(call_list_frame(token, &[(1, 0, "555")])); // active

        let events = fx.events_drained();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ModemEvent::CallChanged { call } if call.state == CallState::Active
        ));
    }

    #[test]
    fn test_call_action_triggers_snapshot() {
        let mut fx = Fixture::new();
        let token = fx.router.next_token();
        fx.router.register(token, RequestCode::Dial, Purpose::None);
        fx.process(FrameWriter::solicited(token, 0).finish());

        assert_eq!(
            fx.queued_codes(),
            vec![RequestCode::GetCurrentCalls.as_u32()]
        );
    }

    #[test]
    fn test_unsolicited_call_state_change_triggers_snapshot() {
        let mut fx = Fixture::new();
        fx.process(FrameWriter::unsolicited(EventCode::CallStateChanged.as_u32()).finish());
        assert_eq!(
            fx.queued_codes(),
            vec![RequestCode::GetCurrentCalls.as_u32()]
        );
    }

    #[test]
    fn test_legacy_layout_has_no_uus_field() {
        let mut fx = Fixture::new();
        fx.session.state.quirks.legacy_wire_layout = true;

        let token = register_call_list(&mut fx);
        let mut w = FrameWriter::solicited(token, 0);
        w.write_i32(1);
        // Same record minus the trailing uus count.
        w.write_u32(4);
        w.write_u32(1);
        w.write_i32(0x81);
        w.write_i32(0);
        w.write_i32(1);
        w.write_i32(0);
        w.write_i32(1);
        w.write_i32(0);
        w.write_string16(Some("555"));
        w.write_i32(0);
        w.write_string16(None);
        w.write_i32(0);
        fx.process(w.finish());

        let events = fx.events_drained();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ModemEvent::CallChanged { call } if call.is_mt && call.state == CallState::Incoming
        ));
    }
}
