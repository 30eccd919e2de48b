//! Solicited-response routing.
//!
//! Every outbound request carries a token; the matching response carries it
//! back. [`RequestRouter`] allocates tokens, remembers what each one was
//! for, and classifies inbound frames as either a solicited response (token
//! plus error code) or an unsolicited event. Requests that are one leg of a
//! longer sequence record an explicit [`Purpose`] continuation instead of a
//! callback, so pending state stays inspectable and a channel reset can
//! enumerate exactly what was dropped.

use std::collections::HashMap;

use crate::error::Result;
use crate::protocol::{
    EventCode, FrameReader, RemoteError, RequestCode, RESPONSE_SOLICITED, RESPONSE_UNSOLICITED,
};
use crate::session::sim::{EfId, IccIoStep};

/// What prompted a call-list snapshot, attached to the follow-up events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallListTrigger {
    /// Unsolicited call-state-changed event.
    StateChange,
    /// Completion of a dial request.
    DialComplete,
    /// Completion of a hangup request.
    HangupComplete,
    /// Completion of an answer request.
    AnswerComplete,
}

/// Continuation recorded with a pending request.
///
/// The response handler matches on this to decide what the round trip was a
/// step of, rather than invoking a stored closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Plain request; the response is terminal.
    None,
    /// One step of the chained SIM elementary-file fetch sequence.
    IccIo { step: IccIoStep, file: EfId },
    /// Call-list snapshot requested in reaction to `trigger`.
    CallListAfter(CallListTrigger),
    /// Fail-cause fetch chained after calls vanished from a snapshot.
    FailCauseForDisconnects,
    /// One leg of the four-part network-info accumulation.
    NetworkInfo,
}

/// A request sent on the channel, awaiting its response.
#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
    pub token: u32,
    pub code: RequestCode,
    pub purpose: Purpose,
}

/// Classification of an inbound frame past its kind discriminant.
#[derive(Debug)]
pub enum Inbound {
    /// Response to a previously sent request. `error` is `None` on success.
    Solicited {
        token: u32,
        error: Option<RemoteError>,
    },
    /// Spontaneous event from the baseband.
    Unsolicited(EventCode),
}

/// Token allocator and pending-request table.
pub struct RequestRouter {
    next_token: u32,
    pending: HashMap<u32, PendingRequest>,
}

impl RequestRouter {
    pub fn new() -> Self {
        Self {
            next_token: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next request token. Monotonic, wrapping, never zero.
    pub fn next_token(&mut self) -> u32 {
        let token = self.next_token;
        self.next_token = self.next_token.checked_add(1).unwrap_or(1);
        token
    }

    /// Record a request awaiting its response.
    pub fn register(&mut self, token: u32, code: RequestCode, purpose: Purpose) {
        if let Some(prev) = self.pending.insert(
            token,
            PendingRequest {
                token,
                code,
                purpose,
            },
        ) {
            tracing::warn!(token, code = ?prev.code, "token reused while still pending");
        }
    }

    /// Number of requests in flight.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Resolve a response token. A token with no pending entry (spurious or
    /// duplicate response) is logged and dropped, not an error.
    pub fn complete(&mut self, token: u32) -> Option<PendingRequest> {
        let entry = self.pending.remove(&token);
        if entry.is_none() {
            tracing::warn!(token, "response for unknown token dropped");
        }
        entry
    }

    /// Read the kind discriminant and the response/event header.
    ///
    /// Returns `Ok(None)` for frames that are recognized as well-formed but
    /// carry a code this driver does not handle; those are logged and the
    /// caller discards the remainder.
    pub fn classify(&self, reader: &mut FrameReader<'_>) -> Result<Option<Inbound>> {
        let kind = reader.read_i32()?;
        match kind {
            RESPONSE_SOLICITED => {
                let token = reader.read_u32()?;
                let error = RemoteError::from_code(reader.read_u32()?);
                Ok(Some(Inbound::Solicited { token, error }))
            }
            RESPONSE_UNSOLICITED => {
                let raw = reader.read_u32()?;
                match EventCode::from_u32(raw) {
                    Some(code) => Ok(Some(Inbound::Unsolicited(code))),
                    None => {
                        tracing::debug!(code = raw, "unknown unsolicited event discarded");
                        Ok(None)
                    }
                }
            }
            other => {
                tracing::warn!(kind = other, "unknown frame kind discarded");
                Ok(None)
            }
        }
    }

    /// Invalidate every pending request at a channel boundary, returning
    /// them so the caller can surface failures for each.
    pub fn reset(&mut self) -> Vec<PendingRequest> {
        let mut drained: Vec<PendingRequest> = self.pending.drain().map(|(_, p)| p).collect();
        drained.sort_by_key(|p| p.token);
        drained
    }
}

impl Default for RequestRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameBuffer, FrameWriter};

    #[test]
    fn test_tokens_are_unique_and_nonzero() {
        let mut router = RequestRouter::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let token = router.next_token();
            assert_ne!(token, 0);
            assert!(seen.insert(token));
        }
    }

    #[test]
    fn test_token_wrap_skips_zero() {
        let mut router = RequestRouter::new();
        router.next_token = u32::MAX;
        assert_eq!(router.next_token(), u32::MAX);
        assert_eq!(router.next_token(), 1);
    }

    #[test]
    fn test_complete_returns_registered_entry() {
        let mut router = RequestRouter::new();
        let token = router.next_token();
        router.register(token, RequestCode::GetImsi, Purpose::None);

        let entry = router.complete(token).unwrap();
        assert_eq!(entry.code, RequestCode::GetImsi);
        assert!(router.complete(token).is_none());
    }

    #[test]
    fn test_unknown_token_is_dropped() {
        let mut router = RequestRouter::new();
        assert!(router.complete(999).is_none());
    }

    #[test]
    fn test_reset_drains_all_pending() {
        let mut router = RequestRouter::new();
        for _ in 0..3 {
            let token = router.next_token();
            router.register(token, RequestCode::Dial, Purpose::None);
        }
        let drained = router.reset();
        assert_eq!(drained.len(), 3);
        assert_eq!(router.pending_count(), 0);
        assert_eq!(
            drained.iter().map(|p| p.token).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    fn classify_frame(frame: bytes::Bytes) -> Option<Inbound> {
        let router = RequestRouter::new();
        let mut buffer = FrameBuffer::new();
        buffer.feed(&frame);
        let mut reader = buffer.try_extract_frame().unwrap().unwrap();
        let result = router.classify(&mut reader).unwrap();
        reader.discard_remaining();
        result
    }

    #[test]
    fn test_classify_solicited() {
        let frame = FrameWriter::solicited(42, 0).finish();
        match classify_frame(frame) {
            Some(Inbound::Solicited { token, error }) => {
                assert_eq!(token, 42);
                assert!(error.is_none());
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_solicited_error() {
        let frame = FrameWriter::solicited(7, 3).finish();
        match classify_frame(frame) {
            Some(Inbound::Solicited { token, error }) => {
                assert_eq!(token, 7);
                assert_eq!(error, Some(RemoteError::PasswordIncorrect));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unsolicited() {
        let frame = FrameWriter::unsolicited(EventCode::NitzTimeReceived.as_u32()).finish();
        match classify_frame(frame) {
            Some(Inbound::Unsolicited(code)) => assert_eq!(code, EventCode::NitzTimeReceived),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_code_discarded() {
        let frame = FrameWriter::unsolicited(0xDEAD_BEEF).finish();
        assert!(classify_frame(frame).is_none());

        let mut w = FrameWriter::unsolicited(0);
        w.write_i32(5); // overwrite nothing; just pad an odd kind frame
        let mut bytes = w.finish().to_vec();
        // Corrupt the kind discriminant.
        bytes[4..8].copy_from_slice(&9i32.to_le_bytes());
        assert!(classify_frame(bytes::Bytes::from(bytes)).is_none());
    }
}
