//! Outbound event bus.
//!
//! Every fully decoded occurrence leaves the driver as one [`ModemEvent`]
//! on an unbounded channel owned by the telephony service. Events are
//! serde-serializable tagged values so the owner can forward them across
//! its own process boundary unchanged.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::{RemoteError, RequestCode};
use crate::session::sms::{SmsDeliver, StatusReport};
use crate::session::state::{
    Call, CardState, DataCall, IccInfo, NetworkInfo, RadioState, SimApplication, SimState,
};
use crate::session::stk::ProactiveCommand;

/// One decoded occurrence on the channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ModemEvent {
    RadioStateChanged {
        state: RadioState,
    },
    /// First (or renewed) contact with the modem process.
    Connected {
        version: u32,
    },
    SimStatusChanged {
        card_state: CardState,
        sim_state: SimState,
        applications: Vec<SimApplication>,
    },
    /// A subscriber record (ICCID, IMSI, SPN, MSISDN) was learned or
    /// changed; carries the full current set.
    IccInfoChanged {
        info: IccInfo,
    },
    DeviceIdentityChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        imei: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        baseband_version: Option<String>,
    },
    /// A call appeared or changed state in a call-list snapshot.
    CallChanged {
        call: Call,
    },
    /// A call vanished from a snapshot; `fail_cause` is the reason code
    /// fetched in the chained round trip, when one was obtainable.
    CallDisconnected {
        call: Call,
        #[serde(skip_serializing_if = "Option::is_none")]
        fail_cause: Option<u32>,
    },
    DataCallListChanged {
        calls: Vec<DataCall>,
    },
    DataCallSetupResult {
        token: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        call: Option<DataCall>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    /// PIN or PUK entry outcome. `retry_count` is `-1` when the modem did
    /// not report one.
    PinResult {
        token: u32,
        retry_count: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    SendSmsResult {
        token: u32,
        message_ref: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    SmsReceived {
        message: SmsDeliver,
    },
    SmsStatusReport {
        report: StatusReport,
    },
    /// All pages of a cell broadcast assembled into one body.
    CellBroadcastReceived {
        message_id: u16,
        serial: u16,
        total_pages: u8,
        body: String,
    },
    NetworkInfoChanged {
        info: NetworkInfo,
    },
    SignalStrengthChanged {
        signal_strength: u32,
        bit_error_rate: u32,
    },
    UssdReceived {
        session_active: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    NitzTimeReceived {
        time: String,
    },
    StkCommand {
        command: ProactiveCommand,
    },
    /// A plain request completed with a modem-reported failure and has no
    /// richer result event of its own.
    RequestFailed {
        token: u32,
        code: RequestCode,
        error: RemoteError,
    },
    /// A request was invalidated by a channel reset before its response
    /// arrived.
    RequestCancelled {
        token: u32,
        code: RequestCode,
    },
}

/// Sender half handed to the driver; the telephony service keeps the
/// receiver.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<ModemEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ModemEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver one event. A dropped receiver is logged, never propagated;
    /// the session keeps running for its side effects.
    pub fn emit(&self, event: ModemEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("event receiver dropped; event discarded");
        }
    }
}
