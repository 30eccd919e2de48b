//! Numeric code tables of the baseband protocol.
//!
//! Requests, unsolicited events, and remote error codes are closed enums
//! with stable numeric values. Lookup from the wire returns an `Option` so
//! unknown codes can be tolerated (logged and discarded) instead of
//! desynchronizing the channel - forward compatibility with newer modems.

use serde::Serialize;

/// Size of the big-endian frame length prefix (excluded from the length).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum accepted frame payload. Anything larger is a protocol violation.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// First payload word of a solicited response.
pub const RESPONSE_SOLICITED: i32 = 0;

/// First payload word of an unsolicited event.
pub const RESPONSE_UNSOLICITED: i32 = 1;

/// Outbound request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestCode {
    GetSimStatus = 1,
    EnterSimPin = 2,
    EnterSimPuk = 3,
    GetCurrentCalls = 9,
    Dial = 10,
    GetImsi = 11,
    Hangup = 12,
    LastCallFailCause = 18,
    SignalStrength = 19,
    VoiceRegistrationState = 20,
    DataRegistrationState = 21,
    Operator = 22,
    RadioPower = 23,
    SendSms = 25,
    SetupDataCall = 27,
    SimIo = 28,
    SmsAcknowledge = 37,
    Answer = 40,
    DeactivateDataCall = 41,
    QueryNetworkSelectionMode = 45,
    SetNetworkSelectionAutomatic = 46,
    BasebandVersion = 51,
    DataCallList = 57,
    StkTerminalResponse = 70,
    SetPreferredNetworkType = 73,
    GetPreferredNetworkType = 74,
    DeviceIdentity = 98,
}

impl RequestCode {
    /// Wire value of this request code.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Look up a request code from the wire. Unknown codes return `None`.
    pub fn from_u32(value: u32) -> Option<Self> {
        use RequestCode::*;
        Some(match value {
            1 => GetSimStatus,
            2 => EnterSimPin,
            3 => EnterSimPuk,
            9 => GetCurrentCalls,
            10 => Dial,
            11 => GetImsi,
            12 => Hangup,
            18 => LastCallFailCause,
            19 => SignalStrength,
            20 => VoiceRegistrationState,
            21 => DataRegistrationState,
            22 => Operator,
            23 => RadioPower,
            25 => SendSms,
            27 => SetupDataCall,
            28 => SimIo,
            37 => SmsAcknowledge,
            40 => Answer,
            41 => DeactivateDataCall,
            45 => QueryNetworkSelectionMode,
            46 => SetNetworkSelectionAutomatic,
            51 => BasebandVersion,
            57 => DataCallList,
            70 => StkTerminalResponse,
            73 => SetPreferredNetworkType,
            74 => GetPreferredNetworkType,
            98 => DeviceIdentity,
            _ => return None,
        })
    }
}

/// Unsolicited event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventCode {
    RadioStateChanged = 1000,
    CallStateChanged = 1001,
    VoiceNetworkStateChanged = 1002,
    NewSms = 1003,
    NewSmsStatusReport = 1004,
    OnUssd = 1006,
    NitzTimeReceived = 1008,
    SignalStrength = 1009,
    DataCallListChanged = 1010,
    StkProactiveCommand = 1012,
    SimStatusChanged = 1019,
    NewBroadcastSms = 1021,
    RilConnected = 1034,
}

impl EventCode {
    /// Wire value of this event code.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Look up an event code from the wire. Unknown codes return `None`.
    pub fn from_u32(value: u32) -> Option<Self> {
        use EventCode::*;
        Some(match value {
            1000 => RadioStateChanged,
            1001 => CallStateChanged,
            1002 => VoiceNetworkStateChanged,
            1003 => NewSms,
            1004 => NewSmsStatusReport,
            1006 => OnUssd,
            1008 => NitzTimeReceived,
            1009 => SignalStrength,
            1010 => DataCallListChanged,
            1012 => StkProactiveCommand,
            1019 => SimStatusChanged,
            1021 => NewBroadcastSms,
            1034 => RilConnected,
            _ => return None,
        })
    }
}

/// Modem-reported failure in a solicited response.
///
/// This is a semantic result, not a local fault: it is surfaced verbatim to
/// the request's caller. Unknown codes are preserved in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteError {
    RadioNotAvailable,
    GenericFailure,
    PasswordIncorrect,
    SimPin2,
    SimPuk2,
    RequestNotSupported,
    Cancelled,
    SmsSendFailRetry,
    SimAbsent,
    ModeNotSupported,
    Other(u32),
}

impl RemoteError {
    /// Map a nonzero wire error code. Code `0` means success and has no
    /// `RemoteError` representation.
    pub fn from_code(code: u32) -> Option<Self> {
        use RemoteError::*;
        Some(match code {
            0 => return None,
            1 => RadioNotAvailable,
            2 => GenericFailure,
            3 => PasswordIncorrect,
            4 => SimPin2,
            5 => SimPuk2,
            6 => RequestNotSupported,
            7 => Cancelled,
            10 => SmsSendFailRetry,
            11 => SimAbsent,
            13 => ModeNotSupported,
            other => Other(other),
        })
    }
}
