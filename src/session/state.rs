//! Session state and the domain types it tracks.
//!
//! One `SessionState` exists per channel, owned by its driver and mutated
//! only from the single frame-processing context. Everything here is plain
//! data; the transition logic lives in the sibling handler modules.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};

/// Radio power state, driven by the radio-state-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RadioState {
    /// Modem process not responding or not yet attached.
    Unavailable,
    Off,
    Ready,
}

impl RadioState {
    /// Map the wire value. Legacy basebands report SIM sub-states in the
    /// radio state field; all of those imply a powered radio.
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => RadioState::Off,
            1 => RadioState::Unavailable,
            _ => RadioState::Ready,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CardState {
    Absent,
    Present,
    Error,
}

impl CardState {
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CardState::Absent),
            1 => Ok(CardState::Present),
            2 => Ok(CardState::Error),
            other => Err(Error::decode(format!("unknown card state {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AppType {
    Unknown,
    Sim,
    Usim,
    Ruim,
    Csim,
    Isim,
}

impl AppType {
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => AppType::Sim,
            2 => AppType::Usim,
            3 => AppType::Ruim,
            4 => AppType::Csim,
            5 => AppType::Isim,
            _ => AppType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AppState {
    Unknown,
    Detected,
    Pin,
    Puk,
    SubscriptionPersonalization,
    Ready,
}

impl AppState {
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => AppState::Detected,
            2 => AppState::Pin,
            3 => AppState::Puk,
            4 => AppState::SubscriptionPersonalization,
            5 => AppState::Ready,
            _ => AppState::Unknown,
        }
    }
}

/// One application on the card, as reported by the SIM status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimApplication {
    pub app_type: AppType,
    pub app_state: AppState,
    pub aid: Option<String>,
}

/// Card-level status plus the applications present on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimStatus {
    pub card_state: CardState,
    pub applications: Vec<SimApplication>,
}

/// High-level SIM readiness derived from [`SimStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SimState {
    Absent,
    PinRequired,
    PukRequired,
    NetworkLocked,
    NotReady,
    Ready,
}

impl SimStatus {
    /// Collapse the card/application matrix into one readiness value. The
    /// first telephony application decides.
    pub fn sim_state(&self) -> SimState {
        match self.card_state {
            CardState::Absent | CardState::Error => return SimState::Absent,
            CardState::Present => {}
        }
        match self.applications.first().map(|app| app.app_state) {
            Some(AppState::Pin) => SimState::PinRequired,
            Some(AppState::Puk) => SimState::PukRequired,
            Some(AppState::SubscriptionPersonalization) => SimState::NetworkLocked,
            Some(AppState::Ready) => SimState::Ready,
            _ => SimState::NotReady,
        }
    }

    /// AID of the first application, used as the PIN/ICC-I/O parameter on
    /// modern layouts.
    pub fn first_aid(&self) -> Option<&str> {
        self.applications.first().and_then(|app| app.aid.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallState {
    Active,
    Holding,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
}

impl CallState {
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CallState::Active),
            1 => Ok(CallState::Holding),
            2 => Ok(CallState::Dialing),
            3 => Ok(CallState::Alerting),
            4 => Ok(CallState::Incoming),
            5 => Ok(CallState::Waiting),
            other => Err(Error::decode(format!("unknown call state {other}"))),
        }
    }
}

/// One live call as reported by a call-list snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub index: u32,
    pub state: CallState,
    pub number: Option<String>,
    pub name: Option<String>,
    /// Mobile-terminated: true for incoming calls.
    pub is_mt: bool,
    pub is_multiparty: bool,
    pub is_voice: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DataCallState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// One packet-data context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCall {
    pub context_id: u32,
    pub state: DataCallState,
    pub apn: Option<String>,
    pub interface: Option<String>,
    pub addresses: Vec<String>,
    pub dnses: Vec<String>,
    pub gateways: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RegStatus {
    NotRegistered,
    Registered,
    Searching,
    Denied,
    Unknown,
    RegisteredRoaming,
}

impl RegStatus {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => RegStatus::NotRegistered,
            1 => RegStatus::Registered,
            2 => RegStatus::Searching,
            3 => RegStatus::Denied,
            5 => RegStatus::RegisteredRoaming,
            _ => RegStatus::Unknown,
        }
    }
}

/// Voice or data registration, one half-row of the network info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    pub status: RegStatus,
    pub radio_tech: u32,
    pub lac: Option<u32>,
    pub cid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorInfo {
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub numeric: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionMode {
    Automatic,
    Manual,
}

/// Combined network picture, emitted as one event once all four
/// constituent round trips have answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub voice_registration: Option<RegistrationInfo>,
    pub data_registration: Option<RegistrationInfo>,
    pub operator: Option<OperatorInfo>,
    pub selection_mode: Option<SelectionMode>,
}

/// Tracks which of the four network-info round trips have answered.
#[derive(Debug, Default)]
pub struct PendingNetworkInfo {
    pub info: NetworkInfo,
    pub voice_received: bool,
    pub data_received: bool,
    pub operator_received: bool,
    pub selection_received: bool,
}

impl PendingNetworkInfo {
    pub fn is_complete(&self) -> bool {
        self.voice_received && self.data_received && self.operator_received && self.selection_received
    }
}

/// Identity and subscriber records learned from the card and the modem.
/// Survives radio power cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IccInfo {
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub spn: Option<String>,
    pub msisdn: Option<String>,
}

/// Protocol-version-dependent wire layout variations, learned at runtime
/// from the connected event. Never a compile-time constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quirks {
    /// Protocol version < 5: no AID parameter on PIN/PUK entry and ICC
    /// I/O, and the short data-call record shape.
    pub legacy_wire_layout: bool,
}

/// Everything the driver remembers about one channel.
///
/// Owned by a single driver instance. Never shared, never locked.
#[derive(Debug, Default)]
pub struct SessionState {
    pub radio_state: Option<RadioState>,
    pub sim_status: Option<SimStatus>,
    pub icc: IccInfo,
    /// Raw service table bitmap from the card, when provisioned.
    pub service_table: Option<Vec<u8>>,
    pub imei: Option<String>,
    pub baseband_version: Option<String>,
    pub active_calls: HashMap<u32, Call>,
    pub active_data_calls: HashMap<u32, DataCall>,
    pub network: NetworkInfo,
    pub pending_network: Option<PendingNetworkInfo>,
    /// Calls that vanished from a snapshot, parked until the chained
    /// fail-cause round trip attaches a reason.
    pub pending_disconnects: Vec<Call>,
    pub preferred_network_type: Option<u32>,
    pub quirks: Quirks,
    /// Protocol version from the connected event; `Some` after the first
    /// connection.
    pub protocol_version: Option<u32>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop call and data-call books when the radio leaves `Ready`.
    /// ICC-derived identity persists across radio resets.
    pub fn clear_ephemeral(&mut self) {
        self.active_calls.clear();
        self.active_data_calls.clear();
        self.pending_disconnects.clear();
        self.pending_network = None;
    }

    pub fn sim_state(&self) -> SimState {
        self.sim_status
            .as_ref()
            .map(|s| s.sim_state())
            .unwrap_or(SimState::Absent)
    }

    pub fn first_aid(&self) -> Option<String> {
        self.sim_status
            .as_ref()
            .and_then(|s| s.first_aid())
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_state_mapping() {
        assert_eq!(RadioState::from_wire(0), RadioState::Off);
        assert_eq!(RadioState::from_wire(1), RadioState::Unavailable);
        assert_eq!(RadioState::from_wire(10), RadioState::Ready);
        assert_eq!(RadioState::from_wire(2), RadioState::Ready);
    }

    #[test]
    fn test_sim_state_derivation() {
        let mut status = SimStatus {
            card_state: CardState::Absent,
            applications: vec![],
        };
        assert_eq!(status.sim_state(), SimState::Absent);

        status.card_state = CardState::Present;
        assert_eq!(status.sim_state(), SimState::NotReady);

        status.applications.push(SimApplication {
            app_type: AppType::Usim,
            app_state: AppState::Pin,
            aid: Some("a0000000871002".into()),
        });
        assert_eq!(status.sim_state(), SimState::PinRequired);

        status.applications[0].app_state = AppState::Ready;
        assert_eq!(status.sim_state(), SimState::Ready);
    }

    #[test]
    fn test_clear_ephemeral_keeps_identity() {
        let mut state = SessionState::new();
        state.icc.imsi = Some("310150123456789".into());
        state.imei = Some("490154203237518".into());
        state.active_calls.insert(
            1,
            Call {
                index: 1,
                state: CallState::Active,
                number: None,
                name: None,
                is_mt: false,
                is_multiparty: false,
                is_voice: true,
            },
        );

        state.clear_ephemeral();
        assert!(state.active_calls.is_empty());
        assert!(state.icc.imsi.is_some());
        assert!(state.imei.is_some());
    }
}
