//! Events emitted by the EVSE cluster

use super::types::{EnergyTransferStoppedReason, FaultState, State};
use serde::Serialize;

/// Cluster event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EvseEvent {
    EvConnected {
        session_id: u32,
    },
    EvNotDetected {
        session_id: u32,
        state: State,
        session_duration: u32,
        session_energy_charged: i64,
        session_energy_discharged: Option<i64>,
    },
    EnergyTransferStarted {
        session_id: u32,
        state: State,
        maximum_current: i64,
        maximum_discharge_current: Option<i64>,
    },
    EnergyTransferStopped {
        session_id: u32,
        state: State,
        reason: EnergyTransferStoppedReason,
        energy_transferred: i64,
        energy_discharged: Option<i64>,
    },
    Fault {
        session_id: Option<u32>,
        state: State,
        fault_state_previous_state: FaultState,
        fault_state_current_state: FaultState,
    },
    Rfid {
        uid: Vec<u8>,
    },
}

impl EvseEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            EvseEvent::EvConnected { .. } => "EVConnected",
            EvseEvent::EvNotDetected { .. } => "EVNotDetected",
            EvseEvent::EnergyTransferStarted { .. } => "EnergyTransferStarted",
            EvseEvent::EnergyTransferStopped { .. } => "EnergyTransferStopped",
            EvseEvent::Fault { .. } => "Fault",
            EvseEvent::Rfid { .. } => "RFID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = EvseEvent::EnergyTransferStopped {
            session_id: 3,
            state: State::PluggedInCharging,
            reason: EnergyTransferStoppedReason::EvseStopped,
            energy_transferred: 1500,
            energy_discharged: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "energyTransferStopped");
        assert_eq!(json["session_id"], 3);
        assert_eq!(json["reason"], "EvseStopped");
        assert!(json["energy_discharged"].is_null());
        assert_eq!(event.name(), "EnergyTransferStopped");
    }
}
