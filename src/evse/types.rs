//! Enumerations shared by the EVSE attributes, events and commands

use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Plug/demand state of the EVSE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    NotPluggedIn,
    PluggedInNoDemand,
    PluggedInDemand,
    PluggedInCharging,
    PluggedInDischarging,
    Fault,
}

impl State {
    /// Whether energy is flowing in either direction
    pub fn is_transferring(self) -> bool {
        matches!(self, State::PluggedInCharging | State::PluggedInDischarging)
    }

    /// Whether a vehicle is connected, regardless of transfer
    pub fn is_plugged_in(self) -> bool {
        matches!(
            self,
            State::PluggedInNoDemand
                | State::PluggedInDemand
                | State::PluggedInCharging
                | State::PluggedInDischarging
        )
    }
}

/// The three raw states the hardware may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HwState {
    NotPluggedIn,
    PluggedInNoDemand,
    PluggedInDemand,
}

impl TryFrom<State> for HwState {
    type Error = CommandError;

    fn try_from(state: State) -> Result<Self, Self::Error> {
        match state {
            State::NotPluggedIn => Ok(HwState::NotPluggedIn),
            State::PluggedInNoDemand => Ok(HwState::PluggedInNoDemand),
            State::PluggedInDemand => Ok(HwState::PluggedInDemand),
            _ => Err(CommandError::Failure),
        }
    }
}

impl From<HwState> for State {
    fn from(state: HwState) -> Self {
        match state {
            HwState::NotPluggedIn => State::NotPluggedIn,
            HwState::PluggedInNoDemand => State::PluggedInNoDemand,
            HwState::PluggedInDemand => State::PluggedInDemand,
        }
    }
}

/// Whether the EVSE is allowed to supply or absorb energy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupplyState {
    Disabled,
    ChargingEnabled,
    DischargingEnabled,
    DisabledError,
    DisabledDiagnostics,
    Enabled,
}

impl SupplyState {
    pub fn is_disabled(self) -> bool {
        matches!(
            self,
            SupplyState::Disabled | SupplyState::DisabledError | SupplyState::DisabledDiagnostics
        )
    }
}

/// Fault reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultState {
    NoError,
    MeterFailure,
    OverVoltage,
    UnderVoltage,
    OverCurrent,
    ContactWetFailure,
    ContactDryFailure,
    GroundFault,
    PowerLoss,
    PowerQuality,
    PilotShortCircuit,
    EmergencyStop,
    EvDisconnected,
    WrongPowerSupply,
    LiveNeutralSwap,
    OverTemperature,
    Other,
}

impl FaultState {
    const NAMES: [(&'static str, FaultState); 17] = [
        ("no-error", FaultState::NoError),
        ("meter-failure", FaultState::MeterFailure),
        ("over-voltage", FaultState::OverVoltage),
        ("under-voltage", FaultState::UnderVoltage),
        ("over-current", FaultState::OverCurrent),
        ("contact-wet-failure", FaultState::ContactWetFailure),
        ("contact-dry-failure", FaultState::ContactDryFailure),
        ("ground-fault", FaultState::GroundFault),
        ("power-loss", FaultState::PowerLoss),
        ("power-quality", FaultState::PowerQuality),
        ("pilot-short-circuit", FaultState::PilotShortCircuit),
        ("emergency-stop", FaultState::EmergencyStop),
        ("ev-disconnected", FaultState::EvDisconnected),
        ("wrong-power-supply", FaultState::WrongPowerSupply),
        ("live-neutral-swap", FaultState::LiveNeutralSwap),
        ("over-temperature", FaultState::OverTemperature),
        ("other", FaultState::Other),
    ];

    /// Kebab-case name, as accepted by [`FromStr`]
    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, fault)| *fault == self)
            .map_or("other", |(name, _)| *name)
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FaultState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, fault)| *fault)
            .ok_or_else(|| format!("Unknown fault kind: {}", s))
    }
}

/// Why an energy transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnergyTransferStoppedReason {
    EvStopped,
    EvseStopped,
    Other,
}

/// Which energy meter the application is asked to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeterKind {
    /// Imported energy (charging), mWh
    Charging,
    /// Exported energy (discharging), mWh
    Discharging,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hw_state_accepts_only_raw_states() {
        assert_eq!(HwState::try_from(State::PluggedInDemand), Ok(HwState::PluggedInDemand));
        assert_eq!(
            HwState::try_from(State::PluggedInCharging),
            Err(CommandError::Failure)
        );
        assert_eq!(HwState::try_from(State::Fault), Err(CommandError::Failure));
    }

    #[test]
    fn fault_names_round_trip() {
        for (name, fault) in FaultState::NAMES {
            assert_eq!(name.parse::<FaultState>(), Ok(fault));
            assert_eq!(fault.name(), name);
        }
        assert_eq!("GROUND_FAULT".parse::<FaultState>(), Ok(FaultState::GroundFault));
        assert!("melted".parse::<FaultState>().is_err());
    }

    #[test]
    fn transfer_and_plug_predicates() {
        assert!(State::PluggedInCharging.is_transferring());
        assert!(!State::PluggedInDemand.is_transferring());
        assert!(State::PluggedInDemand.is_plugged_in());
        assert!(!State::Fault.is_plugged_in());
        assert!(SupplyState::DisabledDiagnostics.is_disabled());
        assert!(!SupplyState::Enabled.is_disabled());
    }
}
