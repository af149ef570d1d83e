//! Attribute storage for the EVSE cluster
//!
//! Every setter stores the value and queues an [`AttributeId`] report only
//! when the value actually changed. The three session attributes are the
//! exception: they report on every write so that session boundaries are
//! always observable, even when the numbers repeat.

use super::types::{FaultState, State, SupplyState};
use crate::error::{CommandError, CommandResult};
use serde::{Deserialize, Serialize};

/// Largest RandomizationDelayWindow (seconds)
pub const MAX_RANDOMIZATION_DELAY_WINDOW_S: u32 = 86_400;

/// Longest VehicleID (characters)
pub const MAX_VEHICLE_ID_LEN: usize = 32;

/// Default MinimumChargeCurrent (mA)
pub const DEFAULT_MINIMUM_CHARGE_CURRENT_MA: i64 = 6_000;

/// Default RandomizationDelayWindow (seconds)
pub const DEFAULT_RANDOMIZATION_DELAY_WINDOW_S: u32 = 600;

/// EVSE cluster attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeId {
    State,
    SupplyState,
    FaultState,
    ChargingEnabledUntil,
    DischargingEnabledUntil,
    CircuitCapacity,
    MinimumChargeCurrent,
    MaximumChargeCurrent,
    MaximumDischargeCurrent,
    UserMaximumChargeCurrent,
    RandomizationDelayWindow,
    NextChargeStartTime,
    NextChargeTargetTime,
    NextChargeRequiredEnergy,
    NextChargeTargetSoC,
    ApproximateEvEfficiency,
    StateOfCharge,
    BatteryCapacity,
    VehicleId,
    SessionId,
    SessionDuration,
    SessionEnergyCharged,
    SessionEnergyDischarged,
}

impl AttributeId {
    /// Session attributes report on every write, even with an unchanged value
    pub fn always_reports(self) -> bool {
        matches!(
            self,
            AttributeId::SessionDuration
                | AttributeId::SessionEnergyCharged
                | AttributeId::SessionEnergyDischarged
        )
    }

    pub const ALL: [AttributeId; 23] = [
        AttributeId::State,
        AttributeId::SupplyState,
        AttributeId::FaultState,
        AttributeId::ChargingEnabledUntil,
        AttributeId::DischargingEnabledUntil,
        AttributeId::CircuitCapacity,
        AttributeId::MinimumChargeCurrent,
        AttributeId::MaximumChargeCurrent,
        AttributeId::MaximumDischargeCurrent,
        AttributeId::UserMaximumChargeCurrent,
        AttributeId::RandomizationDelayWindow,
        AttributeId::NextChargeStartTime,
        AttributeId::NextChargeTargetTime,
        AttributeId::NextChargeRequiredEnergy,
        AttributeId::NextChargeTargetSoC,
        AttributeId::ApproximateEvEfficiency,
        AttributeId::StateOfCharge,
        AttributeId::BatteryCapacity,
        AttributeId::VehicleId,
        AttributeId::SessionId,
        AttributeId::SessionDuration,
        AttributeId::SessionEnergyCharged,
        AttributeId::SessionEnergyDischarged,
    ];

    /// Attribute name as used in persistence keys and logs
    pub fn name(self) -> &'static str {
        match self {
            AttributeId::State => "State",
            AttributeId::SupplyState => "SupplyState",
            AttributeId::FaultState => "FaultState",
            AttributeId::ChargingEnabledUntil => "ChargingEnabledUntil",
            AttributeId::DischargingEnabledUntil => "DischargingEnabledUntil",
            AttributeId::CircuitCapacity => "CircuitCapacity",
            AttributeId::MinimumChargeCurrent => "MinimumChargeCurrent",
            AttributeId::MaximumChargeCurrent => "MaximumChargeCurrent",
            AttributeId::MaximumDischargeCurrent => "MaximumDischargeCurrent",
            AttributeId::UserMaximumChargeCurrent => "UserMaximumChargeCurrent",
            AttributeId::RandomizationDelayWindow => "RandomizationDelayWindow",
            AttributeId::NextChargeStartTime => "NextChargeStartTime",
            AttributeId::NextChargeTargetTime => "NextChargeTargetTime",
            AttributeId::NextChargeRequiredEnergy => "NextChargeRequiredEnergy",
            AttributeId::NextChargeTargetSoC => "NextChargeTargetSoC",
            AttributeId::ApproximateEvEfficiency => "ApproximateEVEfficiency",
            AttributeId::StateOfCharge => "StateOfCharge",
            AttributeId::BatteryCapacity => "BatteryCapacity",
            AttributeId::VehicleId => "VehicleID",
            AttributeId::SessionId => "SessionID",
            AttributeId::SessionDuration => "SessionDuration",
            AttributeId::SessionEnergyCharged => "SessionEnergyCharged",
            AttributeId::SessionEnergyDischarged => "SessionEnergyDischarged",
        }
    }
}

/// A read attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    State(State),
    SupplyState(SupplyState),
    FaultState(FaultState),
    Current(i64),
    NullableEnergy(Option<i64>),
    NullableEpochSeconds(Option<u32>),
    Seconds(u32),
    NullableSeconds(Option<u32>),
    NullablePercent(Option<u8>),
    NullableEfficiency(Option<u16>),
    NullableSessionId(Option<u32>),
    NullableText(Option<String>),
}

/// Current values of every EVSE attribute
#[derive(Debug, Clone)]
pub struct EvseAttributes {
    state: State,
    supply_state: SupplyState,
    fault_state: FaultState,
    charging_enabled_until: Option<u32>,
    discharging_enabled_until: Option<u32>,
    circuit_capacity: i64,
    minimum_charge_current: i64,
    maximum_charge_current: i64,
    maximum_discharge_current: i64,
    user_maximum_charge_current: i64,
    randomization_delay_window: u32,
    next_charge_start_time: Option<u32>,
    next_charge_target_time: Option<u32>,
    next_charge_required_energy: Option<i64>,
    next_charge_target_soc: Option<u8>,
    approximate_ev_efficiency: Option<u16>,
    state_of_charge: Option<u8>,
    battery_capacity: Option<i64>,
    vehicle_id: Option<String>,
    session_id: Option<u32>,
    session_duration: Option<u32>,
    session_energy_charged: Option<i64>,
    session_energy_discharged: Option<i64>,
    reports: Vec<AttributeId>,
}

impl Default for EvseAttributes {
    fn default() -> Self {
        Self {
            state: State::NotPluggedIn,
            supply_state: SupplyState::Disabled,
            fault_state: FaultState::NoError,
            charging_enabled_until: None,
            discharging_enabled_until: None,
            circuit_capacity: 0,
            minimum_charge_current: DEFAULT_MINIMUM_CHARGE_CURRENT_MA,
            maximum_charge_current: 0,
            maximum_discharge_current: 0,
            user_maximum_charge_current: 0,
            randomization_delay_window: DEFAULT_RANDOMIZATION_DELAY_WINDOW_S,
            next_charge_start_time: None,
            next_charge_target_time: None,
            next_charge_required_energy: None,
            next_charge_target_soc: None,
            approximate_ev_efficiency: None,
            state_of_charge: None,
            battery_capacity: None,
            vehicle_id: None,
            session_id: None,
            session_duration: None,
            session_energy_charged: None,
            session_energy_discharged: None,
            reports: Vec::new(),
        }
    }
}

fn save_if_changed<T: PartialEq>(
    slot: &mut T,
    value: T,
    id: AttributeId,
    reports: &mut Vec<AttributeId>,
) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    reports.push(id);
    true
}

fn non_negative(value: i64) -> CommandResult<i64> {
    if value < 0 {
        return Err(CommandError::ConstraintError);
    }
    Ok(value)
}

impl EvseAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the queued change reports, oldest first
    pub fn take_reports(&mut self) -> Vec<AttributeId> {
        std::mem::take(&mut self.reports)
    }

    /// Reports queued since the last [`EvseAttributes::take_reports`]
    pub fn pending_reports(&self) -> &[AttributeId] {
        &self.reports
    }

    /// Read any attribute as a tagged value
    pub fn value(&self, id: AttributeId) -> AttributeValue {
        match id {
            AttributeId::State => AttributeValue::State(self.state),
            AttributeId::SupplyState => AttributeValue::SupplyState(self.supply_state),
            AttributeId::FaultState => AttributeValue::FaultState(self.fault_state),
            AttributeId::ChargingEnabledUntil => {
                AttributeValue::NullableEpochSeconds(self.charging_enabled_until)
            }
            AttributeId::DischargingEnabledUntil => {
                AttributeValue::NullableEpochSeconds(self.discharging_enabled_until)
            }
            AttributeId::CircuitCapacity => AttributeValue::Current(self.circuit_capacity),
            AttributeId::MinimumChargeCurrent => {
                AttributeValue::Current(self.minimum_charge_current)
            }
            AttributeId::MaximumChargeCurrent => {
                AttributeValue::Current(self.maximum_charge_current)
            }
            AttributeId::MaximumDischargeCurrent => {
                AttributeValue::Current(self.maximum_discharge_current)
            }
            AttributeId::UserMaximumChargeCurrent => {
                AttributeValue::Current(self.user_maximum_charge_current)
            }
            AttributeId::RandomizationDelayWindow => {
                AttributeValue::Seconds(self.randomization_delay_window)
            }
            AttributeId::NextChargeStartTime => {
                AttributeValue::NullableEpochSeconds(self.next_charge_start_time)
            }
            AttributeId::NextChargeTargetTime => {
                AttributeValue::NullableEpochSeconds(self.next_charge_target_time)
            }
            AttributeId::NextChargeRequiredEnergy => {
                AttributeValue::NullableEnergy(self.next_charge_required_energy)
            }
            AttributeId::NextChargeTargetSoC => {
                AttributeValue::NullablePercent(self.next_charge_target_soc)
            }
            AttributeId::ApproximateEvEfficiency => {
                AttributeValue::NullableEfficiency(self.approximate_ev_efficiency)
            }
            AttributeId::StateOfCharge => AttributeValue::NullablePercent(self.state_of_charge),
            AttributeId::BatteryCapacity => AttributeValue::NullableEnergy(self.battery_capacity),
            AttributeId::VehicleId => AttributeValue::NullableText(self.vehicle_id.clone()),
            AttributeId::SessionId => AttributeValue::NullableSessionId(self.session_id),
            AttributeId::SessionDuration => AttributeValue::NullableSeconds(self.session_duration),
            AttributeId::SessionEnergyCharged => {
                AttributeValue::NullableEnergy(self.session_energy_charged)
            }
            AttributeId::SessionEnergyDischarged => {
                AttributeValue::NullableEnergy(self.session_energy_discharged)
            }
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, value: State) -> bool {
        save_if_changed(&mut self.state, value, AttributeId::State, &mut self.reports)
    }

    pub fn supply_state(&self) -> SupplyState {
        self.supply_state
    }

    pub fn set_supply_state(&mut self, value: SupplyState) -> bool {
        save_if_changed(
            &mut self.supply_state,
            value,
            AttributeId::SupplyState,
            &mut self.reports,
        )
    }

    pub fn fault_state(&self) -> FaultState {
        self.fault_state
    }

    pub fn set_fault_state(&mut self, value: FaultState) -> bool {
        save_if_changed(
            &mut self.fault_state,
            value,
            AttributeId::FaultState,
            &mut self.reports,
        )
    }

    pub fn charging_enabled_until(&self) -> Option<u32> {
        self.charging_enabled_until
    }

    pub fn set_charging_enabled_until(&mut self, value: Option<u32>) -> bool {
        save_if_changed(
            &mut self.charging_enabled_until,
            value,
            AttributeId::ChargingEnabledUntil,
            &mut self.reports,
        )
    }

    pub fn discharging_enabled_until(&self) -> Option<u32> {
        self.discharging_enabled_until
    }

    pub fn set_discharging_enabled_until(&mut self, value: Option<u32>) -> bool {
        save_if_changed(
            &mut self.discharging_enabled_until,
            value,
            AttributeId::DischargingEnabledUntil,
            &mut self.reports,
        )
    }

    pub fn circuit_capacity(&self) -> i64 {
        self.circuit_capacity
    }

    pub fn set_circuit_capacity(&mut self, value: i64) -> CommandResult<bool> {
        let value = non_negative(value)?;
        Ok(save_if_changed(
            &mut self.circuit_capacity,
            value,
            AttributeId::CircuitCapacity,
            &mut self.reports,
        ))
    }

    pub fn minimum_charge_current(&self) -> i64 {
        self.minimum_charge_current
    }

    pub fn set_minimum_charge_current(&mut self, value: i64) -> CommandResult<bool> {
        let value = non_negative(value)?;
        Ok(save_if_changed(
            &mut self.minimum_charge_current,
            value,
            AttributeId::MinimumChargeCurrent,
            &mut self.reports,
        ))
    }

    pub fn maximum_charge_current(&self) -> i64 {
        self.maximum_charge_current
    }

    pub fn set_maximum_charge_current(&mut self, value: i64) -> CommandResult<bool> {
        let value = non_negative(value)?;
        Ok(save_if_changed(
            &mut self.maximum_charge_current,
            value,
            AttributeId::MaximumChargeCurrent,
            &mut self.reports,
        ))
    }

    pub fn maximum_discharge_current(&self) -> i64 {
        self.maximum_discharge_current
    }

    pub fn set_maximum_discharge_current(&mut self, value: i64) -> CommandResult<bool> {
        let value = non_negative(value)?;
        Ok(save_if_changed(
            &mut self.maximum_discharge_current,
            value,
            AttributeId::MaximumDischargeCurrent,
            &mut self.reports,
        ))
    }

    pub fn user_maximum_charge_current(&self) -> i64 {
        self.user_maximum_charge_current
    }

    pub fn set_user_maximum_charge_current(&mut self, value: i64) -> CommandResult<bool> {
        let value = non_negative(value)?;
        Ok(save_if_changed(
            &mut self.user_maximum_charge_current,
            value,
            AttributeId::UserMaximumChargeCurrent,
            &mut self.reports,
        ))
    }

    pub fn randomization_delay_window(&self) -> u32 {
        self.randomization_delay_window
    }

    pub fn set_randomization_delay_window(&mut self, value: u32) -> CommandResult<bool> {
        if value > MAX_RANDOMIZATION_DELAY_WINDOW_S {
            return Err(CommandError::ConstraintError);
        }
        Ok(save_if_changed(
            &mut self.randomization_delay_window,
            value,
            AttributeId::RandomizationDelayWindow,
            &mut self.reports,
        ))
    }

    pub fn next_charge_start_time(&self) -> Option<u32> {
        self.next_charge_start_time
    }

    pub fn set_next_charge_start_time(&mut self, value: Option<u32>) -> bool {
        save_if_changed(
            &mut self.next_charge_start_time,
            value,
            AttributeId::NextChargeStartTime,
            &mut self.reports,
        )
    }

    pub fn next_charge_target_time(&self) -> Option<u32> {
        self.next_charge_target_time
    }

    pub fn set_next_charge_target_time(&mut self, value: Option<u32>) -> bool {
        save_if_changed(
            &mut self.next_charge_target_time,
            value,
            AttributeId::NextChargeTargetTime,
            &mut self.reports,
        )
    }

    pub fn next_charge_required_energy(&self) -> Option<i64> {
        self.next_charge_required_energy
    }

    pub fn set_next_charge_required_energy(&mut self, value: Option<i64>) -> CommandResult<bool> {
        if value.is_some_and(|v| v < 0) {
            return Err(CommandError::ConstraintError);
        }
        Ok(save_if_changed(
            &mut self.next_charge_required_energy,
            value,
            AttributeId::NextChargeRequiredEnergy,
            &mut self.reports,
        ))
    }

    pub fn next_charge_target_soc(&self) -> Option<u8> {
        self.next_charge_target_soc
    }

    pub fn set_next_charge_target_soc(&mut self, value: Option<u8>) -> CommandResult<bool> {
        if value.is_some_and(|v| v > 100) {
            return Err(CommandError::ConstraintError);
        }
        Ok(save_if_changed(
            &mut self.next_charge_target_soc,
            value,
            AttributeId::NextChargeTargetSoC,
            &mut self.reports,
        ))
    }

    pub fn approximate_ev_efficiency(&self) -> Option<u16> {
        self.approximate_ev_efficiency
    }

    pub fn set_approximate_ev_efficiency(&mut self, value: Option<u16>) -> bool {
        save_if_changed(
            &mut self.approximate_ev_efficiency,
            value,
            AttributeId::ApproximateEvEfficiency,
            &mut self.reports,
        )
    }

    pub fn state_of_charge(&self) -> Option<u8> {
        self.state_of_charge
    }

    pub fn set_state_of_charge(&mut self, value: Option<u8>) -> CommandResult<bool> {
        if value.is_some_and(|v| v > 100) {
            return Err(CommandError::ConstraintError);
        }
        Ok(save_if_changed(
            &mut self.state_of_charge,
            value,
            AttributeId::StateOfCharge,
            &mut self.reports,
        ))
    }

    pub fn battery_capacity(&self) -> Option<i64> {
        self.battery_capacity
    }

    pub fn set_battery_capacity(&mut self, value: Option<i64>) -> CommandResult<bool> {
        if value.is_some_and(|v| v < 0) {
            return Err(CommandError::ConstraintError);
        }
        Ok(save_if_changed(
            &mut self.battery_capacity,
            value,
            AttributeId::BatteryCapacity,
            &mut self.reports,
        ))
    }

    pub fn vehicle_id(&self) -> Option<&str> {
        self.vehicle_id.as_deref()
    }

    /// Store a vehicle id; longer than 32 characters is a Failure
    pub fn set_vehicle_id(&mut self, value: Option<String>) -> CommandResult<bool> {
        if value
            .as_deref()
            .is_some_and(|id| id.chars().count() > MAX_VEHICLE_ID_LEN)
        {
            return Err(CommandError::Failure);
        }
        Ok(save_if_changed(
            &mut self.vehicle_id,
            value,
            AttributeId::VehicleId,
            &mut self.reports,
        ))
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn set_session_id(&mut self, value: Option<u32>) -> bool {
        save_if_changed(
            &mut self.session_id,
            value,
            AttributeId::SessionId,
            &mut self.reports,
        )
    }

    pub fn session_duration(&self) -> Option<u32> {
        self.session_duration
    }

    /// Always reported
    pub fn set_session_duration(&mut self, value: Option<u32>) {
        self.session_duration = value;
        self.reports.push(AttributeId::SessionDuration);
    }

    pub fn session_energy_charged(&self) -> Option<i64> {
        self.session_energy_charged
    }

    /// Always reported
    pub fn set_session_energy_charged(&mut self, value: Option<i64>) {
        self.session_energy_charged = value;
        self.reports.push(AttributeId::SessionEnergyCharged);
    }

    pub fn session_energy_discharged(&self) -> Option<i64> {
        self.session_energy_discharged
    }

    /// Always reported
    pub fn set_session_energy_discharged(&mut self, value: Option<i64>) {
        self.session_energy_discharged = value;
        self.reports.push(AttributeId::SessionEnergyDischarged);
    }
}
