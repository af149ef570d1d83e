//! In-memory delegate for exercising the cluster surface
//!
//! Records every call and applies commands to its own attribute store with
//! just enough behavior to observe the cluster's validation and gating.

use super::attributes::EvseAttributes;
use super::delegate::EvseDelegate;
use super::targets::{ChargingTargetSchedule, TargetsStore};
use super::types::SupplyState;
use crate::error::{CommandError, CommandResult};

/// A delegate call as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Disable,
    EnableCharging {
        charging_enabled_until: Option<u32>,
        minimum_charge_current: i64,
        maximum_charge_current: i64,
    },
    EnableDischarging {
        discharging_enabled_until: Option<u32>,
        maximum_discharge_current: i64,
    },
    StartDiagnostics,
    SetTargets(Vec<ChargingTargetSchedule>),
    ClearTargets,
    WriteUserMaximumChargeCurrent(i64),
    WriteRandomizationDelayWindow(u32),
    WriteApproximateEvEfficiency(Option<u16>),
}

#[derive(Debug, Default)]
pub struct MockEvseDelegate {
    attrs: EvseAttributes,
    targets: TargetsStore,
    calls: Vec<MockCall>,
    /// Returned by every command when set
    pub fail_with: Option<CommandError>,
}

impl MockEvseDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    fn record(&mut self, call: MockCall) -> CommandResult {
        self.calls.push(call);
        match self.fail_with {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl EvseDelegate for MockEvseDelegate {
    fn attributes(&self) -> &EvseAttributes {
        &self.attrs
    }

    fn disable(&mut self) -> CommandResult {
        self.record(MockCall::Disable)?;
        self.attrs.set_supply_state(SupplyState::Disabled);
        Ok(())
    }

    fn enable_charging(
        &mut self,
        charging_enabled_until: Option<u32>,
        minimum_charge_current: i64,
        maximum_charge_current: i64,
    ) -> CommandResult {
        self.record(MockCall::EnableCharging {
            charging_enabled_until,
            minimum_charge_current,
            maximum_charge_current,
        })?;
        self.attrs.set_charging_enabled_until(charging_enabled_until);
        self.attrs.set_minimum_charge_current(minimum_charge_current)?;
        self.attrs.set_maximum_charge_current(maximum_charge_current)?;
        self.attrs.set_supply_state(SupplyState::ChargingEnabled);
        Ok(())
    }

    fn enable_discharging(
        &mut self,
        discharging_enabled_until: Option<u32>,
        maximum_discharge_current: i64,
    ) -> CommandResult {
        self.record(MockCall::EnableDischarging {
            discharging_enabled_until,
            maximum_discharge_current,
        })?;
        self.attrs
            .set_discharging_enabled_until(discharging_enabled_until);
        self.attrs
            .set_maximum_discharge_current(maximum_discharge_current)?;
        self.attrs.set_supply_state(SupplyState::DischargingEnabled);
        Ok(())
    }

    fn start_diagnostics(&mut self) -> CommandResult {
        self.record(MockCall::StartDiagnostics)?;
        self.attrs.set_supply_state(SupplyState::DisabledDiagnostics);
        Ok(())
    }

    fn set_targets(&mut self, schedules: &[ChargingTargetSchedule]) -> CommandResult {
        self.record(MockCall::SetTargets(schedules.to_vec()))?;
        self.targets.set(schedules)
    }

    fn get_targets(&self) -> CommandResult<Vec<ChargingTargetSchedule>> {
        Ok(self.targets.get())
    }

    fn clear_targets(&mut self) -> CommandResult {
        self.record(MockCall::ClearTargets)?;
        self.targets.clear();
        Ok(())
    }

    fn write_user_maximum_charge_current(&mut self, value: i64) -> CommandResult<bool> {
        self.record(MockCall::WriteUserMaximumChargeCurrent(value))?;
        self.attrs.set_user_maximum_charge_current(value)
    }

    fn write_randomization_delay_window(&mut self, value: u32) -> CommandResult<bool> {
        self.record(MockCall::WriteRandomizationDelayWindow(value))?;
        self.attrs.set_randomization_delay_window(value)
    }

    fn write_approximate_ev_efficiency(&mut self, value: Option<u16>) -> CommandResult<bool> {
        self.record(MockCall::WriteApproximateEvEfficiency(value))?;
        Ok(self.attrs.set_approximate_ev_efficiency(value))
    }
}
