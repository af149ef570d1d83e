//! Interface between the EVSE cluster surface and the engine behind it

use super::attributes::EvseAttributes;
use super::targets::ChargingTargetSchedule;
use crate::error::CommandResult;

/// Command handlers and attribute access the cluster relies on.
///
/// The cluster validates arguments and feature gating before calling in;
/// implementations apply the command and own the attribute values.
pub trait EvseDelegate: Send {
    fn attributes(&self) -> &EvseAttributes;

    fn disable(&mut self) -> CommandResult;

    fn enable_charging(
        &mut self,
        charging_enabled_until: Option<u32>,
        minimum_charge_current: i64,
        maximum_charge_current: i64,
    ) -> CommandResult;

    fn enable_discharging(
        &mut self,
        discharging_enabled_until: Option<u32>,
        maximum_discharge_current: i64,
    ) -> CommandResult;

    fn start_diagnostics(&mut self) -> CommandResult;

    fn set_targets(&mut self, schedules: &[ChargingTargetSchedule]) -> CommandResult;

    fn get_targets(&self) -> CommandResult<Vec<ChargingTargetSchedule>>;

    fn clear_targets(&mut self) -> CommandResult;

    /// Returns whether the stored value changed
    fn write_user_maximum_charge_current(&mut self, value: i64) -> CommandResult<bool>;

    /// Returns whether the stored value changed
    fn write_randomization_delay_window(&mut self, value: u32) -> CommandResult<bool>;

    /// Returns whether the stored value changed
    fn write_approximate_ev_efficiency(&mut self, value: Option<u16>) -> CommandResult<bool>;
}
