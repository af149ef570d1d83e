use super::EvseRuntime;
use super::types::{EvseCommand, HardwareInput};
use crate::error::CommandResult;

impl EvseRuntime {
    /// Apply one command. Returns false on shutdown.
    pub(crate) fn handle_command(&mut self, cmd: EvseCommand) -> bool {
        match cmd {
            EvseCommand::Invoke { request, reply } => {
                let _ = reply.send(self.cluster.invoke(request));
            }
            EvseCommand::ReadAttribute { id, reply } => {
                let _ = reply.send(self.cluster.read_attribute(id));
            }
            EvseCommand::WriteUserMaximumChargeCurrent { value, reply } => {
                let _ = reply.send(self.cluster.write_user_maximum_charge_current(value));
            }
            EvseCommand::WriteRandomizationDelayWindow { value, reply } => {
                let _ = reply.send(self.cluster.write_randomization_delay_window(value));
            }
            EvseCommand::WriteApproximateEvEfficiency { value, reply } => {
                let _ = reply.send(self.cluster.write_approximate_ev_efficiency(value));
            }
            EvseCommand::Hardware { input, reply } => {
                let _ = reply.send(self.apply_hardware_input(input));
            }
            EvseCommand::SetMeter { meter, value } => {
                self.meters.set(meter, value);
            }
            EvseCommand::Shutdown => {
                self.logger.info("Shutdown requested");
                return false;
            }
        }
        true
    }

    fn apply_hardware_input(&mut self, input: HardwareInput) -> CommandResult {
        let evse = self.cluster.delegate_mut();
        match input {
            HardwareInput::State(state) => evse.hw_set_state(state),
            HardwareInput::Fault(fault) => evse.hw_set_fault(fault),
            HardwareInput::Rfid(uid) => evse.hw_set_rfid(&uid),
            HardwareInput::VehicleId(id) => evse.hw_set_vehicle_id(&id),
            HardwareInput::DiagnosticsComplete => evse.hw_diagnostics_complete(),
            HardwareInput::MaxHardwareChargeCurrent(ma) => {
                evse.hw_set_max_hardware_charge_current_limit(ma)
            }
            HardwareInput::MaxHardwareDischargeCurrent(ma) => {
                evse.hw_set_max_hardware_discharge_current_limit(ma)
            }
            HardwareInput::CircuitCapacity(ma) => evse.hw_set_circuit_capacity(ma),
            HardwareInput::CableAssemblyLimit(ma) => evse.hw_set_cable_assembly_limit(ma),
            HardwareInput::NominalMainsVoltage(mv) => evse.hw_set_nominal_mains_voltage(mv),
            HardwareInput::StateOfCharge(percent) => evse.hw_set_state_of_charge(percent),
            HardwareInput::BatteryCapacity(mwh) => evse.hw_set_battery_capacity(mwh),
            HardwareInput::RefreshSession => {
                evse.refresh_session();
                Ok(())
            }
        }
    }
}
