use crate::error::{CommandResult, WriteOutcome};
use crate::evse::{
    AttributeId, AttributeValue, EvseEvent, EvseRequest, EvseResponse, FaultState, MeterKind,
    State, SupplyState,
};
use serde::Serialize;
use tokio::sync::oneshot;

/// Runtime lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Input from the charger hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareInput {
    State(State),
    Fault(FaultState),
    Rfid(Vec<u8>),
    VehicleId(String),
    DiagnosticsComplete,
    MaxHardwareChargeCurrent(i64),
    MaxHardwareDischargeCurrent(i64),
    CircuitCapacity(i64),
    CableAssemblyLimit(i64),
    NominalMainsVoltage(i64),
    StateOfCharge(Option<u8>),
    BatteryCapacity(Option<i64>),
    /// Refresh session duration and energy from the meters
    RefreshSession,
}

/// Request sent to the runtime
#[derive(Debug)]
pub enum EvseCommand {
    Invoke {
        request: EvseRequest,
        reply: oneshot::Sender<CommandResult<EvseResponse>>,
    },
    ReadAttribute {
        id: AttributeId,
        reply: oneshot::Sender<CommandResult<AttributeValue>>,
    },
    WriteUserMaximumChargeCurrent {
        value: i64,
        reply: oneshot::Sender<CommandResult<WriteOutcome>>,
    },
    WriteRandomizationDelayWindow {
        value: u32,
        reply: oneshot::Sender<CommandResult<WriteOutcome>>,
    },
    WriteApproximateEvEfficiency {
        value: Option<u16>,
        reply: oneshot::Sender<CommandResult<WriteOutcome>>,
    },
    Hardware {
        input: HardwareInput,
        reply: oneshot::Sender<CommandResult>,
    },
    /// Update a simulated meter reading (mWh)
    SetMeter { meter: MeterKind, value: i64 },
    Shutdown,
}

/// Published after every processed command or timer expiry
#[derive(Debug, Clone, Serialize)]
pub struct EvseSnapshot {
    pub timestamp: String,
    pub endpoint: u16,
    pub state: State,
    pub supply_state: SupplyState,
    pub fault_state: FaultState,
    pub charging_enabled_until: Option<u32>,
    pub discharging_enabled_until: Option<u32>,
    pub circuit_capacity: i64,
    pub minimum_charge_current: i64,
    pub maximum_charge_current: i64,
    pub maximum_discharge_current: i64,
    pub user_maximum_charge_current: i64,
    pub next_charge_target_time: Option<u32>,
    pub vehicle_id: Option<String>,
    pub session_id: Option<u32>,
    pub session_duration: Option<u32>,
    pub session_energy_charged: Option<i64>,
    pub session_energy_discharged: Option<i64>,
}

/// Change broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EvseUpdate {
    Event {
        event: EvseEvent,
    },
    AttributeChanged {
        attribute: AttributeId,
        value: AttributeValue,
    },
    ChargeCurrentChanged {
        maximum_charge_current: i64,
        minimum_charge_current: i64,
        nominal_mains_voltage_mv: i64,
    },
    DischargeCurrentChanged {
        maximum_discharge_current: i64,
        nominal_mains_voltage_mv: i64,
    },
    ChargingPreferencesChanged,
}
