use super::types::{EvseCommand, EvseSnapshot, EvseUpdate, HardwareInput, RuntimeState};
use crate::error::{CommandResult, EvseError, Result, WriteOutcome};
use crate::evse::{
    AttributeId, AttributeValue, ChargingTargetSchedule, EvseRequest, EvseResponse, FaultState,
    MeterKind, State,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;

/// Cloneable front end of a running [`super::EvseRuntime`].
///
/// Rejected commands come back as [`EvseError::Command`]; a stopped runtime
/// as a generic error.
#[derive(Clone)]
pub struct EvseHandle {
    commands_tx: mpsc::UnboundedSender<EvseCommand>,
    snapshot_rx: watch::Receiver<Arc<EvseSnapshot>>,
    state_rx: watch::Receiver<RuntimeState>,
    updates_tx: broadcast::Sender<EvseUpdate>,
}

fn stopped() -> EvseError {
    EvseError::generic("EVSE runtime is not running")
}

impl EvseHandle {
    pub(super) fn new(
        commands_tx: mpsc::UnboundedSender<EvseCommand>,
        snapshot_rx: watch::Receiver<Arc<EvseSnapshot>>,
        state_rx: watch::Receiver<RuntimeState>,
        updates_tx: broadcast::Sender<EvseUpdate>,
    ) -> Self {
        Self {
            commands_tx,
            snapshot_rx,
            state_rx,
            updates_tx,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<CommandResult<T>>) -> EvseCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands_tx.send(build(reply)).map_err(|_| stopped())?;
        let result = rx.await.map_err(|_| stopped())?;
        Ok(result?)
    }

    pub async fn invoke(&self, request: EvseRequest) -> Result<EvseResponse> {
        self.request(|reply| EvseCommand::Invoke { request, reply })
            .await
    }

    pub async fn disable(&self) -> Result<()> {
        self.invoke(EvseRequest::Disable).await.map(|_| ())
    }

    pub async fn enable_charging(
        &self,
        charging_enabled_until: Option<u32>,
        minimum_charge_current: i64,
        maximum_charge_current: i64,
    ) -> Result<()> {
        self.invoke(EvseRequest::EnableCharging {
            charging_enabled_until,
            minimum_charge_current,
            maximum_charge_current,
        })
        .await
        .map(|_| ())
    }

    pub async fn enable_discharging(
        &self,
        discharging_enabled_until: Option<u32>,
        maximum_discharge_current: i64,
    ) -> Result<()> {
        self.invoke(EvseRequest::EnableDischarging {
            discharging_enabled_until,
            maximum_discharge_current,
        })
        .await
        .map(|_| ())
    }

    pub async fn start_diagnostics(&self) -> Result<()> {
        self.invoke(EvseRequest::StartDiagnostics).await.map(|_| ())
    }

    pub async fn set_targets(&self, schedules: Vec<ChargingTargetSchedule>) -> Result<()> {
        self.invoke(EvseRequest::SetTargets { schedules })
            .await
            .map(|_| ())
    }

    pub async fn read_attribute(&self, id: AttributeId) -> Result<AttributeValue> {
        self.request(|reply| EvseCommand::ReadAttribute { id, reply })
            .await
    }

    pub async fn write_user_maximum_charge_current(&self, value: i64) -> Result<WriteOutcome> {
        self.request(|reply| EvseCommand::WriteUserMaximumChargeCurrent { value, reply })
            .await
    }

    pub async fn write_randomization_delay_window(&self, value: u32) -> Result<WriteOutcome> {
        self.request(|reply| EvseCommand::WriteRandomizationDelayWindow { value, reply })
            .await
    }

    pub async fn write_approximate_ev_efficiency(
        &self,
        value: Option<u16>,
    ) -> Result<WriteOutcome> {
        self.request(|reply| EvseCommand::WriteApproximateEvEfficiency { value, reply })
            .await
    }

    pub async fn hardware(&self, input: HardwareInput) -> Result<()> {
        self.request(|reply| EvseCommand::Hardware { input, reply })
            .await
    }

    pub async fn set_state(&self, state: State) -> Result<()> {
        self.hardware(HardwareInput::State(state)).await
    }

    pub async fn set_fault(&self, fault: FaultState) -> Result<()> {
        self.hardware(HardwareInput::Fault(fault)).await
    }

    pub fn set_meter(&self, meter: MeterKind, value: i64) -> Result<()> {
        self.commands_tx
            .send(EvseCommand::SetMeter { meter, value })
            .map_err(|_| stopped())
    }

    /// Ask the runtime to stop; returns once the request is queued
    pub fn shutdown(&self) -> Result<()> {
        self.commands_tx
            .send(EvseCommand::Shutdown)
            .map_err(|_| stopped())
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<EvseSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<EvseSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn runtime_state(&self) -> RuntimeState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<EvseUpdate> {
        self.updates_tx.subscribe()
    }

    /// Updates as a stream; lagged receivers skip what they missed
    pub fn updates(&self) -> BroadcastStream<EvseUpdate> {
        BroadcastStream::new(self.updates_tx.subscribe())
    }
}
