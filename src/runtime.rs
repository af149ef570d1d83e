//! Async driver for the EVSE engine
//!
//! The engine itself is synchronous. [`EvseRuntime`] owns it and serializes
//! every input (commands, hardware inputs, timer expiries) through one
//! `tokio::select!` loop. After each step it publishes a snapshot on a
//! `watch` channel and broadcasts emitted events and attribute reports.

mod commands;
mod handle;
mod types;

pub use handle::EvseHandle;
pub use types::{EvseCommand, EvseSnapshot, EvseUpdate, HardwareInput, RuntimeState};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::evse::{AttributeId, EnergyEvseCluster, EvseCallback, EvseStateMachine, MeterKind};
use crate::logging::{StructuredLogger, get_logger};
use crate::timer::{TimerReceiver, TokioTimerService};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};

/// Capacity of the update broadcast channel
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Meter readings answered to the engine's read requests
#[derive(Debug, Clone, Default)]
pub struct SharedMeters {
    inner: Arc<Mutex<[i64; 2]>>,
}

impl SharedMeters {
    fn index(meter: MeterKind) -> usize {
        match meter {
            MeterKind::Charging => 0,
            MeterKind::Discharging => 1,
        }
    }

    pub fn get(&self, meter: MeterKind) -> i64 {
        let values = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values[Self::index(meter)]
    }

    pub fn set(&self, meter: MeterKind, value: i64) {
        let mut values = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values[Self::index(meter)] = value;
    }
}

pub struct EvseRuntime {
    cluster: EnergyEvseCluster<EvseStateMachine>,
    meters: SharedMeters,
    commands_rx: mpsc::UnboundedReceiver<EvseCommand>,
    commands_tx: mpsc::UnboundedSender<EvseCommand>,
    timer_rx: TimerReceiver,
    snapshot_tx: watch::Sender<Arc<EvseSnapshot>>,
    state_tx: watch::Sender<RuntimeState>,
    updates_tx: broadcast::Sender<EvseUpdate>,
    logger: StructuredLogger,
}

impl EvseRuntime {
    /// Build the engine from `config`. Must be called within a tokio runtime.
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let logger = get_logger("runtime");
        let (timers, timer_rx) = TokioTimerService::new();
        let mut machine = EvseStateMachine::from_config(config, clock, Box::new(timers))?;

        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let meters = SharedMeters::default();
        machine.hw_register_evse_callback_handler(Self::callback_handler(
            meters.clone(),
            updates_tx.clone(),
        ))?;

        let features = machine.features();
        let cluster = EnergyEvseCluster::new(config.endpoint, features, machine);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(Arc::new(Self::build_snapshot(&cluster)));
        let (state_tx, _) = watch::channel(RuntimeState::Running);

        logger.info(&format!(
            "EVSE runtime ready on endpoint {} (features {:?})",
            config.endpoint, features
        ));

        Ok(Self {
            cluster,
            meters,
            commands_rx,
            commands_tx,
            timer_rx,
            snapshot_tx,
            state_tx,
            updates_tx,
            logger,
        })
    }

    /// Handle for sending commands and subscribing to updates
    pub fn handle(&self) -> EvseHandle {
        EvseHandle::new(
            self.commands_tx.clone(),
            self.snapshot_tx.subscribe(),
            self.state_tx.subscribe(),
            self.updates_tx.clone(),
        )
    }

    pub fn meters(&self) -> SharedMeters {
        self.meters.clone()
    }

    /// Run until a shutdown command arrives
    pub async fn run(mut self) -> Result<()> {
        self.logger.info("Starting EVSE runtime loop");

        loop {
            tokio::select! {
                Some(cmd) = self.commands_rx.recv() => {
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Some(token) = self.timer_rx.recv() => {
                    self.logger.debug(&format!("Timer {:?} expired", token));
                    self.cluster.delegate_mut().on_timer_expired(token);
                }
                else => break,
            }
            self.publish();
        }

        self.state_tx.send_replace(RuntimeState::ShuttingDown);
        self.publish();
        self.state_tx.send_replace(RuntimeState::Stopped);
        self.logger.info("EVSE runtime stopped");
        Ok(())
    }

    fn callback_handler(
        meters: SharedMeters,
        updates_tx: broadcast::Sender<EvseUpdate>,
    ) -> crate::evse::EvseCallbackHandler {
        Box::new(move |callback| {
            let update = match callback {
                EvseCallback::EnergyMeterReadingRequested { meter, value } => {
                    *value = meters.get(meter);
                    return;
                }
                // Carried by the SupplyState/State attribute reports
                EvseCallback::StateChanged { .. } => return,
                EvseCallback::ChargeCurrentChanged {
                    maximum_charge_current,
                    minimum_charge_current,
                    nominal_mains_voltage_mv,
                } => EvseUpdate::ChargeCurrentChanged {
                    maximum_charge_current,
                    minimum_charge_current,
                    nominal_mains_voltage_mv,
                },
                EvseCallback::DischargeCurrentChanged {
                    maximum_discharge_current,
                    nominal_mains_voltage_mv,
                } => EvseUpdate::DischargeCurrentChanged {
                    maximum_discharge_current,
                    nominal_mains_voltage_mv,
                },
                EvseCallback::ChargingPreferencesChanged => EvseUpdate::ChargingPreferencesChanged,
            };
            // No subscribers is fine
            let _ = updates_tx.send(update);
        })
    }

    /// Broadcast pending events and reports, then refresh the snapshot
    fn publish(&mut self) {
        let evse = self.cluster.delegate_mut();
        let events = evse.take_events();
        let reports = coalesce_reports(evse.take_reports());

        for event in events {
            let _ = self.updates_tx.send(EvseUpdate::Event { event });
        }
        for attribute in reports {
            // Feature-hidden attributes are not published
            let Ok(value) = self.cluster.read_attribute(attribute) else {
                continue;
            };
            let _ = self
                .updates_tx
                .send(EvseUpdate::AttributeChanged { attribute, value });
        }

        self.snapshot_tx
            .send_replace(Arc::new(Self::build_snapshot(&self.cluster)));
    }

    fn build_snapshot(cluster: &EnergyEvseCluster<EvseStateMachine>) -> EvseSnapshot {
        let evse = cluster.delegate();
        let attrs = evse.attributes();
        EvseSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            endpoint: evse.endpoint(),
            state: attrs.state(),
            supply_state: attrs.supply_state(),
            fault_state: attrs.fault_state(),
            charging_enabled_until: attrs.charging_enabled_until(),
            discharging_enabled_until: attrs.discharging_enabled_until(),
            circuit_capacity: attrs.circuit_capacity(),
            minimum_charge_current: attrs.minimum_charge_current(),
            maximum_charge_current: attrs.maximum_charge_current(),
            maximum_discharge_current: attrs.maximum_discharge_current(),
            user_maximum_charge_current: attrs.user_maximum_charge_current(),
            next_charge_target_time: attrs.next_charge_target_time(),
            vehicle_id: attrs.vehicle_id().map(str::to_string),
            session_id: attrs.session_id(),
            session_duration: attrs.session_duration(),
            session_energy_charged: attrs.session_energy_charged(),
            session_energy_discharged: attrs.session_energy_discharged(),
        }
    }
}

/// Merge back-to-back reports of one attribute. Updates carry the value read
/// at publish time, so a repeat adds nothing, except for session attributes
/// whose every write is reported.
fn coalesce_reports(mut reports: Vec<AttributeId>) -> Vec<AttributeId> {
    reports.dedup_by(|next, prev| next == prev && !prev.always_reports());
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_reports_survive_coalescing() {
        let reports = coalesce_reports(vec![
            AttributeId::State,
            AttributeId::State,
            AttributeId::SessionDuration,
            AttributeId::SessionDuration,
            AttributeId::SupplyState,
            AttributeId::SessionEnergyCharged,
            AttributeId::SessionEnergyCharged,
        ]);
        assert_eq!(
            reports,
            vec![
                AttributeId::State,
                AttributeId::SessionDuration,
                AttributeId::SessionDuration,
                AttributeId::SupplyState,
                AttributeId::SessionEnergyCharged,
                AttributeId::SessionEnergyCharged,
            ]
        );
    }
}
