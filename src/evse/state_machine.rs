//! The EVSE state machine
//!
//! Hardware inputs (plug/demand state, faults, limits) and cluster commands
//! (enable, disable, diagnostics) are turned into transitions of `State` and
//! `SupplyState`. Transitions start and stop sessions, recompute the current
//! limits, emit cluster events and tell the application what changed.
//!
//! All methods run to completion on the caller's thread. The owner is
//! responsible for serializing calls, including timer expiries delivered
//! through [`EvseStateMachine::on_timer_expired`].

use super::attributes::{AttributeId, EvseAttributes};
use super::delegate::EvseDelegate;
use super::events::EvseEvent;
use super::limits::CurrentLimitResolver;
use super::notifier::{ApplicationNotifier, EvseCallback, EvseCallbackHandler};
use super::scheduler::{EnableWindowScheduler, SchedulePlan, is_expired};
use super::session::EvseSession;
use super::targets::{ChargingTargetSchedule, TargetsStore};
use super::types::{
    EnergyTransferStoppedReason, FaultState, HwState, MeterKind, State, SupplyState,
};
use crate::clock::Clock;
use crate::config::{Config, EvseConfig, EvseFeatures, MINIMUM_MAINS_VOLTAGE_MV};
use crate::error::{CommandError, CommandResult, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::persistence::{ENERGY_EVSE_CLUSTER, PersistenceManager, attribute_key};
use crate::timer::{TimerService, TimerToken};
use chrono_tz::Tz;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Persistence key of the charging targets
const TARGETS_KEY: &str = "ChargingTargets";

/// State and SupplyState saved when a fault is raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub state: State,
    pub supply_state: SupplyState,
}

/// EVSE engine for one endpoint
pub struct EvseStateMachine {
    endpoint: u16,
    features: EvseFeatures,
    attrs: EvseAttributes,

    /// Last raw state reported by the hardware
    hw_state: HwState,
    limits: CurrentLimitResolver,
    nominal_mains_voltage_mv: i64,

    session: EvseSession,
    /// Meter readings when the current energy transfer started (mWh)
    import_baseline: i64,
    export_baseline: i64,

    fault_snapshot: Option<FaultSnapshot>,

    notifier: ApplicationNotifier,
    scheduler: EnableWindowScheduler,
    timers: Box<dyn TimerService>,
    clock: Arc<dyn Clock>,

    targets: TargetsStore,
    timezone: Tz,

    persistence: Option<PersistenceManager>,
    events: Vec<EvseEvent>,
    logger: StructuredLogger,
}

impl EvseStateMachine {
    /// Build an engine with hardware defaults from `config`
    pub fn new(
        endpoint: u16,
        config: &EvseConfig,
        timezone: Tz,
        clock: Arc<dyn Clock>,
        timers: Box<dyn TimerService>,
    ) -> Result<Self> {
        let mut attrs = EvseAttributes::new();
        attrs.set_circuit_capacity(config.circuit_capacity_ma)?;
        attrs.set_user_maximum_charge_current(config.user_max_charge_current_ma)?;
        attrs.take_reports();

        let logger = get_logger_with_context(LogContext::new("evse").with_endpoint(endpoint));
        logger.info(&format!(
            "EVSE engine created (hardware limit {} mA, circuit {} mA, cable {} mA)",
            config.max_hardware_charge_current_ma,
            config.circuit_capacity_ma,
            config.cable_assembly_limit_ma
        ));

        Ok(Self {
            endpoint,
            features: config.features(),
            attrs,
            hw_state: HwState::NotPluggedIn,
            limits: CurrentLimitResolver::new(
                config.max_hardware_charge_current_ma,
                config.max_hardware_discharge_current_ma,
                config.cable_assembly_limit_ma,
            ),
            nominal_mains_voltage_mv: config.nominal_mains_voltage_mv,
            session: EvseSession::new(),
            import_baseline: 0,
            export_baseline: 0,
            fault_snapshot: None,
            notifier: ApplicationNotifier::new(),
            scheduler: EnableWindowScheduler::new(Duration::from_secs(u64::from(
                config.clock_retry_secs,
            ))),
            timers,
            clock,
            targets: TargetsStore::new(),
            timezone,
            persistence: None,
            events: Vec::new(),
            logger,
        })
    }

    /// Validate `config`, build the engine and restore persisted attributes
    pub fn from_config(
        config: &Config,
        clock: Arc<dyn Clock>,
        timers: Box<dyn TimerService>,
    ) -> Result<Self> {
        config.validate()?;
        let machine = Self::new(config.endpoint, &config.evse, config.tz()?, clock, timers)?;
        if !config.persistence.enabled {
            return Ok(machine);
        }
        let persistence = PersistenceManager::open(&config.persistence.path)?;
        Ok(machine.with_persistence(persistence))
    }

    /// Restore durable attributes and targets from `persistence` and keep
    /// writing changes to it
    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        let key = |attribute: AttributeId| {
            attribute_key(self.endpoint, ENERGY_EVSE_CLUSTER, attribute.name())
        };

        if let Some(until) = persistence.get::<Option<u32>>(&key(AttributeId::ChargingEnabledUntil)) {
            self.attrs.set_charging_enabled_until(until);
        }
        if let Some(until) =
            persistence.get::<Option<u32>>(&key(AttributeId::DischargingEnabledUntil))
        {
            self.attrs.set_discharging_enabled_until(until);
        }
        if let Some(current) = persistence.get::<i64>(&key(AttributeId::UserMaximumChargeCurrent))
            && let Err(e) = self.attrs.set_user_maximum_charge_current(current)
        {
            self.logger
                .warn(&format!("Ignoring persisted UserMaximumChargeCurrent: {}", e));
        }
        if let Some(window) = persistence.get::<u32>(&key(AttributeId::RandomizationDelayWindow))
            && let Err(e) = self.attrs.set_randomization_delay_window(window)
        {
            self.logger
                .warn(&format!("Ignoring persisted RandomizationDelayWindow: {}", e));
        }
        if let Some(efficiency) =
            persistence.get::<Option<u16>>(&key(AttributeId::ApproximateEvEfficiency))
        {
            self.attrs.set_approximate_ev_efficiency(efficiency);
        }
        let targets_key = attribute_key(self.endpoint, ENERGY_EVSE_CLUSTER, TARGETS_KEY);
        if let Some(targets) = persistence.get::<TargetsStore>(&targets_key) {
            self.targets = targets;
        }

        let restored = self.attrs.take_reports();
        self.logger.info(&format!(
            "Restored {} attributes and {} charging targets from {}",
            restored.len(),
            self.targets.len(),
            persistence.file_path()
        ));

        self.persistence = Some(persistence);
        self.update_next_charge_attributes();
        self.attrs.take_reports();
        self
    }

    pub fn endpoint(&self) -> u16 {
        self.endpoint
    }

    pub fn features(&self) -> EvseFeatures {
        self.features
    }

    pub fn attributes(&self) -> &EvseAttributes {
        &self.attrs
    }

    pub fn hw_state(&self) -> HwState {
        self.hw_state
    }

    pub fn fault_snapshot(&self) -> Option<FaultSnapshot> {
        self.fault_snapshot
    }

    pub fn session(&self) -> &EvseSession {
        &self.session
    }

    pub fn limits(&self) -> &CurrentLimitResolver {
        &self.limits
    }

    pub fn nominal_mains_voltage_mv(&self) -> i64 {
        self.nominal_mains_voltage_mv
    }

    /// Events emitted since the last call, oldest first
    pub fn take_events(&mut self) -> Vec<EvseEvent> {
        std::mem::take(&mut self.events)
    }

    /// Attribute change reports since the last call, oldest first
    pub fn take_reports(&mut self) -> Vec<AttributeId> {
        self.attrs.take_reports()
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Stop all energy transfer and clear both enable windows
    pub fn disable(&mut self) -> CommandResult {
        self.logger.info("Disable");
        self.check_fault_or_diagnostic()?;

        self.update_charging_enabled_until(Some(0));
        self.update_discharging_enabled_until(Some(0));
        self.attrs.set_minimum_charge_current(0)?;

        self.limits.command_max_charge = 0;
        self.compute_max_charge_current_limit();
        self.limits.command_max_discharge = 0;
        self.compute_max_discharge_current_limit();

        self.handle_disabled()
    }

    /// Allow charging until `charging_enabled_until` (None = indefinitely)
    pub fn enable_charging(
        &mut self,
        charging_enabled_until: Option<u32>,
        minimum_charge_current: i64,
        maximum_charge_current: i64,
    ) -> CommandResult {
        self.logger.info(&format!(
            "EnableCharging until {:?}, min {} mA, max {} mA",
            charging_enabled_until, minimum_charge_current, maximum_charge_current
        ));

        if maximum_charge_current < 0
            || minimum_charge_current < 0
            || minimum_charge_current > maximum_charge_current
        {
            self.logger.error("EnableCharging current limits out of range");
            return Err(CommandError::ConstraintError);
        }
        self.check_fault_or_diagnostic()?;

        self.update_charging_enabled_until(charging_enabled_until);
        self.limits.command_max_charge = maximum_charge_current;
        self.attrs.set_minimum_charge_current(minimum_charge_current)?;
        self.compute_max_charge_current_limit();

        self.handle_charging_enabled()
    }

    /// Allow discharging until `discharging_enabled_until` (None = indefinitely)
    pub fn enable_discharging(
        &mut self,
        discharging_enabled_until: Option<u32>,
        maximum_discharge_current: i64,
    ) -> CommandResult {
        self.logger.info(&format!(
            "EnableDischarging until {:?}, max {} mA",
            discharging_enabled_until, maximum_discharge_current
        ));

        if maximum_discharge_current < 0 {
            self.logger.error("EnableDischarging current limit out of range");
            return Err(CommandError::ConstraintError);
        }
        self.check_fault_or_diagnostic()?;

        self.update_discharging_enabled_until(discharging_enabled_until);
        self.limits.command_max_discharge = maximum_discharge_current;
        self.compute_max_discharge_current_limit();

        self.handle_discharging_enabled()
    }

    /// Enter diagnostics; only allowed while Disabled
    pub fn start_diagnostics(&mut self) -> CommandResult {
        if self.attrs.supply_state() != SupplyState::Disabled {
            self.logger.error(&format!(
                "StartDiagnostics rejected in supply state {:?}",
                self.attrs.supply_state()
            ));
            return Err(CommandError::Failure);
        }
        self.update_supply_state(SupplyState::DisabledDiagnostics);
        Ok(())
    }

    pub fn set_targets(&mut self, schedules: &[ChargingTargetSchedule]) -> CommandResult {
        self.targets.set(schedules)?;
        self.logger.info(&format!(
            "Charging targets updated ({} targets)",
            self.targets.len()
        ));
        self.persist_targets();
        self.notifier.notify(EvseCallback::ChargingPreferencesChanged);
        self.update_next_charge_attributes();
        Ok(())
    }

    pub fn get_targets(&self) -> Vec<ChargingTargetSchedule> {
        self.targets.get()
    }

    pub fn clear_targets(&mut self) -> CommandResult {
        self.targets.clear();
        self.logger.info("Charging targets cleared");
        self.persist_targets();
        self.notifier.notify(EvseCallback::ChargingPreferencesChanged);
        self.update_next_charge_attributes();
        Ok(())
    }

    /// Store a new user limit; recomputes the charge limit and persists on change
    pub fn set_user_maximum_charge_current(&mut self, value: i64) -> CommandResult<bool> {
        if !self.attrs.set_user_maximum_charge_current(value)? {
            return Ok(false);
        }
        self.logger
            .info(&format!("UserMaximumChargeCurrent updated to {} mA", value));
        self.compute_max_charge_current_limit();
        self.persist(AttributeId::UserMaximumChargeCurrent, value);
        Ok(true)
    }

    pub fn set_randomization_delay_window(&mut self, value: u32) -> CommandResult<bool> {
        if !self.attrs.set_randomization_delay_window(value)? {
            return Ok(false);
        }
        self.logger
            .info(&format!("RandomizationDelayWindow updated to {} s", value));
        self.persist(AttributeId::RandomizationDelayWindow, value);
        Ok(true)
    }

    pub fn set_approximate_ev_efficiency(&mut self, value: Option<u16>) -> CommandResult<bool> {
        if !self.attrs.set_approximate_ev_efficiency(value) {
            return Ok(false);
        }
        self.logger
            .info(&format!("ApproximateEVEfficiency updated to {:?}", value));
        self.persist(AttributeId::ApproximateEvEfficiency, value);
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Hardware interface
    // ---------------------------------------------------------------------

    /// Register the application callback; only once
    pub fn hw_register_evse_callback_handler(&mut self, handler: EvseCallbackHandler) -> CommandResult {
        self.notifier.register(handler).inspect_err(|_| {
            self.logger.error("Callback handler already registered");
        })
    }

    pub fn hw_set_max_hardware_charge_current_limit(&mut self, current: i64) -> CommandResult {
        if current < 0 {
            return Err(CommandError::ConstraintError);
        }
        self.limits.hardware_max_charge = current;
        self.compute_max_charge_current_limit();
        Ok(())
    }

    pub fn hw_set_max_hardware_discharge_current_limit(&mut self, current: i64) -> CommandResult {
        if current < 0 {
            return Err(CommandError::ConstraintError);
        }
        self.limits.hardware_max_discharge = current;
        self.compute_max_discharge_current_limit();
        Ok(())
    }

    pub fn hw_set_circuit_capacity(&mut self, current: i64) -> CommandResult {
        self.attrs.set_circuit_capacity(current)?;
        self.compute_max_charge_current_limit();
        self.compute_max_discharge_current_limit();
        Ok(())
    }

    pub fn hw_set_cable_assembly_limit(&mut self, current: i64) -> CommandResult {
        if current < 0 {
            return Err(CommandError::ConstraintError);
        }
        self.limits.cable_assembly_limit = current;
        self.compute_max_charge_current_limit();
        self.compute_max_discharge_current_limit();
        Ok(())
    }

    pub fn hw_set_nominal_mains_voltage(&mut self, millivolts: i64) -> CommandResult {
        if millivolts < MINIMUM_MAINS_VOLTAGE_MV {
            self.logger.error(&format!(
                "Mains voltage {} mV looks too low, value must be in mV",
                millivolts
            ));
            return Err(CommandError::ConstraintError);
        }
        self.nominal_mains_voltage_mv = millivolts;
        Ok(())
    }

    /// Raw plug/demand state from the hardware.
    ///
    /// Anything other than NotPluggedIn, PluggedInNoDemand or
    /// PluggedInDemand is a Failure.
    pub fn hw_set_state(&mut self, new_state: State) -> CommandResult {
        let new_state = HwState::try_from(new_state).inspect_err(|_| {
            self.logger
                .error(&format!("HwSetState received invalid state {:?}", new_state));
        })?;

        let previous = self.hw_state;
        if previous == new_state {
            return Ok(());
        }
        self.hw_state = new_state;
        self.logger.debug(&format!(
            "Hardware state {:?} -> {:?}",
            previous, new_state
        ));

        if self.fault_snapshot.is_some() {
            self.handle_hw_state_during_fault(previous, new_state);
            return Ok(());
        }

        match (previous, new_state) {
            (HwState::NotPluggedIn, HwState::PluggedInNoDemand) => self.handle_ev_plugged_in(),
            (HwState::NotPluggedIn, HwState::PluggedInDemand) => {
                self.handle_ev_plugged_in();
                self.handle_ev_demand();
            }
            (HwState::PluggedInNoDemand, HwState::PluggedInDemand) => self.handle_ev_demand(),
            (HwState::PluggedInDemand, HwState::PluggedInNoDemand) => self.handle_ev_no_demand(),
            (_, HwState::NotPluggedIn) => self.handle_ev_not_detected(),
            _ => {}
        }
        Ok(())
    }

    /// Fault reported by the hardware. Setting the current fault again is a Failure.
    pub fn hw_set_fault(&mut self, new_fault: FaultState) -> CommandResult {
        let previous = self.attrs.fault_state();
        if new_fault == previous {
            self.logger
                .error(&format!("HwSetFault: fault {} already set", new_fault));
            return Err(CommandError::Failure);
        }
        self.logger
            .warn(&format!("Fault state {} -> {}", previous, new_fault));

        self.emit(EvseEvent::Fault {
            session_id: self.attrs.session_id(),
            state: self.attrs.state(),
            fault_state_previous_state: previous,
            fault_state_current_state: new_fault,
        });
        self.attrs.set_fault_state(new_fault);

        if new_fault == FaultState::NoError {
            self.handle_fault_cleared()
        } else {
            self.handle_fault_raised();
            Ok(())
        }
    }

    /// An RFID card was presented
    pub fn hw_set_rfid(&mut self, uid: &[u8]) -> CommandResult {
        self.emit(EvseEvent::Rfid { uid: uid.to_vec() });
        Ok(())
    }

    /// Vehicle id read from the vehicle; empty clears it
    pub fn hw_set_vehicle_id(&mut self, vehicle_id: &str) -> CommandResult {
        let value = (!vehicle_id.is_empty()).then(|| vehicle_id.to_string());
        if self.attrs.set_vehicle_id(value)? {
            self.logger
                .info(&format!("VehicleID updated to {:?}", self.attrs.vehicle_id()));
        }
        Ok(())
    }

    pub fn hw_vehicle_id(&self) -> Option<&str> {
        self.attrs.vehicle_id()
    }

    /// Diagnostics finished; only valid while in DisabledDiagnostics
    pub fn hw_diagnostics_complete(&mut self) -> CommandResult {
        if self.attrs.supply_state() != SupplyState::DisabledDiagnostics {
            self.logger
                .error("Diagnostics complete reported while not in diagnostics");
            return Err(CommandError::Failure);
        }
        self.update_supply_state(SupplyState::Disabled);
        Ok(())
    }

    pub fn hw_set_state_of_charge(&mut self, percent: Option<u8>) -> CommandResult {
        self.attrs.set_state_of_charge(percent)?;
        Ok(())
    }

    pub fn hw_set_battery_capacity(&mut self, capacity_mwh: Option<i64>) -> CommandResult {
        self.attrs.set_battery_capacity(capacity_mwh)?;
        Ok(())
    }

    /// Refresh the session duration and energy from live readings
    pub fn refresh_session(&mut self) {
        // A fault does not end the session, unplugging does
        if self.hw_state == HwState::NotPluggedIn || self.session.start_time().is_none() {
            return;
        }
        let charged = self.notifier.read_meter(MeterKind::Charging);
        let discharged = self.notifier.read_meter(MeterKind::Discharging);
        self.session
            .recalculate_duration(&mut self.attrs, self.clock.as_ref());
        self.session.update_energy_charged(&mut self.attrs, charged);
        self.session
            .update_energy_discharged(&mut self.attrs, discharged);
    }

    /// Deliver a timer expiry
    pub fn on_timer_expired(&mut self, token: TimerToken) {
        match token {
            TimerToken::EnableWindowCheck => self.schedule_check_on_enabled_timeout(),
            other => self
                .logger
                .warn(&format!("Ignoring unrelated timer {:?}", other)),
        }
    }

    // ---------------------------------------------------------------------
    // Transition handlers
    // ---------------------------------------------------------------------

    fn handle_ev_plugged_in(&mut self) {
        if self.attrs.state() != State::NotPluggedIn {
            return;
        }
        let charged = self.notifier.read_meter(MeterKind::Charging);
        let discharged = self.notifier.read_meter(MeterKind::Discharging);
        if let Err(e) = self
            .session
            .start(&mut self.attrs, self.clock.as_ref(), charged, discharged)
        {
            self.logger
                .error(&format!("Unable to start session: {}", e));
        }
        self.update_next_charge_attributes();
        self.send_ev_connected_event();
        self.update_state(self.hw_state.into());
    }

    fn handle_ev_not_detected(&mut self) {
        if self.attrs.state().is_transferring() {
            // Unplugged mid-transfer without a NoDemand first
            self.send_energy_transfer_stopped_event(EnergyTransferStoppedReason::Other);
        }

        let charged = self.notifier.read_meter(MeterKind::Charging);
        let discharged = self.notifier.read_meter(MeterKind::Discharging);
        self.session
            .stop(&mut self.attrs, self.clock.as_ref(), charged, discharged);
        self.send_ev_not_detected_event();
        self.update_state(State::NotPluggedIn);
    }

    fn handle_ev_no_demand(&mut self) {
        if self.attrs.state().is_transferring() {
            self.session
                .recalculate_duration(&mut self.attrs, self.clock.as_ref());
            self.send_energy_transfer_stopped_event(EnergyTransferStoppedReason::EvStopped);
        }
        self.update_state(State::PluggedInNoDemand);
    }

    fn handle_ev_demand(&mut self) {
        match self.attrs.supply_state() {
            SupplyState::ChargingEnabled => {
                self.compute_max_charge_current_limit();
                self.update_state(State::PluggedInCharging);
                self.send_energy_transfer_started_event();
            }
            SupplyState::DischargingEnabled => {
                self.compute_max_discharge_current_limit();
                self.update_state(State::PluggedInDischarging);
                self.send_energy_transfer_started_event();
            }
            SupplyState::Enabled => {
                // Demand starts a charge; discharging is driven by power adjustment
                self.compute_max_charge_current_limit();
                self.compute_max_discharge_current_limit();
                self.update_state(State::PluggedInCharging);
                self.send_energy_transfer_started_event();
            }
            SupplyState::Disabled
            | SupplyState::DisabledError
            | SupplyState::DisabledDiagnostics => {
                self.update_state(State::PluggedInDemand);
            }
        }
    }

    /// Plug and demand changes while a fault holds State at Fault.
    ///
    /// Only the saved pre-fault state follows the hardware, so clearing the
    /// fault restores what the vehicle is doing by then. Session start and
    /// stop still happen immediately.
    fn handle_hw_state_during_fault(&mut self, previous: HwState, new_state: HwState) {
        let Some(pre_fault) = self.fault_snapshot.map(|s| s.state) else {
            return;
        };

        match (previous, new_state) {
            (HwState::NotPluggedIn, _) => {
                let charged = self.notifier.read_meter(MeterKind::Charging);
                let discharged = self.notifier.read_meter(MeterKind::Discharging);
                if let Err(e) = self
                    .session
                    .start(&mut self.attrs, self.clock.as_ref(), charged, discharged)
                {
                    self.logger
                        .error(&format!("Unable to start session: {}", e));
                }
                self.update_next_charge_attributes();
                self.send_ev_connected_event();
            }
            (_, HwState::NotPluggedIn) => {
                if pre_fault.is_transferring() {
                    self.send_energy_transfer_stopped_event(EnergyTransferStoppedReason::Other);
                }
                let charged = self.notifier.read_meter(MeterKind::Charging);
                let discharged = self.notifier.read_meter(MeterKind::Discharging);
                self.session
                    .stop(&mut self.attrs, self.clock.as_ref(), charged, discharged);
                self.send_ev_not_detected_event();
            }
            (HwState::PluggedInDemand, HwState::PluggedInNoDemand) => {
                if pre_fault.is_transferring() {
                    self.session
                        .recalculate_duration(&mut self.attrs, self.clock.as_ref());
                    self.send_energy_transfer_stopped_event(EnergyTransferStoppedReason::EvStopped);
                }
            }
            _ => {}
        }

        if let Some(snapshot) = self.fault_snapshot.as_mut() {
            snapshot.state = new_state.into();
        }
    }

    fn handle_charging_enabled(&mut self) -> CommandResult {
        self.check_fault_or_diagnostic()?;

        match self.attrs.supply_state() {
            SupplyState::Disabled => self.update_supply_state(SupplyState::ChargingEnabled),
            SupplyState::DischargingEnabled => self.update_supply_state(SupplyState::Enabled),
            _ => {}
        }

        if self.attrs.state() == State::PluggedInDemand {
            self.compute_max_charge_current_limit();
            self.update_state(State::PluggedInCharging);
            self.send_energy_transfer_started_event();
        }

        self.schedule_check_on_enabled_timeout();
        Ok(())
    }

    fn handle_discharging_enabled(&mut self) -> CommandResult {
        self.check_fault_or_diagnostic()?;

        match self.attrs.supply_state() {
            SupplyState::Disabled => self.update_supply_state(SupplyState::DischargingEnabled),
            SupplyState::ChargingEnabled => self.update_supply_state(SupplyState::Enabled),
            _ => {}
        }

        // Discharging itself is started by power adjustment, not here
        if matches!(
            self.attrs.state(),
            State::PluggedInDemand | State::PluggedInCharging
        ) {
            self.compute_max_discharge_current_limit();
        }

        self.schedule_check_on_enabled_timeout();
        Ok(())
    }

    fn handle_disabled(&mut self) -> CommandResult {
        self.check_fault_or_diagnostic()?;

        self.update_supply_state(SupplyState::Disabled);
        if self.attrs.state().is_transferring() {
            self.send_energy_transfer_stopped_event(EnergyTransferStoppedReason::EvseStopped);
            self.update_state(self.hw_state.into());
        }

        self.schedule_check_on_enabled_timeout();
        Ok(())
    }

    fn handle_fault_raised(&mut self) {
        if self.fault_snapshot.is_none() {
            self.fault_snapshot = Some(FaultSnapshot {
                state: self.attrs.state(),
                supply_state: self.attrs.supply_state(),
            });
        }
        self.update_state(State::Fault);
        self.update_supply_state(SupplyState::DisabledError);
        self.schedule_check_on_enabled_timeout();
    }

    fn handle_fault_cleared(&mut self) -> CommandResult {
        let Some(snapshot) = self.fault_snapshot.take() else {
            self.logger
                .error("Fault cleared but no pre-fault state was saved");
            return Err(CommandError::Failure);
        };
        self.update_state(snapshot.state);
        self.update_supply_state(snapshot.supply_state);
        // Demand that arrived during the fault starts a transfer now
        if snapshot.state == State::PluggedInDemand {
            self.handle_ev_demand();
        }
        self.schedule_check_on_enabled_timeout();
        Ok(())
    }

    fn check_fault_or_diagnostic(&self) -> CommandResult {
        if self.attrs.fault_state() != FaultState::NoError {
            self.logger
                .error("Command rejected while a fault is present");
            return Err(CommandError::Failure);
        }
        if self.attrs.supply_state() == SupplyState::DisabledDiagnostics {
            self.logger
                .error("Command rejected while in diagnostics mode");
            return Err(CommandError::Failure);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Enable windows
    // ---------------------------------------------------------------------

    fn schedule_check_on_enabled_timeout(&mut self) {
        let supply_state = self.attrs.supply_state();
        let plan = self.scheduler.plan(
            supply_state,
            self.attrs.charging_enabled_until(),
            self.attrs.discharging_enabled_until(),
            self.clock.now_epoch_seconds(),
        );

        match plan {
            SchedulePlan::NoTimer => self.timers.cancel(TimerToken::EnableWindowCheck),
            SchedulePlan::RetryClock(delay) => {
                self.logger.warn(&format!(
                    "Real time clock not synchronized, checking enable window again in {}s",
                    delay.as_secs()
                ));
                self.timers.arm(TimerToken::EnableWindowCheck, delay);
            }
            SchedulePlan::Arm(delay) => {
                self.logger.debug(&format!(
                    "Enable window check in {}s",
                    delay.as_secs()
                ));
                self.timers.arm(TimerToken::EnableWindowCheck, delay);
            }
            SchedulePlan::Expired { now } => {
                self.timers.cancel(TimerToken::EnableWindowCheck);
                match supply_state {
                    SupplyState::ChargingEnabled | SupplyState::DischargingEnabled => {
                        self.logger.info("Enable window expired, disabling");
                        if let Err(e) = self.disable() {
                            self.logger
                                .error(&format!("Disable on window expiry failed: {}", e));
                        }
                    }
                    SupplyState::Enabled => {
                        self.handle_enabled_state_expiration(now);
                        self.schedule_check_on_enabled_timeout();
                    }
                    _ => {}
                }
            }
        }
    }

    /// Both directions enabled and at least one window ran out
    fn handle_enabled_state_expiration(&mut self, now: u32) {
        let charging_expired = is_expired(self.attrs.charging_enabled_until(), now);
        let discharging_expired = is_expired(self.attrs.discharging_enabled_until(), now);

        if charging_expired && discharging_expired {
            self.logger.info("Charging and discharging windows expired");
            if let Err(e) = self.disable() {
                self.logger
                    .error(&format!("Disable on window expiry failed: {}", e));
            }
            return;
        }

        if charging_expired {
            self.logger.info("Charging window expired");
            self.update_charging_enabled_until(Some(0));
            if let Err(e) = self.attrs.set_minimum_charge_current(0) {
                self.logger.error(&format!("{}", e));
            }
            self.limits.command_max_charge = 0;
            self.compute_max_charge_current_limit();
            self.update_supply_state(SupplyState::DischargingEnabled);
        }

        if discharging_expired {
            self.logger.info("Discharging window expired");
            self.update_discharging_enabled_until(Some(0));
            self.limits.command_max_discharge = 0;
            self.compute_max_discharge_current_limit();
            self.update_supply_state(SupplyState::ChargingEnabled);
        }
    }

    // ---------------------------------------------------------------------
    // Limits, attributes and notifications
    // ---------------------------------------------------------------------

    fn compute_max_charge_current_limit(&mut self) {
        let Some(limit) = self.limits.resolve_charge(
            self.attrs.circuit_capacity(),
            self.attrs.user_maximum_charge_current(),
        ) else {
            return;
        };
        if let Err(e) = self.attrs.set_maximum_charge_current(limit) {
            self.logger
                .error(&format!("Charge limit {} mA rejected: {}", limit, e));
            return;
        }
        self.logger
            .info(&format!("Maximum charge current now {} mA", limit));
        self.notifier.notify(EvseCallback::ChargeCurrentChanged {
            maximum_charge_current: limit,
            minimum_charge_current: self.attrs.minimum_charge_current(),
            nominal_mains_voltage_mv: self.nominal_mains_voltage_mv,
        });
    }

    fn compute_max_discharge_current_limit(&mut self) {
        let Some(limit) = self
            .limits
            .resolve_discharge(self.attrs.circuit_capacity())
        else {
            return;
        };
        if let Err(e) = self.attrs.set_maximum_discharge_current(limit) {
            self.logger
                .error(&format!("Discharge limit {} mA rejected: {}", limit, e));
            return;
        }
        self.logger
            .info(&format!("Maximum discharge current now {} mA", limit));
        self.notifier.notify(EvseCallback::DischargeCurrentChanged {
            maximum_discharge_current: limit,
            nominal_mains_voltage_mv: self.nominal_mains_voltage_mv,
        });
    }

    fn update_state(&mut self, state: State) {
        if self.attrs.set_state(state) {
            self.logger.info(&format!("State -> {:?}", state));
            self.notify_state_change();
        }
    }

    fn update_supply_state(&mut self, supply_state: SupplyState) {
        if self.attrs.set_supply_state(supply_state) {
            self.logger
                .info(&format!("SupplyState -> {:?}", supply_state));
            self.notify_state_change();
        }
    }

    fn notify_state_change(&mut self) {
        self.notifier.notify(EvseCallback::StateChanged {
            state: self.attrs.state(),
            supply_state: self.attrs.supply_state(),
        });
    }

    fn update_charging_enabled_until(&mut self, until: Option<u32>) {
        if self.attrs.set_charging_enabled_until(until) {
            self.persist(AttributeId::ChargingEnabledUntil, until);
        }
    }

    fn update_discharging_enabled_until(&mut self, until: Option<u32>) {
        if self.attrs.set_discharging_enabled_until(until) {
            self.persist(AttributeId::DischargingEnabledUntil, until);
        }
    }

    fn update_next_charge_attributes(&mut self) {
        if !self.features.charging_preferences {
            return;
        }
        let next = self
            .clock
            .now_epoch_seconds()
            .ok()
            .and_then(|now| self.targets.next_target(now, self.timezone));

        self.attrs
            .set_next_charge_target_time(next.map(|t| t.target_time));
        if let Err(e) = self
            .attrs
            .set_next_charge_target_soc(next.and_then(|t| t.target_soc))
        {
            self.logger.error(&format!("NextChargeTargetSoC: {}", e));
        }
        if let Err(e) = self
            .attrs
            .set_next_charge_required_energy(next.and_then(|t| t.added_energy))
        {
            self.logger.error(&format!("NextChargeRequiredEnergy: {}", e));
        }
    }

    fn persist<T: Serialize>(&mut self, attribute: AttributeId, value: T) {
        let Some(persistence) = self.persistence.as_mut() else {
            return;
        };
        let key = attribute_key(self.endpoint, ENERGY_EVSE_CLUSTER, attribute.name());
        if let Err(e) = persistence.store(&key, value) {
            self.logger
                .warn(&format!("Failed to persist {}: {}", key, e));
        }
    }

    fn persist_targets(&mut self) {
        let targets = self.targets.clone();
        let Some(persistence) = self.persistence.as_mut() else {
            return;
        };
        let key = attribute_key(self.endpoint, ENERGY_EVSE_CLUSTER, TARGETS_KEY);
        if let Err(e) = persistence.store(&key, targets) {
            self.logger
                .warn(&format!("Failed to persist charging targets: {}", e));
        }
    }

    /// Read a persisted value for this endpoint's EVSE cluster
    pub fn persisted<T: DeserializeOwned>(&self, attribute: AttributeId) -> Option<T> {
        let key = attribute_key(self.endpoint, ENERGY_EVSE_CLUSTER, attribute.name());
        self.persistence.as_ref()?.get(&key)
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    fn emit(&mut self, event: EvseEvent) {
        self.logger.info(&format!("Event {}", event.name()));
        self.events.push(event);
    }

    fn require_session_id(&self, event: &str) -> Option<u32> {
        let session_id = self.attrs.session_id();
        if session_id.is_none() {
            self.logger
                .error(&format!("Cannot send {} without a session id", event));
        }
        session_id
    }

    fn send_ev_connected_event(&mut self) {
        let Some(session_id) = self.require_session_id("EVConnected") else {
            return;
        };
        self.emit(EvseEvent::EvConnected { session_id });
    }

    fn send_ev_not_detected_event(&mut self) {
        let Some(session_id) = self.require_session_id("EVNotDetected") else {
            return;
        };
        self.emit(EvseEvent::EvNotDetected {
            session_id,
            state: self.attrs.state(),
            session_duration: self.attrs.session_duration().unwrap_or(0),
            session_energy_charged: self.attrs.session_energy_charged().unwrap_or(0),
            session_energy_discharged: self
                .features
                .v2x
                .then(|| self.attrs.session_energy_discharged().unwrap_or(0)),
        });
    }

    fn send_energy_transfer_started_event(&mut self) {
        let Some(session_id) = self.require_session_id("EnergyTransferStarted") else {
            return;
        };

        self.import_baseline = self.notifier.read_meter(MeterKind::Charging);
        let maximum_discharge_current = if self.features.v2x {
            self.export_baseline = self.notifier.read_meter(MeterKind::Discharging);
            Some(self.attrs.maximum_discharge_current())
        } else {
            self.export_baseline = 0;
            None
        };

        self.emit(EvseEvent::EnergyTransferStarted {
            session_id,
            state: self.attrs.state(),
            maximum_current: self.attrs.maximum_charge_current(),
            maximum_discharge_current,
        });
    }

    fn send_energy_transfer_stopped_event(&mut self, reason: EnergyTransferStoppedReason) {
        let Some(session_id) = self.require_session_id("EnergyTransferStopped") else {
            return;
        };

        let imported = self.notifier.read_meter(MeterKind::Charging);
        let energy_discharged = if self.features.v2x {
            let exported = self.notifier.read_meter(MeterKind::Discharging);
            Some(self.export_baseline.saturating_sub(exported))
        } else {
            None
        };

        self.emit(EvseEvent::EnergyTransferStopped {
            session_id,
            state: self.attrs.state(),
            reason,
            energy_transferred: imported.saturating_sub(self.import_baseline),
            energy_discharged,
        });
    }
}

impl EvseDelegate for EvseStateMachine {
    fn attributes(&self) -> &EvseAttributes {
        &self.attrs
    }

    fn disable(&mut self) -> CommandResult {
        EvseStateMachine::disable(self)
    }

    fn enable_charging(
        &mut self,
        charging_enabled_until: Option<u32>,
        minimum_charge_current: i64,
        maximum_charge_current: i64,
    ) -> CommandResult {
        EvseStateMachine::enable_charging(
            self,
            charging_enabled_until,
            minimum_charge_current,
            maximum_charge_current,
        )
    }

    fn enable_discharging(
        &mut self,
        discharging_enabled_until: Option<u32>,
        maximum_discharge_current: i64,
    ) -> CommandResult {
        EvseStateMachine::enable_discharging(self, discharging_enabled_until, maximum_discharge_current)
    }

    fn start_diagnostics(&mut self) -> CommandResult {
        EvseStateMachine::start_diagnostics(self)
    }

    fn set_targets(&mut self, schedules: &[ChargingTargetSchedule]) -> CommandResult {
        EvseStateMachine::set_targets(self, schedules)
    }

    fn get_targets(&self) -> CommandResult<Vec<ChargingTargetSchedule>> {
        Ok(EvseStateMachine::get_targets(self))
    }

    fn clear_targets(&mut self) -> CommandResult {
        EvseStateMachine::clear_targets(self)
    }

    fn write_user_maximum_charge_current(&mut self, value: i64) -> CommandResult<bool> {
        self.set_user_maximum_charge_current(value)
    }

    fn write_randomization_delay_window(&mut self, value: u32) -> CommandResult<bool> {
        self.set_randomization_delay_window(value)
    }

    fn write_approximate_ev_efficiency(&mut self, value: Option<u16>) -> CommandResult<bool> {
        self.set_approximate_ev_efficiency(value)
    }
}
