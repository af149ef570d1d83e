//! Valve configuration and control
//!
//! Opens and closes a valve through its [`ValveDelegate`], tracks the open
//! duration and auto-closes when it runs out. RemainingDuration is refreshed
//! from a timer and reported at most once per second, except when it turns
//! null or stops being null.

use super::delegate::{ValveDelegate, ValveReply};
use super::types::{ValveAttributeId, ValveAttributeValue, ValveEvent, ValveFault, ValveState};
use crate::clock::Clock;
use crate::config::{ValveConfig, ValveFeatures};
use crate::error::{CommandError, CommandResult, EvseError, Result, WriteOutcome};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::persistence::{PersistenceManager, VALVE_CLUSTER, attribute_key};
use crate::timer::{TimerService, TimerToken};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Minimum interval between RemainingDuration reports
pub const REMAINING_DURATION_REPORT_INTERVAL_MS: u64 = 1_000;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Whether `level` is reachable with `step`. 100 is always allowed.
pub fn complies_with_level_step(level: u8, step: Option<u8>) -> bool {
    match step {
        Some(step) if step > 0 => level == 100 || level % step == 0,
        _ => true,
    }
}

/// RemainingDuration with rate-limited reporting
#[derive(Debug, Default)]
struct RemainingDuration {
    value: Option<u32>,
    last_report_ms: Option<u64>,
}

impl RemainingDuration {
    /// Store `value`; true when the change must be reported
    fn set(&mut self, value: Option<u32>, now_ms: u64) -> bool {
        if value == self.value {
            return false;
        }
        let null_transition = value.is_none() != self.value.is_none();
        let interval_elapsed = self.last_report_ms.is_none_or(|last| {
            now_ms.saturating_sub(last) >= REMAINING_DURATION_REPORT_INTERVAL_MS
        });
        self.value = value;
        if null_transition || interval_elapsed {
            self.last_report_ms = Some(now_ms);
            return true;
        }
        false
    }

    /// Time until another report is allowed
    fn next_report_delay_ms(&self, now_ms: u64) -> u64 {
        let delay = self.last_report_ms.map_or(0, |last| {
            (last + REMAINING_DURATION_REPORT_INTERVAL_MS).saturating_sub(now_ms)
        });
        if delay == 0 {
            REMAINING_DURATION_REPORT_INTERVAL_MS
        } else {
            delay
        }
    }
}

pub struct ValveController {
    endpoint: u16,
    features: ValveFeatures,

    open_duration: Option<u32>,
    default_open_duration: Option<u32>,
    auto_close_time: Option<u64>,
    remaining_duration: RemainingDuration,
    current_state: Option<ValveState>,
    target_state: Option<ValveState>,
    current_level: Option<u8>,
    target_level: Option<u8>,
    default_open_level: u8,
    valve_fault: ValveFault,

    /// Monotonic time the current open duration started at
    duration_started_ms: u64,

    delegate: ValveDelegate,
    timers: Box<dyn TimerService>,
    clock: Arc<dyn Clock>,
    persistence: Option<PersistenceManager>,

    reports: Vec<ValveAttributeId>,
    events: Vec<ValveEvent>,
    logger: StructuredLogger,
}

impl ValveController {
    /// The delegate variant must match the Level feature
    pub fn new(
        endpoint: u16,
        config: &ValveConfig,
        delegate: ValveDelegate,
        clock: Arc<dyn Clock>,
        timers: Box<dyn TimerService>,
    ) -> Result<Self> {
        let features = config.features();
        if features.level != delegate.is_level() {
            return Err(EvseError::config(format!(
                "Valve level feature is {} but the delegate is {:?}",
                features.level, delegate
            )));
        }

        Ok(Self {
            endpoint,
            features,
            open_duration: None,
            default_open_duration: config.default_open_duration_s,
            auto_close_time: None,
            remaining_duration: RemainingDuration::default(),
            current_state: None,
            target_state: None,
            current_level: None,
            target_level: None,
            default_open_level: features.default_open_level.unwrap_or(100),
            valve_fault: ValveFault::NONE,
            duration_started_ms: 0,
            delegate,
            timers,
            clock,
            persistence: None,
            reports: Vec::new(),
            events: Vec::new(),
            logger: get_logger_with_context(LogContext::new("valve").with_endpoint(endpoint)),
        })
    }

    /// Restore the writable defaults and persist later writes
    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        let key = |attribute: ValveAttributeId| {
            attribute_key(self.endpoint, VALVE_CLUSTER, attribute.name())
        };
        if let Some(duration) =
            persistence.get::<Option<u32>>(&key(ValveAttributeId::DefaultOpenDuration))
        {
            self.default_open_duration = duration;
        }
        if self.features.default_open_level.is_some()
            && let Some(level) = persistence.get::<u8>(&key(ValveAttributeId::DefaultOpenLevel))
        {
            if (1..=100).contains(&level) {
                self.default_open_level = level;
            } else {
                self.logger
                    .warn(&format!("Ignoring persisted DefaultOpenLevel {}", level));
            }
        }
        self.persistence = Some(persistence);
        self
    }

    pub fn features(&self) -> ValveFeatures {
        self.features
    }

    pub fn take_reports(&mut self) -> Vec<ValveAttributeId> {
        std::mem::take(&mut self.reports)
    }

    pub fn take_events(&mut self) -> Vec<ValveEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn supports_attribute(&self, id: ValveAttributeId) -> bool {
        match id {
            ValveAttributeId::AutoCloseTime => self.features.time_sync,
            ValveAttributeId::CurrentLevel | ValveAttributeId::TargetLevel => self.features.level,
            ValveAttributeId::DefaultOpenLevel => self.features.default_open_level.is_some(),
            ValveAttributeId::LevelStep => self.features.level_step.is_some(),
            ValveAttributeId::ValveFault => self.features.valve_fault,
            _ => true,
        }
    }

    pub fn read_attribute(&self, id: ValveAttributeId) -> CommandResult<ValveAttributeValue> {
        if !self.supports_attribute(id) {
            return Err(CommandError::UnsupportedAttribute);
        }
        Ok(match id {
            ValveAttributeId::OpenDuration => ValveAttributeValue::NullableSeconds(self.open_duration),
            ValveAttributeId::DefaultOpenDuration => {
                ValveAttributeValue::NullableSeconds(self.default_open_duration)
            }
            ValveAttributeId::AutoCloseTime => {
                ValveAttributeValue::NullableEpochMicros(self.auto_close_time)
            }
            ValveAttributeId::RemainingDuration => {
                ValveAttributeValue::NullableSeconds(self.remaining_duration.value)
            }
            ValveAttributeId::CurrentState => ValveAttributeValue::NullableState(self.current_state),
            ValveAttributeId::TargetState => ValveAttributeValue::NullableState(self.target_state),
            ValveAttributeId::CurrentLevel => ValveAttributeValue::NullablePercent(self.current_level),
            ValveAttributeId::TargetLevel => ValveAttributeValue::NullablePercent(self.target_level),
            ValveAttributeId::DefaultOpenLevel => ValveAttributeValue::Percent(self.default_open_level),
            ValveAttributeId::ValveFault => ValveAttributeValue::Fault(self.valve_fault),
            ValveAttributeId::LevelStep => {
                ValveAttributeValue::Percent(self.features.level_step.unwrap_or(1))
            }
        })
    }

    pub fn open_duration(&self) -> Option<u32> {
        self.open_duration
    }

    pub fn remaining_duration(&self) -> Option<u32> {
        self.remaining_duration.value
    }

    pub fn current_state(&self) -> Option<ValveState> {
        self.current_state
    }

    pub fn target_state(&self) -> Option<ValveState> {
        self.target_state
    }

    pub fn current_level(&self) -> Option<u8> {
        self.current_level
    }

    pub fn target_level(&self) -> Option<u8> {
        self.target_level
    }

    pub fn auto_close_time(&self) -> Option<u64> {
        self.auto_close_time
    }

    pub fn valve_fault(&self) -> ValveFault {
        self.valve_fault
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Open the valve.
    ///
    /// `open_duration`: `None` falls back to DefaultOpenDuration, `Some(None)`
    /// keeps the valve open until closed.
    pub fn open(&mut self, open_duration: Option<Option<u32>>, target_level: Option<u8>) -> CommandResult {
        if !self.features.level && target_level.is_some() {
            return Err(CommandError::ConstraintError);
        }
        if target_level.is_some_and(|level| level > 100) {
            return Err(CommandError::ConstraintError);
        }

        if self.features.level {
            self.open_level(target_level)?;
        } else {
            self.open_no_level()?;
        }

        let duration = open_duration.unwrap_or(self.default_open_duration);
        self.logger.info(&format!("Valve opened for {:?}s", duration));
        self.set_open_duration(duration);
        self.duration_started_ms = self.clock.monotonic_ms();

        if self.features.time_sync {
            let auto_close = duration.and_then(|duration| {
                let now = self.clock.now_epoch_seconds().ok()?;
                Some((u64::from(now) + u64::from(duration)) * MICROS_PER_SECOND)
            });
            self.set_auto_close_time(auto_close);
        }

        self.update_remaining_duration();
        Ok(())
    }

    pub fn close(&mut self) -> CommandResult {
        self.timers.cancel(TimerToken::ValveRemainingDuration);
        self.close_internal()
    }

    pub fn write_default_open_duration(&mut self, value: Option<u32>) -> CommandResult<WriteOutcome> {
        if value == self.default_open_duration {
            return Ok(WriteOutcome::NoOp);
        }
        self.default_open_duration = value;
        self.report(ValveAttributeId::DefaultOpenDuration);
        self.persist(ValveAttributeId::DefaultOpenDuration, value);
        Ok(WriteOutcome::Written)
    }

    pub fn write_default_open_level(&mut self, value: u8) -> CommandResult<WriteOutcome> {
        if self.features.default_open_level.is_none() {
            return Err(CommandError::UnsupportedAttribute);
        }
        if !(1..=100).contains(&value) {
            return Err(CommandError::ConstraintError);
        }
        if value == self.default_open_level {
            return Ok(WriteOutcome::NoOp);
        }
        self.default_open_level = value;
        self.report(ValveAttributeId::DefaultOpenLevel);
        self.persist(ValveAttributeId::DefaultOpenLevel, value);
        Ok(WriteOutcome::Written)
    }

    // ---------------------------------------------------------------------
    // Hardware progress
    // ---------------------------------------------------------------------

    /// The actuator reached `level` while transitioning
    pub fn hw_update_current_level(&mut self, level: u8) {
        self.set_current_level(Some(level));
        if self.target_level == Some(level) {
            self.set_target_level(None);
            self.set_target_state(None);
            let state = if level == 0 {
                ValveState::Closed
            } else {
                ValveState::Open
            };
            self.set_current_state(Some(state));
        }
    }

    /// The actuator reached `state` while transitioning
    pub fn hw_update_current_state(&mut self, state: ValveState) {
        self.set_current_state(Some(state));
        if self.target_state == Some(state) {
            self.set_target_state(None);
        }
    }

    /// Deliver a timer expiry
    pub fn on_timer_expired(&mut self, token: TimerToken) {
        match token {
            TimerToken::ValveRemainingDuration => self.update_remaining_duration(),
            other => self
                .logger
                .warn(&format!("Ignoring unrelated timer {:?}", other)),
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn open_level(&mut self, requested: Option<u8>) -> CommandResult {
        let target = match requested {
            Some(level) => {
                if !complies_with_level_step(level, self.features.level_step) {
                    self.logger.error(&format!(
                        "Target level {} does not match level step {:?}",
                        level, self.features.level_step
                    ));
                    return Err(CommandError::Failure);
                }
                level
            }
            None if self.features.default_open_level.is_some() => self.default_open_level,
            None => 100,
        };

        let ValveDelegate::Level(delegate) = &mut self.delegate else {
            return Err(CommandError::Failure);
        };
        let ValveReply { outcome, fault } = delegate.open(target);
        if self.features.valve_fault {
            self.record_fault(fault);
        }
        let current = outcome.map_err(|e| {
            self.logger.error(&format!("Open failed: {}", e));
            CommandError::Failure
        })?;

        self.set_target_level(Some(target));
        self.set_current_level(Some(current));
        self.set_target_state(Some(ValveState::Open));
        self.set_current_state(Some(ValveState::Transitioning));

        if current == target {
            self.set_target_level(None);
            self.set_target_state(None);
            self.set_current_state(Some(ValveState::Open));
        }
        Ok(())
    }

    fn open_no_level(&mut self) -> CommandResult {
        self.set_target_state(Some(ValveState::Open));
        self.set_current_state(Some(ValveState::Transitioning));

        let ValveDelegate::State(delegate) = &mut self.delegate else {
            return Err(CommandError::Failure);
        };
        let ValveReply { outcome, fault } = delegate.open();
        if self.features.valve_fault {
            self.record_fault(fault);
        }
        let state = outcome.map_err(|e| {
            self.logger.error(&format!("Open failed: {}", e));
            CommandError::Failure
        })?;

        if state == ValveState::Open {
            self.set_target_state(None);
            self.set_current_state(Some(ValveState::Open));
        }
        Ok(())
    }

    fn close_level(&mut self) -> (bool, ValveFault) {
        self.set_target_level(Some(0));
        self.set_target_state(Some(ValveState::Closed));
        self.set_current_state(Some(ValveState::Transitioning));

        let ValveDelegate::Level(delegate) = &mut self.delegate else {
            return (false, ValveFault::NONE);
        };
        let ValveReply { outcome, fault } = delegate.close();
        match outcome {
            Ok(level) => {
                self.set_current_level(Some(level));
                if level == 0 {
                    self.set_current_state(Some(ValveState::Closed));
                    self.set_target_state(None);
                    self.set_target_level(None);
                }
                (true, fault)
            }
            Err(e) => {
                self.logger.error(&format!("Close failed: {}", e));
                (false, fault)
            }
        }
    }

    fn close_no_level(&mut self) -> (bool, ValveFault) {
        self.set_target_state(Some(ValveState::Closed));
        self.set_current_state(Some(ValveState::Transitioning));

        let ValveDelegate::State(delegate) = &mut self.delegate else {
            return (false, ValveFault::NONE);
        };
        let ValveReply { outcome, fault } = delegate.close();
        match outcome {
            Ok(state) => {
                self.set_current_state(Some(state));
                (true, fault)
            }
            Err(e) => {
                self.logger.error(&format!("Close failed: {}", e));
                (false, fault)
            }
        }
    }

    fn close_internal(&mut self) -> CommandResult {
        let (succeeded, fault) = if self.delegate.is_level() {
            self.close_level()
        } else {
            self.close_no_level()
        };

        // Nothing is known about the valve after a failed close
        if !succeeded {
            self.set_current_level(None);
            self.set_current_state(None);
        }

        self.record_fault(fault);
        self.set_open_duration(None);
        self.set_remaining_duration(None);
        self.set_target_level(None);
        self.set_target_state(None);
        self.set_auto_close_time(None);

        if succeeded {
            Ok(())
        } else {
            Err(CommandError::Failure)
        }
    }

    fn update_remaining_duration(&mut self) {
        self.timers.cancel(TimerToken::ValveRemainingDuration);

        let Some(open_duration) = self.open_duration else {
            self.set_remaining_duration(None);
            return;
        };

        let now = self.clock.monotonic_ms();
        let close_at = self.duration_started_ms + u64::from(open_duration) * 1_000;
        if now >= close_at {
            self.logger.info("Open duration elapsed, closing valve");
            if let Err(e) = self.close_internal() {
                self.logger
                    .error(&format!("Auto-close failed: {}", e));
            }
            return;
        }

        let remaining_ms = close_at - now;
        let remaining_s = u32::try_from((remaining_ms + 500) / 1_000).unwrap_or(u32::MAX);
        self.set_remaining_duration(Some(remaining_s));

        let next_report_ms = self.remaining_duration.next_report_delay_ms(now);
        self.timers.arm(
            TimerToken::ValveRemainingDuration,
            Duration::from_millis(next_report_ms.min(remaining_ms)),
        );
    }

    fn record_fault(&mut self, fault: ValveFault) {
        if fault == self.valve_fault {
            return;
        }
        self.valve_fault = fault;
        self.report(ValveAttributeId::ValveFault);
        if !fault.is_empty() {
            self.logger
                .warn(&format!("Valve fault 0x{:02x}", fault.bits()));
            self.events.push(ValveEvent::ValveFault { valve_fault: fault });
        }
    }

    fn set_remaining_duration(&mut self, value: Option<u32>) {
        if self
            .remaining_duration
            .set(value, self.clock.monotonic_ms())
        {
            self.report(ValveAttributeId::RemainingDuration);
        }
    }

    fn set_open_duration(&mut self, value: Option<u32>) {
        if self.open_duration != value {
            self.open_duration = value;
            self.report(ValveAttributeId::OpenDuration);
        }
    }

    fn set_auto_close_time(&mut self, value: Option<u64>) {
        if self.auto_close_time != value {
            self.auto_close_time = value;
            self.report(ValveAttributeId::AutoCloseTime);
        }
    }

    fn set_current_state(&mut self, value: Option<ValveState>) {
        if self.current_state == value {
            return;
        }
        self.current_state = value;
        self.report(ValveAttributeId::CurrentState);
        if let Some(state @ (ValveState::Open | ValveState::Closed)) = value {
            self.events.push(ValveEvent::ValveStateChanged {
                valve_state: state,
                valve_level: self.current_level,
            });
        }
    }

    fn set_target_state(&mut self, value: Option<ValveState>) {
        if self.target_state != value {
            self.target_state = value;
            self.report(ValveAttributeId::TargetState);
        }
    }

    fn set_current_level(&mut self, value: Option<u8>) {
        if self.current_level != value {
            self.current_level = value;
            self.report(ValveAttributeId::CurrentLevel);
        }
    }

    fn set_target_level(&mut self, value: Option<u8>) {
        if self.target_level != value {
            self.target_level = value;
            self.report(ValveAttributeId::TargetLevel);
        }
    }

    fn report(&mut self, id: ValveAttributeId) {
        self.reports.push(id);
    }

    fn persist<T: Serialize>(&mut self, attribute: ValveAttributeId, value: T) {
        let Some(persistence) = self.persistence.as_mut() else {
            return;
        };
        let key = attribute_key(self.endpoint, VALVE_CLUSTER, attribute.name());
        if let Err(e) = persistence.store(&key, value) {
            self.logger
                .warn(&format!("Failed to persist {}: {}", key, e));
        }
    }
}
