//! Session accounting for one plug-in to unplug cycle
//!
//! The session keeps only the baselines of the current session. The
//! derived SessionDuration, SessionEnergyCharged and SessionEnergyDischarged
//! attributes are recomputed from those baselines and live meter readings.

use super::attributes::EvseAttributes;
use crate::clock::{Clock, ClockError};
use crate::logging::{StructuredLogger, get_logger};

/// Baselines of the current session
pub struct EvseSession {
    /// Epoch seconds at which the session started, `None` before the first session
    start_time: Option<u32>,

    /// Import meter reading at session start (mWh)
    energy_charged_at_start: i64,

    /// Export meter reading at session start (mWh)
    energy_discharged_at_start: i64,

    logger: StructuredLogger,
}

impl Default for EvseSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EvseSession {
    pub fn new() -> Self {
        Self {
            start_time: None,
            energy_charged_at_start: 0,
            energy_discharged_at_start: 0,
            logger: get_logger("session"),
        }
    }

    pub fn start_time(&self) -> Option<u32> {
        self.start_time
    }

    pub fn energy_charged_at_start(&self) -> i64 {
        self.energy_charged_at_start
    }

    pub fn energy_discharged_at_start(&self) -> i64 {
        self.energy_discharged_at_start
    }

    /// Begin a new session at the given meter readings.
    ///
    /// Nothing is touched if the clock is not synchronized. Otherwise the
    /// session id advances by one (the first session is 0) and the three
    /// session attributes are reset to 0. Returns the new session id.
    pub fn start(
        &mut self,
        attrs: &mut EvseAttributes,
        clock: &dyn Clock,
        charging_meter_value: i64,
        discharging_meter_value: i64,
    ) -> Result<u32, ClockError> {
        let now = clock.now_epoch_seconds()?;

        self.start_time = Some(now);
        self.energy_charged_at_start = charging_meter_value;
        self.energy_discharged_at_start = discharging_meter_value;

        let session_id = attrs.session_id().map_or(0, |id| id.wrapping_add(1));
        attrs.set_session_id(Some(session_id));

        attrs.set_session_duration(Some(0));
        attrs.set_session_energy_charged(Some(0));
        attrs.set_session_energy_discharged(Some(0));

        self.logger.info(&format!(
            "Session {} started at {} (import baseline {} mWh, export baseline {} mWh)",
            session_id, now, charging_meter_value, discharging_meter_value
        ));
        Ok(session_id)
    }

    /// Finalize the session: duration and both energy deltas
    pub fn stop(
        &mut self,
        attrs: &mut EvseAttributes,
        clock: &dyn Clock,
        charging_meter_value: i64,
        discharging_meter_value: i64,
    ) {
        self.recalculate_duration(attrs, clock);
        self.update_energy_charged(attrs, charging_meter_value);
        self.update_energy_discharged(attrs, discharging_meter_value);

        self.logger.info(&format!(
            "Session {:?} stopped after {:?}s, charged {:?} mWh, discharged {:?} mWh",
            attrs.session_id(),
            attrs.session_duration(),
            attrs.session_energy_charged(),
            attrs.session_energy_discharged()
        ));
    }

    /// Refresh SessionDuration from the wall clock
    pub fn recalculate_duration(&self, attrs: &mut EvseAttributes, clock: &dyn Clock) {
        let Some(start) = self.start_time else {
            self.logger.debug("No session started, duration not updated");
            return;
        };
        match clock.now_epoch_seconds() {
            Ok(now) => attrs.set_session_duration(Some(now.saturating_sub(start))),
            Err(e) => self
                .logger
                .error(&format!("Unable to update session duration: {}", e)),
        }
    }

    /// SessionEnergyCharged = import meter - baseline
    pub fn update_energy_charged(&self, attrs: &mut EvseAttributes, charging_meter_value: i64) {
        if self.start_time.is_none() {
            return;
        }
        attrs.set_session_energy_charged(Some(
            charging_meter_value.saturating_sub(self.energy_charged_at_start),
        ));
    }

    /// SessionEnergyDischarged = baseline - export meter
    pub fn update_energy_discharged(
        &self,
        attrs: &mut EvseAttributes,
        discharging_meter_value: i64,
    ) {
        if self.start_time.is_none() {
            return;
        }
        attrs.set_session_energy_discharged(Some(
            self.energy_discharged_at_start
                .saturating_sub(discharging_meter_value),
        ));
    }
}
