//! Enable-window scheduling
//!
//! ChargingEnabledUntil and DischargingEnabledUntil bound how long an enable
//! command stays in force. [`EnableWindowScheduler::plan`] decides, from the
//! supply state and both deadlines, whether a timer is needed, for how long,
//! or whether a window has already run out. The state machine acts on the
//! plan so that a single timer is ever armed.

use super::types::SupplyState;
use crate::clock::ClockError;
use std::time::Duration;

/// What the owner should do with its enable-window timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePlan {
    /// No window applies; cancel any pending timer
    NoTimer,
    /// The clock is not synchronized yet; check again later
    RetryClock(Duration),
    /// The earliest deadline is still ahead
    Arm(Duration),
    /// The earliest deadline has passed at `now`
    Expired { now: u32 },
}

/// Earlier of two deadlines; `None` means no deadline on that side
pub fn earliest_deadline(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Whether an enable-until value has run out at `now`
pub fn is_expired(until: Option<u32>, now: u32) -> bool {
    until.is_some_and(|until| until <= now)
}

#[derive(Debug, Clone, Copy)]
pub struct EnableWindowScheduler {
    clock_retry: Duration,
}

impl EnableWindowScheduler {
    pub fn new(clock_retry: Duration) -> Self {
        Self { clock_retry }
    }

    pub fn clock_retry(&self) -> Duration {
        self.clock_retry
    }

    /// Deadline that governs the given supply state
    pub fn deadline(
        supply_state: SupplyState,
        charging_enabled_until: Option<u32>,
        discharging_enabled_until: Option<u32>,
    ) -> Option<u32> {
        match supply_state {
            SupplyState::ChargingEnabled => charging_enabled_until,
            SupplyState::DischargingEnabled => discharging_enabled_until,
            SupplyState::Enabled => {
                earliest_deadline(charging_enabled_until, discharging_enabled_until)
            }
            SupplyState::Disabled
            | SupplyState::DisabledError
            | SupplyState::DisabledDiagnostics => None,
        }
    }

    pub fn plan(
        &self,
        supply_state: SupplyState,
        charging_enabled_until: Option<u32>,
        discharging_enabled_until: Option<u32>,
        now: Result<u32, ClockError>,
    ) -> SchedulePlan {
        let Some(deadline) =
            Self::deadline(supply_state, charging_enabled_until, discharging_enabled_until)
        else {
            return SchedulePlan::NoTimer;
        };

        let now = match now {
            Ok(now) => now,
            Err(ClockError::NotSynced) => return SchedulePlan::RetryClock(self.clock_retry),
        };

        if deadline > now {
            SchedulePlan::Arm(Duration::from_secs(u64::from(deadline - now)))
        } else {
            SchedulePlan::Expired { now }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> EnableWindowScheduler {
        EnableWindowScheduler::new(Duration::from_secs(30))
    }

    #[test]
    fn disabled_states_need_no_timer() {
        for supply in [
            SupplyState::Disabled,
            SupplyState::DisabledError,
            SupplyState::DisabledDiagnostics,
        ] {
            assert_eq!(
                scheduler().plan(supply, Some(10), Some(10), Ok(0)),
                SchedulePlan::NoTimer
            );
        }
    }

    #[test]
    fn null_deadline_means_indefinite() {
        assert_eq!(
            scheduler().plan(SupplyState::ChargingEnabled, None, Some(5), Ok(0)),
            SchedulePlan::NoTimer
        );
    }

    #[test]
    fn unsynced_clock_retries() {
        assert_eq!(
            scheduler().plan(
                SupplyState::ChargingEnabled,
                Some(100),
                None,
                Err(ClockError::NotSynced)
            ),
            SchedulePlan::RetryClock(Duration::from_secs(30))
        );
    }

    #[test]
    fn future_deadline_arms_for_delta() {
        assert_eq!(
            scheduler().plan(SupplyState::DischargingEnabled, None, Some(1_005), Ok(1_000)),
            SchedulePlan::Arm(Duration::from_secs(5))
        );
    }

    #[test]
    fn enabled_uses_earliest_side() {
        assert_eq!(
            scheduler().plan(SupplyState::Enabled, Some(1_050), Some(1_020), Ok(1_000)),
            SchedulePlan::Arm(Duration::from_secs(20))
        );
        assert_eq!(
            scheduler().plan(SupplyState::Enabled, None, Some(1_020), Ok(1_000)),
            SchedulePlan::Arm(Duration::from_secs(20))
        );
        assert_eq!(
            scheduler().plan(SupplyState::Enabled, Some(990), Some(1_020), Ok(1_000)),
            SchedulePlan::Expired { now: 1_000 }
        );
    }

    #[test]
    fn deadline_at_now_is_expired() {
        assert_eq!(
            scheduler().plan(SupplyState::ChargingEnabled, Some(1_000), None, Ok(1_000)),
            SchedulePlan::Expired { now: 1_000 }
        );
        assert!(is_expired(Some(1_000), 1_000));
        assert!(!is_expired(None, 1_000));
        assert!(!is_expired(Some(1_001), 1_000));
    }
}
