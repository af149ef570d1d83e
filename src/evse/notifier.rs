//! Notifications to the hardware/application layer
//!
//! A single handler is registered once. It receives limit changes, state
//! changes, charging preference changes and synchronous meter read requests.

use super::types::{MeterKind, State, SupplyState};
use crate::error::{CommandError, CommandResult};

/// Notification delivered to the application
#[derive(Debug, PartialEq, Eq)]
pub enum EvseCallback<'a> {
    /// The charge limit offered to the vehicle changed
    ChargeCurrentChanged {
        maximum_charge_current: i64,
        minimum_charge_current: i64,
        nominal_mains_voltage_mv: i64,
    },
    /// The discharge limit offered to the vehicle changed
    DischargeCurrentChanged {
        maximum_discharge_current: i64,
        nominal_mains_voltage_mv: i64,
    },
    /// State or SupplyState changed
    StateChanged {
        state: State,
        supply_state: SupplyState,
    },
    /// Charging targets were set or cleared
    ChargingPreferencesChanged,
    /// The engine needs a meter reading; the handler fills `value` (mWh)
    EnergyMeterReadingRequested { meter: MeterKind, value: &'a mut i64 },
}

/// Application callback
pub type EvseCallbackHandler = Box<dyn FnMut(EvseCallback<'_>) + Send>;

/// Holds the registered application callback
#[derive(Default)]
pub struct ApplicationNotifier {
    handler: Option<EvseCallbackHandler>,
}

impl std::fmt::Debug for ApplicationNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationNotifier")
            .field("registered", &self.handler.is_some())
            .finish()
    }
}

impl ApplicationNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler. A second registration is a Failure.
    pub fn register(&mut self, handler: EvseCallbackHandler) -> CommandResult {
        if self.handler.is_some() {
            return Err(CommandError::Failure);
        }
        self.handler = Some(handler);
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.handler.is_some()
    }

    pub fn notify(&mut self, callback: EvseCallback<'_>) {
        if let Some(handler) = self.handler.as_mut() {
            handler(callback);
        }
    }

    /// Ask the application for a meter reading. 0 when nothing answers.
    pub fn read_meter(&mut self, meter: MeterKind) -> i64 {
        let mut value = 0;
        self.notify(EvseCallback::EnergyMeterReadingRequested {
            meter,
            value: &mut value,
        });
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn registration_is_set_once() {
        let mut notifier = ApplicationNotifier::new();
        assert!(notifier.register(Box::new(|_| {})).is_ok());
        assert_eq!(
            notifier.register(Box::new(|_| {})),
            Err(CommandError::Failure)
        );
        assert!(notifier.is_registered());
    }

    #[test]
    fn meter_reads_default_to_zero() {
        let mut notifier = ApplicationNotifier::new();
        assert_eq!(notifier.read_meter(MeterKind::Charging), 0);
    }

    #[test]
    fn handler_fills_meter_reading_and_sees_notifications() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        let mut notifier = ApplicationNotifier::new();
        notifier
            .register(Box::new(move |cb| match cb {
                EvseCallback::EnergyMeterReadingRequested { meter, value } => {
                    *value = match meter {
                        MeterKind::Charging => 1_234,
                        MeterKind::Discharging => 56,
                    };
                }
                other => seen_in_handler.lock().unwrap().push(format!("{:?}", other)),
            }))
            .unwrap();

        assert_eq!(notifier.read_meter(MeterKind::Charging), 1_234);
        assert_eq!(notifier.read_meter(MeterKind::Discharging), 56);
        notifier.notify(EvseCallback::ChargingPreferencesChanged);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["ChargingPreferencesChanged".to_string()]
        );
    }
}
