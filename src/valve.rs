//! Valve configuration and control cluster
//!
//! A second cluster on the same engine conventions as the EVSE: typed
//! feature set, attribute change reports, timer tokens and persisted
//! writable defaults.

pub mod controller;
pub mod delegate;
pub mod types;

pub use controller::{REMAINING_DURATION_REPORT_INTERVAL_MS, ValveController, complies_with_level_step};
pub use delegate::{
    LevelValveDelegate, StateValveDelegate, ValveDelegate, ValveDelegateError, ValveReply,
};
pub use types::{ValveAttributeId, ValveAttributeValue, ValveEvent, ValveFault, ValveState};
