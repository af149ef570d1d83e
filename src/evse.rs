//! Energy EVSE engine
//!
//! [`EvseStateMachine`] owns the attributes and drives every transition.
//! [`EnergyEvseCluster`] is the command and attribute surface in front of any
//! [`EvseDelegate`], normally the state machine itself.

pub mod attributes;
pub mod cluster;
pub mod delegate;
pub mod events;
pub mod limits;
#[cfg(test)]
pub(crate) mod mock;
pub mod notifier;
pub mod scheduler;
pub mod session;
pub mod state_machine;
pub mod targets;
pub mod types;

pub use attributes::{AttributeId, AttributeValue, EvseAttributes};
pub use cluster::{EnergyEvseCluster, EvseCommandId, EvseRequest, EvseResponse};
pub use delegate::EvseDelegate;
pub use events::EvseEvent;
pub use limits::CurrentLimitResolver;
pub use notifier::{ApplicationNotifier, EvseCallback, EvseCallbackHandler};
pub use scheduler::{EnableWindowScheduler, SchedulePlan};
pub use session::EvseSession;
pub use state_machine::{EvseStateMachine, FaultSnapshot};
pub use targets::{ChargingTarget, ChargingTargetSchedule, DayOfWeek, NextChargeTarget, TargetsStore};
pub use types::{
    EnergyTransferStoppedReason, FaultState, HwState, MeterKind, State, SupplyState,
};
