//! Valve actuator interface
//!
//! A valve either supports level control or only open/closed. Each variant
//! has its own trait; [`ValveDelegate`] holds one of them so the controller
//! never has to call an operation the actuator does not implement.

use super::types::{ValveFault, ValveState};
use thiserror::Error;

/// The actuator could not carry out the request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("valve actuator error: {message}")]
pub struct ValveDelegateError {
    pub message: String,
}

impl ValveDelegateError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of an actuator request plus any fault it observed.
///
/// A fault may accompany a successful request when it did not prevent the
/// valve from moving safely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValveReply<T> {
    pub outcome: Result<T, ValveDelegateError>,
    pub fault: ValveFault,
}

impl<T> ValveReply<T> {
    pub fn ok(value: T) -> Self {
        Self {
            outcome: Ok(value),
            fault: ValveFault::NONE,
        }
    }

    pub fn failed(error: ValveDelegateError, fault: ValveFault) -> Self {
        Self {
            outcome: Err(error),
            fault,
        }
    }

    pub fn with_fault(mut self, fault: ValveFault) -> Self {
        self.fault = fault;
        self
    }
}

/// Actuator with level (percent) control
pub trait LevelValveDelegate: Send {
    /// Move toward `target_level`; returns the level reached so far
    fn open(&mut self, target_level: u8) -> ValveReply<u8>;

    /// Move toward 0; returns the level reached so far
    fn close(&mut self) -> ValveReply<u8>;
}

/// Open/closed actuator
pub trait StateValveDelegate: Send {
    /// Returns Open when fully open, Transitioning while moving
    fn open(&mut self) -> ValveReply<ValveState>;

    /// Returns Closed when fully closed, Transitioning while moving
    fn close(&mut self) -> ValveReply<ValveState>;
}

pub enum ValveDelegate {
    Level(Box<dyn LevelValveDelegate>),
    State(Box<dyn StateValveDelegate>),
}

impl ValveDelegate {
    pub fn is_level(&self) -> bool {
        matches!(self, ValveDelegate::Level(_))
    }
}

impl std::fmt::Debug for ValveDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValveDelegate::Level(_) => f.write_str("ValveDelegate::Level"),
            ValveDelegate::State(_) => f.write_str("ValveDelegate::State"),
        }
    }
}
