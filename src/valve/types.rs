//! Valve cluster value types

use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Valve state as seen by CurrentState / TargetState
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValveState {
    Closed,
    Open,
    Transitioning,
}

/// ValveFault bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValveFault(u16);

impl ValveFault {
    pub const NONE: ValveFault = ValveFault(0);
    pub const GENERAL_FAULT: ValveFault = ValveFault(0x01);
    pub const BLOCKED: ValveFault = ValveFault(0x02);
    pub const LEAKING: ValveFault = ValveFault(0x04);
    pub const NOT_CONNECTED: ValveFault = ValveFault(0x08);
    pub const SHORT_CIRCUITED: ValveFault = ValveFault(0x10);
    pub const CURRENT_EXCEEDED: ValveFault = ValveFault(0x20);

    pub fn from_bits(bits: u16) -> Self {
        ValveFault(bits & 0x3F)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ValveFault) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ValveFault {
    type Output = ValveFault;

    fn bitor(self, rhs: ValveFault) -> ValveFault {
        ValveFault(self.0 | rhs.0)
    }
}

/// Valve cluster attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValveAttributeId {
    OpenDuration,
    DefaultOpenDuration,
    AutoCloseTime,
    RemainingDuration,
    CurrentState,
    TargetState,
    CurrentLevel,
    TargetLevel,
    DefaultOpenLevel,
    ValveFault,
    LevelStep,
}

impl ValveAttributeId {
    pub fn name(self) -> &'static str {
        match self {
            ValveAttributeId::OpenDuration => "OpenDuration",
            ValveAttributeId::DefaultOpenDuration => "DefaultOpenDuration",
            ValveAttributeId::AutoCloseTime => "AutoCloseTime",
            ValveAttributeId::RemainingDuration => "RemainingDuration",
            ValveAttributeId::CurrentState => "CurrentState",
            ValveAttributeId::TargetState => "TargetState",
            ValveAttributeId::CurrentLevel => "CurrentLevel",
            ValveAttributeId::TargetLevel => "TargetLevel",
            ValveAttributeId::DefaultOpenLevel => "DefaultOpenLevel",
            ValveAttributeId::ValveFault => "ValveFault",
            ValveAttributeId::LevelStep => "LevelStep",
        }
    }
}

/// A read valve attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ValveAttributeValue {
    NullableSeconds(Option<u32>),
    /// Microseconds since 2000-01-01T00:00:00Z
    NullableEpochMicros(Option<u64>),
    NullableState(Option<ValveState>),
    NullablePercent(Option<u8>),
    Percent(u8),
    Fault(ValveFault),
}

/// Event emitted by the valve cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ValveEvent {
    ValveStateChanged {
        valve_state: ValveState,
        valve_level: Option<u8>,
    },
    ValveFault {
        valve_fault: ValveFault,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_bits_combine() {
        let fault = ValveFault::BLOCKED | ValveFault::LEAKING;
        assert_eq!(fault.bits(), 0x06);
        assert!(fault.contains(ValveFault::BLOCKED));
        assert!(!fault.contains(ValveFault::GENERAL_FAULT));
        assert!(ValveFault::default().is_empty());
        assert_eq!(ValveFault::from_bits(0xFF).bits(), 0x3F);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(ValveEvent::ValveStateChanged {
            valve_state: ValveState::Open,
            valve_level: Some(50),
        })
        .unwrap();
        assert_eq!(json["event"], "valveStateChanged");
        assert_eq!(json["valve_level"], 50);
    }
}
