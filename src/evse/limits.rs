//! Current limit resolution
//!
//! The charge limit offered to the vehicle is the smallest of the hardware
//! limit, the circuit capacity, the cable assembly limit, the limit supplied
//! with EnableCharging and the user limit. Discharging uses the same inputs
//! minus the user limit. All values are in mA.

/// Inputs to the charge limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeLimitInputs {
    pub hardware_max: i64,
    pub circuit_capacity: i64,
    pub cable_assembly_limit: i64,
    pub command_max: i64,
    pub user_max: i64,
}

/// Inputs to the discharge limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DischargeLimitInputs {
    pub hardware_max: i64,
    pub circuit_capacity: i64,
    pub cable_assembly_limit: i64,
    pub command_max: i64,
}

pub fn max_charge_current(inputs: &ChargeLimitInputs) -> i64 {
    inputs
        .hardware_max
        .min(inputs.circuit_capacity)
        .min(inputs.cable_assembly_limit)
        .min(inputs.command_max)
        .min(inputs.user_max)
}

pub fn max_discharge_current(inputs: &DischargeLimitInputs) -> i64 {
    inputs
        .hardware_max
        .min(inputs.circuit_capacity)
        .min(inputs.cable_assembly_limit)
        .min(inputs.command_max)
}

/// Limit inputs that are not attributes, plus the last resolved limits.
///
/// `resolve_*` return the new limit only when it differs from the previous
/// one, so callers update attributes and notify only on real changes.
#[derive(Debug, Clone, Default)]
pub struct CurrentLimitResolver {
    pub hardware_max_charge: i64,
    pub hardware_max_discharge: i64,
    pub cable_assembly_limit: i64,
    pub command_max_charge: i64,
    pub command_max_discharge: i64,
    actual_charge: i64,
    actual_discharge: i64,
}

impl CurrentLimitResolver {
    pub fn new(hardware_max_charge: i64, hardware_max_discharge: i64, cable_assembly_limit: i64) -> Self {
        Self {
            hardware_max_charge,
            hardware_max_discharge,
            cable_assembly_limit,
            ..Self::default()
        }
    }

    pub fn actual_charge(&self) -> i64 {
        self.actual_charge
    }

    pub fn actual_discharge(&self) -> i64 {
        self.actual_discharge
    }

    pub fn resolve_charge(&mut self, circuit_capacity: i64, user_max: i64) -> Option<i64> {
        let limit = max_charge_current(&ChargeLimitInputs {
            hardware_max: self.hardware_max_charge,
            circuit_capacity,
            cable_assembly_limit: self.cable_assembly_limit,
            command_max: self.command_max_charge,
            user_max,
        });
        if limit == self.actual_charge {
            return None;
        }
        self.actual_charge = limit;
        Some(limit)
    }

    pub fn resolve_discharge(&mut self, circuit_capacity: i64) -> Option<i64> {
        let limit = max_discharge_current(&DischargeLimitInputs {
            hardware_max: self.hardware_max_discharge,
            circuit_capacity,
            cable_assembly_limit: self.cable_assembly_limit,
            command_max: self.command_max_discharge,
        });
        if limit == self.actual_discharge {
            return None;
        }
        self.actual_discharge = limit;
        Some(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_limit_is_smallest_input() {
        let inputs = ChargeLimitInputs {
            hardware_max: 32_000,
            circuit_capacity: 25_000,
            cable_assembly_limit: 63_000,
            command_max: 32_000,
            user_max: 80_000,
        };
        assert_eq!(max_charge_current(&inputs), 25_000);
    }

    #[test]
    fn discharge_limit_ignores_user_max() {
        let inputs = DischargeLimitInputs {
            hardware_max: 16_000,
            circuit_capacity: 32_000,
            cable_assembly_limit: 20_000,
            command_max: 18_000,
        };
        assert_eq!(max_discharge_current(&inputs), 16_000);
    }

    #[test]
    fn resolver_reports_only_changes() {
        let mut resolver = CurrentLimitResolver::new(32_000, 10_000, 63_000);
        assert_eq!(resolver.resolve_charge(32_000, 80_000), None);

        resolver.command_max_charge = 16_000;
        assert_eq!(resolver.resolve_charge(32_000, 80_000), Some(16_000));
        assert_eq!(resolver.resolve_charge(32_000, 80_000), None);
        assert_eq!(resolver.resolve_charge(32_000, 6_000), Some(6_000));
        assert_eq!(resolver.actual_charge(), 6_000);

        resolver.command_max_discharge = 12_000;
        assert_eq!(resolver.resolve_discharge(32_000), Some(10_000));
        assert_eq!(resolver.resolve_discharge(32_000), None);
    }
}
