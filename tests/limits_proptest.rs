use evse_engine::evse::CurrentLimitResolver;
use evse_engine::evse::limits::{
    ChargeLimitInputs, DischargeLimitInputs, max_charge_current, max_discharge_current,
};
use proptest::prelude::*;

fn current() -> impl Strategy<Value = i64> {
    0i64..=80_000
}

proptest! {
    #[test]
    fn charge_limit_is_the_smallest_input(
        hardware_max in current(),
        circuit_capacity in current(),
        cable_assembly_limit in current(),
        command_max in current(),
        user_max in current(),
    ) {
        let inputs = ChargeLimitInputs {
            hardware_max,
            circuit_capacity,
            cable_assembly_limit,
            command_max,
            user_max,
        };
        let limit = max_charge_current(&inputs);
        let all = [hardware_max, circuit_capacity, cable_assembly_limit, command_max, user_max];
        prop_assert!(all.iter().all(|v| limit <= *v));
        prop_assert!(all.contains(&limit));
    }

    #[test]
    fn discharge_limit_ignores_user_limit(
        hardware_max in current(),
        circuit_capacity in current(),
        cable_assembly_limit in current(),
        command_max in current(),
    ) {
        let limit = max_discharge_current(&DischargeLimitInputs {
            hardware_max,
            circuit_capacity,
            cable_assembly_limit,
            command_max,
        });
        let expected = hardware_max
            .min(circuit_capacity)
            .min(cable_assembly_limit)
            .min(command_max);
        prop_assert_eq!(limit, expected);
    }

    #[test]
    fn resolver_reports_only_changes(
        circuit_capacity in current(),
        user_max in current(),
        command_max in current(),
    ) {
        let mut resolver = CurrentLimitResolver::new(32_000, 0, 63_000);
        resolver.command_max_charge = command_max;

        let first = resolver.resolve_charge(circuit_capacity, user_max);
        let expected = 32_000.min(circuit_capacity).min(user_max).min(command_max);
        if expected == 0 {
            prop_assert_eq!(first, None);
        } else {
            prop_assert_eq!(first, Some(expected));
        }
        prop_assert_eq!(resolver.actual_charge(), expected);
        prop_assert_eq!(resolver.resolve_charge(circuit_capacity, user_max), None);
    }
}
