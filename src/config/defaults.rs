use super::*;

impl Default for EvseConfig {
    fn default() -> Self {
        Self {
            v2x: false,
            charging_preferences: false,
            soc_reporting: false,
            plug_and_charge: false,
            user_max_charging_current: true,
            randomization_window: true,
            approximate_ev_efficiency: false,
            start_diagnostics: true,
            max_hardware_charge_current_ma: 32_000,
            max_hardware_discharge_current_ma: 0,
            circuit_capacity_ma: 32_000,
            cable_assembly_limit_ma: 63_000,
            nominal_mains_voltage_mv: 230_000,
            user_max_charge_current_ma: 80_000,
            clock_retry_secs: 30,
        }
    }
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: false,
            time_sync: false,
            default_open_duration_s: None,
            default_open_level: None,
            level_step: None,
            valve_fault: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/data/evse_state.json".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/evse.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: 1,
            evse: EvseConfig::default(),
            valve: ValveConfig::default(),
            persistence: PersistenceConfig::default(),
            timezone: "UTC".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}
