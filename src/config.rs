//! Configuration management for the EVSE engine
//!
//! This module handles loading, validation, and management of the engine
//! configuration from YAML files. Feature and optional-surface flags are
//! validated once here and turned into typed sets that the clusters consult,
//! rather than testing raw bits at every read, write or command.

mod defaults;

use crate::error::{EvseError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lowest nominal mains voltage accepted from configuration or hardware (mV).
pub const MINIMUM_MAINS_VOLTAGE_MV: i64 = 100_000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct Config {
    /// Endpoint the clusters are bound to
    pub endpoint: u16,

    /// EVSE cluster configuration
    pub evse: EvseConfig,

    /// Valve cluster configuration
    pub valve: ValveConfig,

    /// Attribute persistence
    pub persistence: PersistenceConfig,

    /// IANA timezone used to evaluate charging targets
    pub timezone: String,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// EVSE features, optional surface and hardware defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct EvseConfig {
    /// Vehicle-to-everything (discharging) support
    pub v2x: bool,

    /// Charging targets (SetTargets/GetTargets/ClearTargets)
    pub charging_preferences: bool,

    /// Vehicle state of charge reporting
    pub soc_reporting: bool,

    /// Plug & Charge vehicle identification
    pub plug_and_charge: bool,

    /// Optional UserMaximumChargeCurrent attribute
    pub user_max_charging_current: bool,

    /// Optional RandomizationDelayWindow attribute
    pub randomization_window: bool,

    /// Optional ApproximateEVEfficiency attribute
    pub approximate_ev_efficiency: bool,

    /// Optional StartDiagnostics command
    pub start_diagnostics: bool,

    /// Hardware charge current limit (mA)
    pub max_hardware_charge_current_ma: i64,

    /// Hardware discharge current limit (mA)
    pub max_hardware_discharge_current_ma: i64,

    /// Electrician-set circuit capacity (mA)
    pub circuit_capacity_ma: i64,

    /// Cable assembly limit before a cable is measured (mA)
    pub cable_assembly_limit_ma: i64,

    /// Nominal mains voltage (mV)
    pub nominal_mains_voltage_mv: i64,

    /// Initial UserMaximumChargeCurrent when nothing is persisted (mA)
    pub user_max_charge_current_ma: i64,

    /// Retry interval while the real-time clock is not synchronized
    pub clock_retry_secs: u32,
}

/// Valve features and defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct ValveConfig {
    /// Whether a valve cluster is present on the endpoint
    pub enabled: bool,

    /// Level (percent) control
    pub level: bool,

    /// AutoCloseTime support
    pub time_sync: bool,

    /// DefaultOpenDuration in seconds, null to stay open
    pub default_open_duration_s: Option<u32>,

    /// Optional DefaultOpenLevel attribute value (None disables the attribute)
    pub default_open_level: Option<u8>,

    /// Optional LevelStep attribute value (None disables the attribute)
    pub level_step: Option<u8>,

    /// Optional ValveFault attribute
    pub valve_fault: bool,
}

/// Attribute persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct PersistenceConfig {
    /// Persist durable attributes to disk
    pub enabled: bool,

    /// Path of the JSON state file
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct LoggingConfig {
    /// Base log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Console level override
    pub console_level: Option<String>,

    /// File level override
    pub file_level: Option<String>,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// EVSE feature map, validated once from [`EvseConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvseFeatures {
    pub v2x: bool,
    pub charging_preferences: bool,
    pub soc_reporting: bool,
    pub plug_and_charge: bool,
    pub user_max_charging_current: bool,
    pub randomization_window: bool,
    pub approximate_ev_efficiency: bool,
    pub start_diagnostics: bool,
}

/// Valve feature map and optional attributes, validated once from [`ValveConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveFeatures {
    pub level: bool,
    pub time_sync: bool,
    pub default_open_level: Option<u8>,
    pub level_step: Option<u8>,
    pub valve_fault: bool,
}

impl EvseFeatures {
    /// Every feature and optional item enabled
    pub fn all() -> Self {
        Self {
            v2x: true,
            charging_preferences: true,
            soc_reporting: true,
            plug_and_charge: true,
            user_max_charging_current: true,
            randomization_window: true,
            approximate_ev_efficiency: true,
            start_diagnostics: true,
        }
    }
}

impl EvseConfig {
    /// Validated feature set
    pub fn features(&self) -> EvseFeatures {
        EvseFeatures {
            v2x: self.v2x,
            charging_preferences: self.charging_preferences,
            soc_reporting: self.soc_reporting,
            plug_and_charge: self.plug_and_charge,
            user_max_charging_current: self.user_max_charging_current,
            randomization_window: self.randomization_window,
            approximate_ev_efficiency: self.approximate_ev_efficiency,
            start_diagnostics: self.start_diagnostics,
        }
    }

    fn validate(&self) -> Result<()> {
        let limits = [
            ("evse.max_hardware_charge_current_ma", self.max_hardware_charge_current_ma),
            (
                "evse.max_hardware_discharge_current_ma",
                self.max_hardware_discharge_current_ma,
            ),
            ("evse.circuit_capacity_ma", self.circuit_capacity_ma),
            ("evse.cable_assembly_limit_ma", self.cable_assembly_limit_ma),
            ("evse.user_max_charge_current_ma", self.user_max_charge_current_ma),
        ];
        for (field, value) in limits {
            if value < 0 {
                return Err(EvseError::validation(field, "Must not be negative"));
            }
        }

        if self.nominal_mains_voltage_mv < MINIMUM_MAINS_VOLTAGE_MV {
            return Err(EvseError::validation(
                "evse.nominal_mains_voltage_mv",
                "Mains voltage looks too low, value must be in mV",
            ));
        }

        if self.clock_retry_secs == 0 {
            return Err(EvseError::validation(
                "evse.clock_retry_secs",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl ValveConfig {
    /// Validated feature set
    pub fn features(&self) -> ValveFeatures {
        ValveFeatures {
            level: self.level,
            time_sync: self.time_sync,
            default_open_level: self.default_open_level.filter(|_| self.level),
            level_step: self.level_step.filter(|_| self.level),
            valve_fault: self.valve_fault,
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(step) = self.level_step
            && !(1..=100).contains(&step)
        {
            return Err(EvseError::validation(
                "valve.level_step",
                "Must be between 1 and 100",
            ));
        }

        if let Some(level) = self.default_open_level {
            if !(1..=100).contains(&level) {
                return Err(EvseError::validation(
                    "valve.default_open_level",
                    "Must be between 1 and 100",
                ));
            }
            if let Some(step) = self.level_step
                && level != 100
                && level % step != 0
            {
                return Err(EvseError::validation(
                    "valve.default_open_level",
                    "Must be a multiple of level_step",
                ));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "evse_config.yaml",
            "/data/evse_config.yaml",
            "/etc/evse/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// JSON schema of the configuration file
    #[cfg(feature = "schema")]
    pub fn json_schema() -> Result<serde_json::Value> {
        Ok(serde_json::to_value(schemars::schema_for!(Config))?)
    }

    /// Parsed timezone
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| EvseError::validation("timezone".to_string(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.evse.validate()?;
        self.valve.validate()?;

        self.tz()?;

        crate::logging::parse_log_level(&self.logging.level)
            .map_err(|e| EvseError::validation("logging.level".to_string(), e.to_string()))?;

        if self.persistence.enabled && self.persistence.path.trim().is_empty() {
            return Err(EvseError::validation(
                "persistence.path",
                "Path cannot be empty when persistence is enabled",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint, 1);
        assert_eq!(config.evse.clock_retry_secs, 30);
        assert_eq!(config.evse.nominal_mains_voltage_mv, 230_000);
        assert_eq!(config.timezone, "UTC");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.evse.circuit_capacity_ma = -1;
        assert!(config.validate().is_err());

        config = Config::default();
        config.evse.nominal_mains_voltage_mv = 230;
        assert!(config.validate().is_err());

        config = Config::default();
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.valve.level_step = Some(0);
        assert!(config.validate().is_err());

        config = Config::default();
        config.valve.level_step = Some(20);
        config.valve.default_open_level = Some(50);
        assert!(config.validate().is_err());
    }

    #[test]
    fn valve_level_attributes_require_level_feature() {
        let mut config = Config::default();
        config.valve.level = false;
        config.valve.default_open_level = Some(80);
        config.valve.level_step = Some(10);
        let features = config.valve.features();
        assert_eq!(features.default_open_level, None);
        assert_eq!(features.level_step, None);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.evse.v2x, deserialized.evse.v2x);
        assert_eq!(config.persistence.path, deserialized.persistence.path);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("evse:\n  v2x: true\n").unwrap();
        assert!(config.evse.v2x);
        assert_eq!(config.evse.clock_retry_secs, 30);
        assert_eq!(config.logging.level, "INFO");
    }
}
