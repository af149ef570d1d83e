use evse_engine::config::Config;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.endpoint = 2;
    cfg.evse.v2x = true;
    cfg.evse.max_hardware_discharge_current_ma = 16_000;
    cfg.timezone = "Europe/Amsterdam".to_string();
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.endpoint, 2);
    assert!(loaded.evse.v2x);
    assert_eq!(loaded.evse.max_hardware_discharge_current_ma, 16_000);
    assert_eq!(loaded.tz().unwrap(), chrono_tz::Europe::Amsterdam);
    assert_eq!(loaded.logging.file, cfg.logging.file);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    // Negative limits
    cfg.evse.max_hardware_charge_current_ma = -1;
    assert!(cfg.validate().is_err());

    // Voltage given in volts instead of millivolts
    cfg = Config::default();
    cfg.evse.nominal_mains_voltage_mv = 230;
    assert!(cfg.validate().is_err());

    // Clock retry zero
    cfg = Config::default();
    cfg.evse.clock_retry_secs = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.logging.level = "LOUD".to_string();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.persistence.path = "  ".to_string();
    assert!(cfg.validate().is_err());
    cfg.persistence.enabled = false;
    assert!(cfg.validate().is_ok());

    cfg = Config::default();
    cfg.valve.default_open_level = Some(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), "evse: [not, a, map").unwrap();
    assert!(Config::from_file(tmp.path()).is_err());
}

#[test]
fn feature_flags_become_typed_sets() {
    let yaml = r#"
evse:
  v2x: true
  charging_preferences: true
  start_diagnostics: false
valve:
  enabled: true
  level: true
  default_open_level: 60
  level_step: 20
"#;
    let cfg: Config = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validate().is_ok());

    let evse = cfg.evse.features();
    assert!(evse.v2x);
    assert!(evse.charging_preferences);
    assert!(!evse.start_diagnostics);
    assert!(evse.user_max_charging_current);

    let valve = cfg.valve.features();
    assert!(valve.level);
    assert_eq!(valve.default_open_level, Some(60));
    assert_eq!(valve.level_step, Some(20));
}
