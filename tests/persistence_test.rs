use evse_engine::clock::ManualClock;
use evse_engine::config::{Config, EvseConfig};
use evse_engine::evse::{AttributeId, ChargingTarget, ChargingTargetSchedule, DayOfWeek, EvseStateMachine};
use evse_engine::persistence::PersistenceManager;
use evse_engine::timer::ManualTimerService;
use serde_json::{Value, json};
use std::sync::Arc;

const START: u32 = 800_000_000;

fn engine(path: &str) -> EvseStateMachine {
    let config = EvseConfig {
        charging_preferences: true,
        approximate_ev_efficiency: true,
        ..EvseConfig::default()
    };
    EvseStateMachine::new(
        1,
        &config,
        chrono_tz::UTC,
        Arc::new(ManualClock::new(START)),
        Box::new(ManualTimerService::new()),
    )
    .unwrap()
    .with_persistence(PersistenceManager::open(path).unwrap())
}

#[test]
fn load_save_roundtrip() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let path = tmp.path().to_string_lossy().to_string();

    let mut mgr = PersistenceManager::new(&path);
    mgr.set("1/EnergyEvse/UserMaximumChargeCurrent", 16_000i64)
        .unwrap();
    mgr.set("1/EnergyEvse/ChargingEnabledUntil", None::<u32>)
        .unwrap();
    mgr.save().unwrap();

    let mgr2 = PersistenceManager::open(&path).unwrap();
    assert_eq!(
        mgr2.get::<i64>("1/EnergyEvse/UserMaximumChargeCurrent"),
        Some(16_000)
    );
    assert_eq!(
        mgr2.get::<Option<u32>>("1/EnergyEvse/ChargingEnabledUntil"),
        Some(None)
    );
    assert_eq!(mgr2.len(), 2);
}

#[test]
fn empty_and_non_object_files() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let path = tmp.path().to_string_lossy().to_string();

    std::fs::write(&path, "").unwrap();
    assert!(PersistenceManager::open(&path).unwrap().is_empty());

    std::fs::write(&path, "[1, 2, 3]").unwrap();
    assert!(PersistenceManager::open(&path).is_err());
}

#[test]
fn save_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/state/evse.json");
    let mut mgr = PersistenceManager::new(&path.to_string_lossy());
    mgr.store("1/EnergyEvse/RandomizationDelayWindow", 900u32)
        .unwrap();
    assert!(path.exists());
}

#[test]
fn writable_attributes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evse_state.json").to_string_lossy().to_string();

    let schedules = vec![ChargingTargetSchedule {
        day_of_week: DayOfWeek::SATURDAY,
        targets: vec![ChargingTarget {
            minutes_past_midnight: 480,
            target_soc: Some(100),
            added_energy: None,
        }],
    }];

    {
        let mut evse = engine(&path);
        evse.set_user_maximum_charge_current(10_000).unwrap();
        evse.set_randomization_delay_window(900).unwrap();
        evse.set_approximate_ev_efficiency(Some(3_500)).unwrap();
        evse.enable_charging(Some(START + 3_600), 6_000, 16_000)
            .unwrap();
        evse.set_targets(&schedules).unwrap();
    }

    let contents: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(contents["1/EnergyEvse/UserMaximumChargeCurrent"], json!(10_000));
    assert_eq!(contents["1/EnergyEvse/ChargingEnabledUntil"], json!(START + 3_600));

    let evse = engine(&path);
    let attrs = evse.attributes();
    assert_eq!(attrs.user_maximum_charge_current(), 10_000);
    assert_eq!(attrs.randomization_delay_window(), 900);
    assert_eq!(attrs.approximate_ev_efficiency(), Some(3_500));
    assert_eq!(attrs.charging_enabled_until(), Some(START + 3_600));
    assert_eq!(evse.get_targets(), schedules);
    assert!(attrs.next_charge_target_time().is_some());
    assert_eq!(
        evse.persisted::<i64>(AttributeId::UserMaximumChargeCurrent),
        Some(10_000)
    );
}

#[test]
fn out_of_range_persisted_values_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evse_state.json");
    std::fs::write(
        &path,
        json!({
            "1/EnergyEvse/RandomizationDelayWindow": 100_000,
            "1/EnergyEvse/UserMaximumChargeCurrent": -1,
            "1/EnergyEvse/DischargingEnabledUntil": "soon",
        })
        .to_string(),
    )
    .unwrap();

    let evse = engine(&path.to_string_lossy());
    assert_eq!(evse.attributes().randomization_delay_window(), 600);
    assert_eq!(evse.attributes().user_maximum_charge_current(), 80_000);
    assert_eq!(evse.attributes().discharging_enabled_until(), None);
}

#[test]
fn from_config_respects_disabled_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evse_state.json");

    let mut config = Config::default();
    config.persistence.enabled = false;
    config.persistence.path = path.to_string_lossy().to_string();

    let mut evse = EvseStateMachine::from_config(
        &config,
        Arc::new(ManualClock::new(START)),
        Box::new(ManualTimerService::new()),
    )
    .unwrap();
    evse.set_user_maximum_charge_current(12_000).unwrap();
    assert!(!path.exists());
    assert_eq!(
        evse.persisted::<i64>(AttributeId::UserMaximumChargeCurrent),
        None
    );

    config.persistence.enabled = true;
    let mut evse = EvseStateMachine::from_config(
        &config,
        Arc::new(ManualClock::new(START)),
        Box::new(ManualTimerService::new()),
    )
    .unwrap();
    evse.set_user_maximum_charge_current(12_000).unwrap();
    assert!(path.exists());
}
