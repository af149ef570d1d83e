use evse_engine::CommandError;
use evse_engine::clock::ManualClock;
use evse_engine::config::EvseConfig;
use evse_engine::evse::{
    AttributeId, AttributeValue, ChargingTarget, ChargingTargetSchedule, DayOfWeek,
    EnergyEvseCluster, EvseRequest, EvseResponse, EvseStateMachine, State,
};
use evse_engine::timer::ManualTimerService;
use std::sync::Arc;

/// Monday 2025-06-02 08:00 UTC
const MONDAY_0800: u32 = 802_166_400;
/// Monday 2025-06-02 09:30 UTC
const MONDAY_0930: u32 = 802_171_800;
/// Tuesday 2025-06-03 07:30 UTC (09:30 in Amsterdam)
const TUESDAY_0730: u32 = 802_251_000;

fn config() -> EvseConfig {
    EvseConfig {
        charging_preferences: true,
        ..EvseConfig::default()
    }
}

fn cluster(tz: chrono_tz::Tz) -> (EnergyEvseCluster<EvseStateMachine>, ManualClock) {
    let clock = ManualClock::new(MONDAY_0800);
    let config = config();
    let machine = EvseStateMachine::new(
        1,
        &config,
        tz,
        Arc::new(clock.clone()),
        Box::new(ManualTimerService::new()),
    )
    .unwrap();
    (EnergyEvseCluster::new(1, config.features(), machine), clock)
}

fn energy_target(minutes_past_midnight: u16, added_energy: i64) -> ChargingTarget {
    ChargingTarget {
        minutes_past_midnight,
        target_soc: None,
        added_energy: Some(added_energy),
    }
}

fn set(
    cluster: &mut EnergyEvseCluster<EvseStateMachine>,
    schedules: Vec<ChargingTargetSchedule>,
) -> Result<EvseResponse, CommandError> {
    cluster.invoke(EvseRequest::SetTargets { schedules })
}

#[test]
fn next_target_follows_schedule() {
    let (mut cluster, _) = cluster(chrono_tz::UTC);
    set(
        &mut cluster,
        vec![ChargingTargetSchedule {
            day_of_week: DayOfWeek::MONDAY | DayOfWeek::TUESDAY,
            targets: vec![energy_target(570, 20_000)],
        }],
    )
    .unwrap();

    assert_eq!(
        cluster.read_attribute(AttributeId::NextChargeTargetTime),
        Ok(AttributeValue::NullableEpochSeconds(Some(MONDAY_0930)))
    );
    assert_eq!(
        cluster.read_attribute(AttributeId::NextChargeRequiredEnergy),
        Ok(AttributeValue::NullableEnergy(Some(20_000)))
    );
    // Never computed
    assert_eq!(
        cluster.read_attribute(AttributeId::NextChargeStartTime),
        Ok(AttributeValue::NullableEpochSeconds(None))
    );

    let targets = cluster.invoke(EvseRequest::GetTargets).unwrap();
    let EvseResponse::Targets(schedules) = targets else {
        panic!("expected targets");
    };
    assert_eq!(schedules.len(), 2);
    assert_eq!(schedules[0].day_of_week, DayOfWeek::MONDAY);
    assert_eq!(schedules[1].day_of_week, DayOfWeek::TUESDAY);
}

#[test]
fn next_target_uses_local_time() {
    let (mut cluster, _) = cluster(chrono_tz::Europe::Amsterdam);
    set(
        &mut cluster,
        vec![ChargingTargetSchedule {
            day_of_week: DayOfWeek::MONDAY | DayOfWeek::TUESDAY,
            targets: vec![energy_target(570, 20_000)],
        }],
    )
    .unwrap();
    // Monday 09:30 local has already passed at 10:00 local
    assert_eq!(
        cluster.delegate().attributes().next_charge_target_time(),
        Some(TUESDAY_0730)
    );
}

#[test]
fn plug_in_refreshes_next_target() {
    let (mut cluster, clock) = cluster(chrono_tz::UTC);
    set(
        &mut cluster,
        vec![ChargingTargetSchedule {
            day_of_week: DayOfWeek::MONDAY,
            targets: vec![energy_target(570, 5_000)],
        }],
    )
    .unwrap();
    assert_eq!(
        cluster.delegate().attributes().next_charge_target_time(),
        Some(MONDAY_0930)
    );

    clock.advance_secs(2 * 3600);
    cluster
        .delegate_mut()
        .hw_set_state(State::PluggedInNoDemand)
        .unwrap();
    assert_eq!(
        cluster.delegate().attributes().next_charge_target_time(),
        Some(MONDAY_0930 + 7 * 86_400)
    );
}

#[test]
fn set_targets_replaces_only_named_days() {
    let (mut cluster, _) = cluster(chrono_tz::UTC);
    set(
        &mut cluster,
        vec![ChargingTargetSchedule {
            day_of_week: DayOfWeek::MONDAY | DayOfWeek::FRIDAY,
            targets: vec![energy_target(600, 1_000)],
        }],
    )
    .unwrap();
    set(
        &mut cluster,
        vec![ChargingTargetSchedule {
            day_of_week: DayOfWeek::FRIDAY,
            targets: vec![energy_target(300, 2_000), energy_target(120, 3_000)],
        }],
    )
    .unwrap();

    let targets = cluster.delegate().get_targets();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].targets, vec![energy_target(600, 1_000)]);
    // Stored in time order
    assert_eq!(
        targets[1].targets,
        vec![energy_target(120, 3_000), energy_target(300, 2_000)]
    );

    cluster.invoke(EvseRequest::ClearTargets).unwrap();
    assert!(cluster.delegate().get_targets().is_empty());
    assert_eq!(cluster.delegate().attributes().next_charge_target_time(), None);
}

#[test]
fn invalid_targets_are_rejected() {
    let (mut cluster, _) = cluster(chrono_tz::UTC);
    let one = |target: ChargingTarget| {
        vec![ChargingTargetSchedule {
            day_of_week: DayOfWeek::MONDAY,
            targets: vec![target],
        }]
    };

    assert_eq!(
        set(&mut cluster, one(energy_target(1440, 1_000))),
        Err(CommandError::ConstraintError)
    );
    assert_eq!(
        set(
            &mut cluster,
            one(ChargingTarget {
                minutes_past_midnight: 60,
                target_soc: Some(80),
                added_energy: None,
            })
        ),
        Err(CommandError::ConstraintError)
    );
    assert_eq!(
        set(
            &mut cluster,
            one(ChargingTarget {
                minutes_past_midnight: 60,
                target_soc: None,
                added_energy: None,
            })
        ),
        Err(CommandError::Failure)
    );
    assert_eq!(
        set(&mut cluster, one(energy_target(60, -1))),
        Err(CommandError::ConstraintError)
    );
    assert_eq!(
        set(
            &mut cluster,
            vec![ChargingTargetSchedule {
                day_of_week: DayOfWeek::MONDAY,
                targets: (0..11).map(|i| energy_target(i * 60, 1_000)).collect(),
            }]
        ),
        Err(CommandError::ResourceExhausted)
    );
    assert_eq!(
        set(
            &mut cluster,
            vec![
                ChargingTargetSchedule {
                    day_of_week: DayOfWeek::MONDAY,
                    targets: vec![energy_target(60, 1_000)],
                },
                ChargingTargetSchedule {
                    day_of_week: DayOfWeek::MONDAY | DayOfWeek::SUNDAY,
                    targets: vec![energy_target(90, 1_000)],
                },
            ]
        ),
        Err(CommandError::ConstraintError)
    );
    assert!(cluster.delegate().get_targets().is_empty());
}

#[test]
fn target_commands_need_charging_preferences() {
    let machine = EvseStateMachine::new(
        1,
        &EvseConfig::default(),
        chrono_tz::UTC,
        Arc::new(ManualClock::new(MONDAY_0800)),
        Box::new(ManualTimerService::new()),
    )
    .unwrap();
    let mut cluster = EnergyEvseCluster::new(1, EvseConfig::default().features(), machine);

    assert_eq!(
        cluster.invoke(EvseRequest::GetTargets),
        Err(CommandError::UnsupportedCommand)
    );
    assert_eq!(
        cluster.read_attribute(AttributeId::NextChargeTargetTime),
        Err(CommandError::UnsupportedAttribute)
    );
}
