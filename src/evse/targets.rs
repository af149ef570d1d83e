//! Charging targets (ChargingPreferences feature)
//!
//! A schedule names one or more days of the week and up to ten targets for
//! each of them. Targets are stored per day: a new SetTargets replaces the
//! days it names and keeps the others.

use crate::clock::{from_epoch_seconds, to_epoch_seconds};
use crate::error::{CommandError, CommandResult};
use crate::logging::get_logger;
use chrono::{Datelike, Days, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Latest target time of a day
pub const MAX_MINUTES_PAST_MIDNIGHT: u16 = 1439;

/// Largest target state of charge (percent)
pub const MAX_TARGET_SOC_PERCENT: u8 = 100;

/// Targets allowed per day
pub const MAX_TARGETS_PER_DAY: usize = 10;

/// Targets allowed across the week
pub const MAX_TARGETS_TOTAL: usize = 70;

/// Day-of-week bitmap: bit 0 is Sunday, bit 6 is Saturday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub const SUNDAY: DayOfWeek = DayOfWeek(0x01);
    pub const MONDAY: DayOfWeek = DayOfWeek(0x02);
    pub const TUESDAY: DayOfWeek = DayOfWeek(0x04);
    pub const WEDNESDAY: DayOfWeek = DayOfWeek(0x08);
    pub const THURSDAY: DayOfWeek = DayOfWeek(0x10);
    pub const FRIDAY: DayOfWeek = DayOfWeek(0x20);
    pub const SATURDAY: DayOfWeek = DayOfWeek(0x40);
    pub const MASK: u8 = 0x7F;

    /// Bits above Saturday are dropped
    pub fn from_bits(bits: u8) -> Self {
        DayOfWeek(bits & Self::MASK)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: DayOfWeek) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Day with `index` days from Sunday (0..=6)
    fn day(index: u32) -> DayOfWeek {
        DayOfWeek(1 << (index % 7))
    }
}

impl std::ops::BitOr for DayOfWeek {
    type Output = DayOfWeek;

    fn bitor(self, rhs: DayOfWeek) -> DayOfWeek {
        DayOfWeek(self.0 | rhs.0)
    }
}

/// One charging target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingTarget {
    pub minutes_past_midnight: u16,
    pub target_soc: Option<u8>,
    /// mWh
    pub added_energy: Option<i64>,
}

/// Targets for the named days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingTargetSchedule {
    pub day_of_week: DayOfWeek,
    pub targets: Vec<ChargingTarget>,
}

/// The next target after "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextChargeTarget {
    /// Epoch seconds
    pub target_time: u32,
    pub target_soc: Option<u8>,
    pub added_energy: Option<i64>,
}

/// Check a SetTargets payload before anything is stored
pub fn validate_targets(
    schedules: &[ChargingTargetSchedule],
    soc_reporting: bool,
) -> CommandResult {
    let logger = get_logger("targets");
    let mut seen_days = 0u8;

    for schedule in schedules {
        let bits = schedule.day_of_week.bits() & DayOfWeek::MASK;
        if seen_days & bits != 0 {
            logger.error(&format!("Day of week 0x{:02x} already has targets", bits));
            return Err(CommandError::ConstraintError);
        }
        seen_days |= bits;

        for target in &schedule.targets {
            if target.minutes_past_midnight > MAX_MINUTES_PAST_MIDNIGHT {
                logger.error(&format!(
                    "MinutesPastMidnight invalid: {}",
                    target.minutes_past_midnight
                ));
                return Err(CommandError::ConstraintError);
            }

            if soc_reporting {
                match target.target_soc {
                    None => {
                        logger.error("SoC reporting enabled but TargetSoC missing");
                        return Err(CommandError::InvalidCommand);
                    }
                    Some(soc) if soc > MAX_TARGET_SOC_PERCENT => {
                        logger.error(&format!("TargetSoC invalid: {}", soc));
                        return Err(CommandError::ConstraintError);
                    }
                    Some(_) => {}
                }
            } else if target
                .target_soc
                .is_some_and(|soc| soc != MAX_TARGET_SOC_PERCENT)
            {
                logger.error("TargetSoC must be 100 without SoC reporting");
                return Err(CommandError::ConstraintError);
            }

            if target.target_soc.is_none() && target.added_energy.is_none() {
                logger.error("Target needs AddedEnergy or TargetSoC");
                return Err(CommandError::Failure);
            }

            if let Some(energy) = target.added_energy
                && energy < 0
            {
                logger.error(&format!("AddedEnergy invalid: {}", energy));
                return Err(CommandError::ConstraintError);
            }
        }

        if schedule.targets.len() > MAX_TARGETS_PER_DAY {
            logger.error(&format!("Too many targets: {}", schedule.targets.len()));
            return Err(CommandError::ResourceExhausted);
        }
    }

    Ok(())
}

/// Targets kept per day of the week
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsStore {
    /// Index 0 is Sunday
    days: [Vec<ChargingTarget>; 7],
}

impl TargetsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.days.iter().map(Vec::len).sum()
    }

    /// Replace the targets of every day the schedules name.
    ///
    /// Nothing changes if a day would exceed ten targets or the week seventy.
    pub fn set(&mut self, schedules: &[ChargingTargetSchedule]) -> CommandResult {
        let mut days = self.days.clone();
        for schedule in schedules {
            if schedule.targets.len() > MAX_TARGETS_PER_DAY {
                return Err(CommandError::ResourceExhausted);
            }
            let mut targets = schedule.targets.clone();
            targets.sort_by_key(|t| t.minutes_past_midnight);
            for (index, slot) in days.iter_mut().enumerate() {
                if schedule
                    .day_of_week
                    .contains(DayOfWeek::day(index as u32))
                {
                    *slot = targets.clone();
                }
            }
        }

        if days.iter().map(Vec::len).sum::<usize>() > MAX_TARGETS_TOTAL {
            return Err(CommandError::ResourceExhausted);
        }
        self.days = days;
        Ok(())
    }

    /// One single-day schedule per day that has targets, Sunday first
    pub fn get(&self) -> Vec<ChargingTargetSchedule> {
        self.days
            .iter()
            .enumerate()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(index, targets)| ChargingTargetSchedule {
                day_of_week: DayOfWeek::day(index as u32),
                targets: targets.clone(),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        for day in &mut self.days {
            day.clear();
        }
    }

    /// First target strictly after `now` (epoch seconds), looking up to a
    /// week ahead in `tz` local time
    pub fn next_target(&self, now: u32, tz: Tz) -> Option<NextChargeTarget> {
        let now_local = from_epoch_seconds(now).with_timezone(&tz);
        let today = now_local.date_naive();

        for offset in 0..=7u64 {
            let date = today.checked_add_days(Days::new(offset))?;
            let index = date.weekday().num_days_from_sunday() as usize;
            for target in &self.days[index] {
                let hour = u32::from(target.minutes_past_midnight / 60);
                let minute = u32::from(target.minutes_past_midnight % 60);
                let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                    continue;
                };
                // Skips local times that fall in a DST gap
                let Some(local) = tz.from_local_datetime(&naive).earliest() else {
                    continue;
                };
                if local <= now_local {
                    continue;
                }
                let target_time = to_epoch_seconds(local.with_timezone(&Utc))?;
                return Some(NextChargeTarget {
                    target_time,
                    target_soc: target.target_soc,
                    added_energy: target.added_energy,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(minutes: u16, energy: i64) -> ChargingTarget {
        ChargingTarget {
            minutes_past_midnight: minutes,
            target_soc: None,
            added_energy: Some(energy),
        }
    }

    fn schedule(days: DayOfWeek, targets: Vec<ChargingTarget>) -> ChargingTargetSchedule {
        ChargingTargetSchedule {
            day_of_week: days,
            targets,
        }
    }

    #[test]
    fn overlapping_days_are_rejected() {
        let schedules = vec![
            schedule(DayOfWeek::MONDAY | DayOfWeek::TUESDAY, vec![target(60, 1000)]),
            schedule(DayOfWeek::TUESDAY, vec![target(120, 1000)]),
        ];
        assert_eq!(
            validate_targets(&schedules, false),
            Err(CommandError::ConstraintError)
        );
    }

    #[test]
    fn target_field_rules() {
        let late = vec![schedule(DayOfWeek::MONDAY, vec![target(1440, 1)])];
        assert_eq!(validate_targets(&late, false), Err(CommandError::ConstraintError));

        let empty = vec![schedule(
            DayOfWeek::MONDAY,
            vec![ChargingTarget {
                minutes_past_midnight: 0,
                target_soc: None,
                added_energy: None,
            }],
        )];
        assert_eq!(validate_targets(&empty, false), Err(CommandError::Failure));
        assert_eq!(validate_targets(&empty, true), Err(CommandError::InvalidCommand));

        let partial_soc = vec![schedule(
            DayOfWeek::MONDAY,
            vec![ChargingTarget {
                minutes_past_midnight: 0,
                target_soc: Some(80),
                added_energy: None,
            }],
        )];
        assert_eq!(
            validate_targets(&partial_soc, false),
            Err(CommandError::ConstraintError)
        );
        assert_eq!(validate_targets(&partial_soc, true), Ok(()));

        let negative = vec![schedule(DayOfWeek::MONDAY, vec![target(0, -1)])];
        assert_eq!(
            validate_targets(&negative, false),
            Err(CommandError::ConstraintError)
        );

        let crowded = vec![schedule(
            DayOfWeek::MONDAY,
            (0..11).map(|i| target(i * 10, 100)).collect(),
        )];
        assert_eq!(
            validate_targets(&crowded, false),
            Err(CommandError::ResourceExhausted)
        );
    }

    #[test]
    fn set_replaces_named_days_only() {
        let mut store = TargetsStore::new();
        store
            .set(&[schedule(
                DayOfWeek::MONDAY | DayOfWeek::FRIDAY,
                vec![target(420, 5_000)],
            )])
            .unwrap();
        store
            .set(&[schedule(DayOfWeek::FRIDAY, vec![target(480, 7_000), target(60, 1)])])
            .unwrap();

        let schedules = store.get();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].day_of_week, DayOfWeek::MONDAY);
        assert_eq!(schedules[0].targets, vec![target(420, 5_000)]);
        assert_eq!(schedules[1].day_of_week, DayOfWeek::FRIDAY);
        assert_eq!(schedules[1].targets, vec![target(60, 1), target(480, 7_000)]);
        assert_eq!(store.len(), 3);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn next_target_searches_forward() {
        // 2024-01-01 is a Monday
        let monday_noon = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let now = to_epoch_seconds(monday_noon).unwrap();
        let mut store = TargetsStore::new();
        store
            .set(&[schedule(DayOfWeek::MONDAY, vec![target(7 * 60, 9_000)])])
            .unwrap();

        // Monday 07:00 has passed, so next Monday
        let next = store.next_target(now, chrono_tz::UTC).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 8, 7, 0, 0).unwrap();
        assert_eq!(next.target_time, to_epoch_seconds(expected).unwrap());
        assert_eq!(next.added_energy, Some(9_000));

        store
            .set(&[schedule(DayOfWeek::TUESDAY, vec![target(6 * 60, 4_000)])])
            .unwrap();
        let next = store.next_target(now, chrono_tz::UTC).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap();
        assert_eq!(next.target_time, to_epoch_seconds(expected).unwrap());
    }

    #[test]
    fn next_target_uses_local_time() {
        let monday_noon = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let now = to_epoch_seconds(monday_noon).unwrap();
        let mut store = TargetsStore::new();
        store
            .set(&[schedule(DayOfWeek::MONDAY, vec![target(18 * 60, 1_000)])])
            .unwrap();

        // 18:00 in Amsterdam (UTC+1 in winter) is 17:00 UTC
        let next = store
            .next_target(now, chrono_tz::Europe::Amsterdam)
            .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 17, 0, 0).unwrap();
        assert_eq!(next.target_time, to_epoch_seconds(expected).unwrap());
    }

    #[test]
    fn no_targets_no_next() {
        assert_eq!(TargetsStore::new().next_target(0, chrono_tz::UTC), None);
    }
}
