//! Time sources for the engine
//!
//! Attributes carry wall-clock time as seconds since 2000-01-01T00:00:00Z
//! (the "epoch seconds" used throughout the clusters). Durations measured
//! inside a component use a separate monotonic millisecond counter.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;

/// Seconds between 1970-01-01 and 2000-01-01
pub const EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Wall-clock failure
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// Real time has not been synchronized yet
    #[error("real time clock not synchronized")]
    NotSynced,
}

/// Source of wall-clock and monotonic time
pub trait Clock: Send + Sync {
    /// Current time in epoch seconds
    fn now_epoch_seconds(&self) -> Result<u32, ClockError>;

    /// Milliseconds from an arbitrary fixed origin, never going backwards
    fn monotonic_ms(&self) -> u64;
}

/// Convert a UTC timestamp to epoch seconds. `None` before 2000 or after 2136.
pub fn to_epoch_seconds(time: DateTime<Utc>) -> Option<u32> {
    u32::try_from(time.timestamp() - EPOCH_OFFSET_SECS).ok()
}

/// Convert epoch seconds back to a UTC timestamp
pub fn from_epoch_seconds(epoch_seconds: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(epoch_seconds) + EPOCH_OFFSET_SECS, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// System clock backed by chrono
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> Result<u32, ClockError> {
        to_epoch_seconds(Utc::now()).ok_or(ClockError::NotSynced)
    }

    fn monotonic_ms(&self) -> u64 {
        u64::try_from(process_start().elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Settable clock for tests and simulation.
///
/// Clones share the same time, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<ManualClockState>,
}

#[derive(Debug)]
struct ManualClockState {
    epoch_seconds: AtomicU64,
    monotonic_ms: AtomicU64,
    synced: AtomicBool,
}

impl ManualClock {
    /// A synchronized clock showing `epoch_seconds`
    pub fn new(epoch_seconds: u32) -> Self {
        Self {
            inner: Arc::new(ManualClockState {
                epoch_seconds: AtomicU64::new(u64::from(epoch_seconds)),
                monotonic_ms: AtomicU64::new(0),
                synced: AtomicBool::new(true),
            }),
        }
    }

    /// A clock that reports [`ClockError::NotSynced`] until [`ManualClock::set_synced`]
    pub fn unsynced() -> Self {
        let clock = Self::new(0);
        clock.set_synced(false);
        clock
    }

    pub fn set_synced(&self, synced: bool) {
        self.inner.synced.store(synced, Ordering::SeqCst);
    }

    pub fn set_epoch_seconds(&self, epoch_seconds: u32) {
        self.inner
            .epoch_seconds
            .store(u64::from(epoch_seconds), Ordering::SeqCst);
    }

    /// Move both wall-clock and monotonic time forward
    pub fn advance_secs(&self, secs: u32) {
        self.advance_ms(u64::from(secs) * 1000);
    }

    /// Move monotonic time forward by `ms`; wall-clock follows in whole seconds
    pub fn advance_ms(&self, ms: u64) {
        let before = self.inner.monotonic_ms.fetch_add(ms, Ordering::SeqCst);
        let whole_secs = (before + ms) / 1000 - before / 1000;
        self.inner
            .epoch_seconds
            .fetch_add(whole_secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> Result<u32, ClockError> {
        if !self.inner.synced.load(Ordering::SeqCst) {
            return Err(ClockError::NotSynced);
        }
        u32::try_from(self.inner.epoch_seconds.load(Ordering::SeqCst))
            .map_err(|_| ClockError::NotSynced)
    }

    fn monotonic_ms(&self) -> u64 {
        self.inner.monotonic_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_conversion_roundtrip() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let secs = to_epoch_seconds(t).unwrap();
        assert_eq!(from_epoch_seconds(secs), t);
        assert_eq!(to_epoch_seconds(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()), Some(0));
    }

    #[test]
    fn times_before_2000_are_not_representable() {
        let t = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(to_epoch_seconds(t), None);
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(1000);
        let other = clock.clone();
        clock.advance_secs(5);
        assert_eq!(other.now_epoch_seconds(), Ok(1005));
        assert_eq!(other.monotonic_ms(), 5000);
    }

    #[test]
    fn manual_clock_wall_time_follows_whole_seconds() {
        let clock = ManualClock::new(0);
        clock.advance_ms(600);
        assert_eq!(clock.now_epoch_seconds(), Ok(0));
        clock.advance_ms(600);
        assert_eq!(clock.now_epoch_seconds(), Ok(1));
    }

    #[test]
    fn unsynced_clock_reports_error() {
        let clock = ManualClock::unsynced();
        assert_eq!(clock.now_epoch_seconds(), Err(ClockError::NotSynced));
        clock.set_synced(true);
        assert!(clock.now_epoch_seconds().is_ok());
    }

    #[test]
    fn system_clock_is_synced_today() {
        assert!(SystemClock.now_epoch_seconds().is_ok());
    }
}
