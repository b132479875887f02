//! Time and light-schedule capabilities.
//!
//! Every component that reads wall-clock time or the grow-light schedule
//! takes one of these as a constructor argument instead of calling
//! `chrono::Utc::now()` directly, so tests can inject a fake clock and a
//! fixed schedule (see design note in SPEC_FULL.md §9: no hidden globals for
//! `now()` or the light schedule).

use chrono::{DateTime, NaiveTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Capability for reading the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock whose value is set explicitly and advanced by the test.
#[derive(Clone)]
pub struct FakeClock {
    millis: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }
}

/// Capability for answering "are the grow lights on right now" and
/// "when is the next on/off transition", independent of config plumbing.
pub trait LightSchedule: Send + Sync {
    /// Local time the lights turn on.
    fn on_time(&self) -> NaiveTime;
    /// Local time the lights turn off.
    fn off_time(&self) -> NaiveTime;

    /// True if, at `now`, the lights are on.
    fn lights_on(&self, now: DateTime<Utc>) -> bool {
        let t = now.time();
        if self.on_time() <= self.off_time() {
            t >= self.on_time() && t < self.off_time()
        } else {
            // Schedule wraps past midnight.
            t >= self.on_time() || t < self.off_time()
        }
    }

    /// Seconds until the lights next turn off, from `now`. Zero or negative
    /// (saturated to zero) once `now` is already past the off time for the
    /// current lit window.
    fn seconds_until_off(&self, now: DateTime<Utc>) -> i64 {
        let today_off = now.date_naive().and_time(self.off_time());
        let off_at = if now.naive_utc() <= today_off {
            today_off
        } else {
            today_off + chrono::Duration::days(1)
        };
        (off_at - now.naive_utc()).num_seconds().max(0)
    }
}

/// Fixed on/off schedule, read from config at boot (topology-like — not
/// live-editable mid-process beyond reloading config and recreating this).
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredLightSchedule {
    on: NaiveTime,
    off: NaiveTime,
}

impl ConfiguredLightSchedule {
    pub fn new(on: NaiveTime, off: NaiveTime) -> Self {
        Self { on, off }
    }
}

impl LightSchedule for ConfiguredLightSchedule {
    fn on_time(&self) -> NaiveTime {
        self.on
    }
    fn off_time(&self) -> NaiveTime {
        self.off
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, h, m, 0).unwrap()
    }

    #[test]
    fn lights_on_within_normal_window() {
        let sched = ConfiguredLightSchedule::new(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        );
        assert!(sched.lights_on(at(12, 0)));
        assert!(!sched.lights_on(at(21, 0)));
        assert!(!sched.lights_on(at(7, 0)));
    }

    #[test]
    fn lights_on_wrapping_midnight() {
        let sched = ConfiguredLightSchedule::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        );
        assert!(sched.lights_on(at(23, 0)));
        assert!(sched.lights_on(at(2, 0)));
        assert!(!sched.lights_on(at(12, 0)));
    }

    #[test]
    fn fake_clock_advances() {
        let fc = FakeClock::new(at(10, 0));
        assert_eq!(fc.now(), at(10, 0));
        fc.advance(chrono::Duration::minutes(90));
        assert_eq!(fc.now(), at(11, 30));
    }
}
