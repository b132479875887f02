//! `ZoneRuntime` (spec.md §3): mutable per-zone state, persisted and
//! restored across restarts.

use super::Phase;
use crate::ids::ZoneId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRuntime {
    pub id: ZoneId,
    pub phase: Phase,
    pub phase_entered_at: DateTime<Utc>,
    pub peak_vwc: f64,
    pub last_irrigation_at: Option<DateTime<Utc>>,
    pub shots_in_phase: u32,
    pub cumulative_shot_volume_ml: f64,
    pub daily_usage_ml: f64,
    pub weekly_usage_ml: f64,
    pub daily_reset_date: NaiveDate,
    pub weekly_reset_date: NaiveDate,
    pub last_shot_at: Option<DateTime<Utc>>,
    pub last_emergency_at: Option<DateTime<Utc>>,
    pub emergency_shots: u32,
    pub manual_override_until: Option<DateTime<Utc>>,
    pub unsafe_flag: bool,
    pub unsafe_reason: Option<String>,
    pub sensor_degraded_since: Option<DateTime<Utc>>,
    pub last_known_vwc_value: Option<f64>,
    pub last_known_vwc_at: Option<DateTime<Utc>>,
    /// Set once continuous sensor degradation passes `sensorStaleGrace`;
    /// cleared as soon as a fresh reading arrives.
    pub parked: bool,
}

impl ZoneRuntime {
    pub fn new(id: ZoneId, phase: Phase, now: DateTime<Utc>, peak_vwc: f64) -> Self {
        Self {
            id,
            phase,
            phase_entered_at: now,
            peak_vwc,
            last_irrigation_at: None,
            shots_in_phase: 0,
            cumulative_shot_volume_ml: 0.0,
            daily_usage_ml: 0.0,
            weekly_usage_ml: 0.0,
            daily_reset_date: now.date_naive(),
            weekly_reset_date: now.date_naive(),
            last_shot_at: None,
            last_emergency_at: None,
            emergency_shots: 0,
            manual_override_until: None,
            unsafe_flag: false,
            unsafe_reason: None,
            sensor_degraded_since: None,
            last_known_vwc_value: None,
            last_known_vwc_at: None,
            parked: false,
        }
    }

    /// Resets counters that are scoped to one midnight cycle; called once
    /// per tick before any decision logic runs.
    pub fn roll_daily_counters(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.daily_reset_date {
            self.daily_usage_ml = 0.0;
            self.daily_reset_date = today;
        }
        if today >= self.weekly_reset_date + chrono::Duration::days(7) {
            self.weekly_usage_ml = 0.0;
            self.weekly_reset_date = today;
        }
    }

    /// Applies a phase transition: zeroes the shot counter, stamps entry
    /// time, and (entering P0 only) resets the peak reference (spec.md
    /// §4.3: "On every transition").
    pub fn enter_phase(&mut self, to: Phase, now: DateTime<Utc>, current_fused_vwc: f64) {
        self.phase = to;
        self.phase_entered_at = now;
        self.shots_in_phase = 0;
        if to == Phase::P0 {
            self.peak_vwc = current_fused_vwc;
        }
    }

    pub fn record_shot(&mut self, volume_ml: f64, now: DateTime<Utc>) {
        self.shots_in_phase += 1;
        self.cumulative_shot_volume_ml += volume_ml;
        self.daily_usage_ml += volume_ml;
        self.weekly_usage_ml += volume_ml;
        self.last_shot_at = Some(now);
        self.last_irrigation_at = Some(now);
    }

    pub fn record_emergency(&mut self, volume_ml: f64, now: DateTime<Utc>) {
        self.emergency_shots += 1;
        self.last_emergency_at = Some(now);
        self.record_shot(volume_ml, now);
    }

    pub fn mark_unsafe(&mut self, reason: impl Into<String>) {
        self.unsafe_flag = true;
        self.unsafe_reason = Some(reason.into());
    }

    pub fn clear_unsafe(&mut self) {
        self.unsafe_flag = false;
        self.unsafe_reason = None;
    }

    pub fn is_manual_override_active(&self, now: DateTime<Utc>) -> bool {
        self.manual_override_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, h, 0, 0).unwrap()
    }

    #[test]
    fn entering_p0_resets_peak_and_shot_counter() {
        let mut rt = ZoneRuntime::new(ZoneId(1), Phase::P2, at(0), 50.0);
        rt.shots_in_phase = 3;
        rt.enter_phase(Phase::P0, at(1), 72.0);
        assert_eq!(rt.shots_in_phase, 0);
        assert_eq!(rt.peak_vwc, 72.0);
        assert_eq!(rt.phase, Phase::P0);
    }

    #[test]
    fn entering_non_p0_phase_does_not_touch_peak() {
        let mut rt = ZoneRuntime::new(ZoneId(1), Phase::P0, at(0), 70.0);
        rt.enter_phase(Phase::P1, at(1), 56.0);
        assert_eq!(rt.peak_vwc, 70.0);
    }

    #[test]
    fn daily_usage_resets_on_new_calendar_day() {
        let mut rt = ZoneRuntime::new(ZoneId(1), Phase::P2, at(0), 60.0);
        rt.daily_usage_ml = 500.0;
        let tomorrow = at(0) + chrono::Duration::days(1);
        rt.roll_daily_counters(tomorrow);
        assert_eq!(rt.daily_usage_ml, 0.0);
    }
}
