//! Dryback Detector (spec.md §4.4): a two-state peak/valley tracker with
//! hysteresis over fused VWC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One completed peak-to-valley excursion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrybackWindow {
    pub peak_vwc: f64,
    pub valley_vwc: f64,
    pub peak_at: DateTime<Utc>,
    pub valley_at: DateTime<Utc>,
    pub percent_drop: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerState {
    TrackingPeak,
    TrackingValley,
}

/// Per-zone dryback tracker over minute-downsampled fused VWC.
pub struct DrybackDetector {
    noise_band_pct: f64,
    state: TrackerState,
    running_peak: f64,
    running_peak_at: DateTime<Utc>,
    running_valley: f64,
    running_valley_at: DateTime<Utc>,
    history: VecDeque<DrybackWindow>,
    history_window: chrono::Duration,
    last_sample_minute: Option<DateTime<Utc>>,
}

impl DrybackDetector {
    pub fn new(noise_band_pct: f64, history_hours: u64, initial_vwc: f64, at: DateTime<Utc>) -> Self {
        Self {
            noise_band_pct,
            state: TrackerState::TrackingPeak,
            running_peak: initial_vwc,
            running_peak_at: at,
            running_valley: initial_vwc,
            running_valley_at: at,
            history: VecDeque::new(),
            history_window: chrono::Duration::hours(history_hours as i64),
            last_sample_minute: None,
        }
    }

    /// Resets the peak reference to `current`. Called when the zone enters
    /// P0 — the authoritative dryback reference for the P0->P1 guard.
    pub fn reset_peak(&mut self, current: f64, at: DateTime<Utc>) {
        self.state = TrackerState::TrackingPeak;
        self.running_peak = current;
        self.running_peak_at = at;
        self.running_valley = current;
        self.running_valley_at = at;
    }

    /// Feeds one fused VWC sample. Downsamples to at most one sample per
    /// minute per zone to bound memory (spec.md §3: "minute-downsampled").
    pub fn observe(&mut self, value: f64, at: DateTime<Utc>) {
        if let Some(last) = self.last_sample_minute {
            if at - last < chrono::Duration::minutes(1) {
                return;
            }
        }
        self.last_sample_minute = Some(at);
        self.step(value, at);
        self.evict_old(at);
    }

    fn step(&mut self, value: f64, at: DateTime<Utc>) {
        match self.state {
            TrackerState::TrackingPeak => {
                if value > self.running_peak {
                    self.running_peak = value;
                    self.running_peak_at = at;
                } else if self.running_peak - value >= self.noise_band_pct {
                    // Peak confirmed; begin tracking the valley from here.
                    self.state = TrackerState::TrackingValley;
                    self.running_valley = value;
                    self.running_valley_at = at;
                }
            }
            TrackerState::TrackingValley => {
                if value < self.running_valley {
                    self.running_valley = value;
                    self.running_valley_at = at;
                } else if value - self.running_valley >= self.noise_band_pct {
                    // Valley confirmed; record the completed window.
                    let percent_drop = if self.running_peak > 0.0 {
                        (self.running_peak - self.running_valley) / self.running_peak * 100.0
                    } else {
                        0.0
                    };
                    self.history.push_back(DrybackWindow {
                        peak_vwc: self.running_peak,
                        valley_vwc: self.running_valley,
                        peak_at: self.running_peak_at,
                        valley_at: self.running_valley_at,
                        percent_drop,
                    });
                    self.state = TrackerState::TrackingPeak;
                    self.running_peak = value;
                    self.running_peak_at = at;
                }
            }
        }
    }

    fn evict_old(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.history_window;
        while self.history.front().is_some_and(|w| w.valley_at < cutoff) {
            self.history.pop_front();
        }
    }

    /// Current dryback percent relative to the running peak.
    pub fn current_dryback_percent(&self, current_value: f64) -> f64 {
        if self.running_peak <= 0.0 {
            return 0.0;
        }
        (self.running_peak - current_value) / self.running_peak * 100.0
    }

    pub fn running_peak(&self) -> f64 {
        self.running_peak
    }

    pub fn completed_windows(&self) -> &VecDeque<DrybackWindow> {
        &self.history
    }

    pub fn just_completed_valley(&self) -> Option<&DrybackWindow> {
        self.history.back()
    }
}
