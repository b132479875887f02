//! Sensor Fusion (spec.md §4.2): one instance per (zone, sensor kind),
//! turning a stream of noisy raw readings into a single trusted value with
//! a confidence and an age.

use crate::types::SensorKind;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// A single raw sample from one sensor.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub sensor_index: usize,
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Output of a fusion pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedValue {
    pub value: f64,
    pub confidence: f64,
    pub contributing: usize,
    pub at: DateTime<Utc>,
}

/// Raised when fewer than `min_sensors` survive filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoReliableSample;

#[derive(Clone)]
struct SensorState {
    ring: VecDeque<Reading>,
    reliability: f64,
}

impl SensorState {
    fn new() -> Self {
        Self { ring: VecDeque::new(), reliability: 1.0 }
    }
}

/// Fuses readings from a fixed set of sensors of one kind for one zone.
/// Fused VWC and fused EC are always separate instances (spec.md §4.2: "are
/// never mixed"). `Clone` backs a non-mutating dry run of a zone's decision
/// against a throwaway copy of its live fusion state.
#[derive(Clone)]
pub struct SensorFusion {
    kind: SensorKind,
    sensors: Vec<SensorState>,
    ring_window: chrono::Duration,
    freshness_horizon: chrono::Duration,
    min_sensors: usize,
}

impl SensorFusion {
    pub fn new(kind: SensorKind, sensor_count: usize, ring_window_sec: u64, freshness_horizon_sec: u64, min_sensors: usize) -> Self {
        Self {
            kind,
            sensors: (0..sensor_count).map(|_| SensorState::new()).collect(),
            ring_window: chrono::Duration::seconds(ring_window_sec as i64),
            freshness_horizon: chrono::Duration::seconds(freshness_horizon_sec as i64),
            min_sensors,
        }
    }

    /// Ingests a raw reading, dropping it silently if outside the kind's
    /// plausible range.
    pub fn ingest(&mut self, sensor_index: usize, value: f64, at: DateTime<Utc>) {
        let (lo, hi) = self.kind.plausible_range();
        if value < lo || value > hi {
            return;
        }
        if let Some(state) = self.sensors.get_mut(sensor_index) {
            state.ring.push_back(Reading { sensor_index, value, at });
            let cutoff = at - self.ring_window;
            while state.ring.front().is_some_and(|r| r.at < cutoff) {
                state.ring.pop_front();
            }
        }
    }

    /// Runs one fusion pass as of `now`, using each sensor's latest reading
    /// still within the freshness horizon.
    pub fn fuse(&mut self, now: DateTime<Utc>) -> Result<FusedValue, NoReliableSample> {
        let cutoff = now - self.freshness_horizon;
        let latest: Vec<(usize, Reading)> = self
            .sensors
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.ring.back().copied().map(|r| (i, r)))
            .filter(|(_, r)| r.at >= cutoff)
            .collect();

        if latest.is_empty() {
            return Err(NoReliableSample);
        }

        let values: Vec<f64> = latest.iter().map(|(_, r)| r.value).collect();
        let (q1, q3) = quartiles(&values);
        let iqr = q3 - q1;
        let lower = q1 - 1.5 * iqr;
        let upper = q3 + 1.5 * iqr;

        let mut survivors: Vec<(usize, Reading)> = Vec::new();
        let mut outlier_indices: Vec<usize> = Vec::new();
        for (i, r) in &latest {
            if r.value < lower || r.value > upper {
                outlier_indices.push(*i);
            } else {
                survivors.push((*i, *r));
            }
        }

        for i in &outlier_indices {
            if let Some(s) = self.sensors.get_mut(*i) {
                s.reliability = (s.reliability - crate::config::defaults::RELIABILITY_DECREMENT)
                    .max(crate::config::defaults::RELIABILITY_FLOOR);
            }
        }
        for (i, _) in &survivors {
            if let Some(s) = self.sensors.get_mut(*i) {
                s.reliability = (s.reliability + crate::config::defaults::RELIABILITY_INCREMENT)
                    .min(crate::config::defaults::RELIABILITY_CEILING);
            }
        }

        if survivors.len() < self.min_sensors {
            return Err(NoReliableSample);
        }

        let total_sensors = self.sensors.len().max(1);
        let weight_sum: f64 = survivors.iter().map(|(i, _)| self.sensors[*i].reliability).sum();
        let weighted_value: f64 = if weight_sum > 0.0 {
            survivors.iter().map(|(i, r)| r.value * self.sensors[*i].reliability).sum::<f64>() / weight_sum
        } else {
            survivors.iter().map(|(_, r)| r.value).sum::<f64>() / survivors.len() as f64
        };
        let mean_reliability: f64 = survivors.iter().map(|(i, _)| self.sensors[*i].reliability).sum::<f64>() / survivors.len() as f64;
        let confidence = (survivors.len() as f64 / total_sensors as f64) * mean_reliability;
        let newest = survivors.iter().map(|(_, r)| r.at).max().unwrap_or(now);

        Ok(FusedValue { value: weighted_value, confidence, contributing: survivors.len(), at: newest })
    }
}

/// Median-based quartiles over a small unsorted slice (sensor counts are
/// single digits; no need for a streaming quantile estimator).
fn quartiles(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 1 {
        return (sorted[0], sorted[0]);
    }
    let lower_half = &sorted[0..n / 2];
    let upper_half = if n % 2 == 0 { &sorted[n / 2..] } else { &sorted[n / 2 + 1..] };
    (median(lower_half), median(upper_half))
}

fn median(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(sec: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + sec, 0).unwrap()
    }

    #[test]
    fn no_reliable_sample_when_all_stale() {
        let mut fusion = SensorFusion::new(SensorKind::Vwc, 2, 600, 300, 1);
        fusion.ingest(0, 60.0, at(0));
        let result = fusion.fuse(at(1000));
        assert_eq!(result, Err(NoReliableSample));
    }

    #[test]
    fn out_of_range_reading_is_dropped() {
        let mut fusion = SensorFusion::new(SensorKind::Vwc, 1, 600, 300, 1);
        fusion.ingest(0, 150.0, at(0));
        assert_eq!(fusion.fuse(at(1)), Err(NoReliableSample));
    }

    #[test]
    fn outlier_is_excluded_from_weighted_mean() {
        let mut fusion = SensorFusion::new(SensorKind::Vwc, 4, 600, 300, 1);
        fusion.ingest(0, 60.0, at(0));
        fusion.ingest(1, 61.0, at(0));
        fusion.ingest(2, 59.0, at(0));
        fusion.ingest(3, 10.0, at(0)); // gross outlier
        let fused = fusion.fuse(at(1)).unwrap();
        assert!((fused.value - 60.0).abs() < 2.0, "fused value {} should be near 60", fused.value);
        assert_eq!(fused.contributing, 3);
    }

    #[test]
    fn confidence_reflects_survivor_ratio_and_reliability() {
        let mut fusion = SensorFusion::new(SensorKind::Vwc, 2, 600, 300, 1);
        fusion.ingest(0, 60.0, at(0));
        fusion.ingest(1, 61.0, at(0));
        let fused = fusion.fuse(at(1)).unwrap();
        assert_eq!(fused.contributing, 2);
        assert!(fused.confidence > 0.9);
    }

    #[test]
    fn repeated_fusion_is_idempotent_given_same_samples() {
        let mut fusion = SensorFusion::new(SensorKind::Vwc, 2, 600, 300, 1);
        fusion.ingest(0, 60.0, at(0));
        fusion.ingest(1, 61.0, at(0));
        let first = fusion.fuse(at(1)).unwrap();
        let second = fusion.fuse(at(1)).unwrap();
        assert_eq!(first.value, second.value);
    }

    #[test]
    fn reliability_decreases_on_outlier_and_increases_on_consistency() {
        let mut fusion = SensorFusion::new(SensorKind::Vwc, 2, 600, 300, 1);
        fusion.ingest(0, 60.0, at(0));
        fusion.ingest(1, 10.0, at(0));
        let _ = fusion.fuse(at(1));
        assert!(fusion.sensors[1].reliability < 1.0);
        assert!(fusion.sensors[0].reliability >= 1.0);
    }
}
