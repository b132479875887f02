//! Safety gate state (spec.md §4.5 step 1): per-zone fields the sequencer
//! re-checks immediately before actuating a job, since a job can sit queued
//! behind higher-priority work for a while after the coordinator decided to
//! enqueue it — state current at decision time may be stale by execution
//! time.

use crate::ids::ZoneId;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Per-zone fields mirrored from `ZoneRuntime` after every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneSafetyState {
    pub unsafe_flag: bool,
    pub manual_override_until: Option<DateTime<Utc>>,
    pub daily_usage_ml: f64,
    pub daily_budget_ml: f64,
}

impl ZoneSafetyState {
    fn manual_override_active(&self, now: DateTime<Utc>) -> bool {
        self.manual_override_until.is_some_and(|until| now < until)
    }
}

/// Why the gate blocked a zone; mirrored 1:1 into the `IrrigationSkipped`
/// reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateBlock {
    SystemDisabled,
    AutoIrrigationOff,
    ZoneDisabled,
    ManualOverride,
    DailyBudgetExceeded,
    Unsafe,
}

impl GateBlock {
    pub fn as_str(self) -> &'static str {
        match self {
            GateBlock::SystemDisabled => "system-disabled",
            GateBlock::AutoIrrigationOff => "auto-irrigation-off",
            GateBlock::ZoneDisabled => "zone-disabled",
            GateBlock::ManualOverride => "manual-override",
            GateBlock::DailyBudgetExceeded => "daily-budget-exceeded",
            GateBlock::Unsafe => "unsafe",
        }
    }
}

/// Shared snapshot of per-zone safety state: written by the coordinator
/// after every tick, read by the sequencer right before actuation. A plain
/// sync mutex is enough here — every hold is an instantaneous map read or
/// write, never spanning an `.await` (spec.md §5: "no lock is ever held
/// while awaiting a dwell").
#[derive(Default)]
pub struct SafetyRegistry {
    zones: Mutex<HashMap<ZoneId, ZoneSafetyState>>,
    /// Zones the sequencer itself has latched Unsafe (spec.md §7: a
    /// persistent bridge write failure "marks the zone Unsafe"), sticky
    /// across the coordinator's per-tick `update()` until the process
    /// restarts — the sequencer has no path back into `ZoneRuntime`'s own
    /// flag, which the coordinator owns behind a different lock.
    sequencer_unsafe: Mutex<HashSet<ZoneId>>,
}

impl SafetyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, zone: ZoneId, mut state: ZoneSafetyState) {
        if self.sequencer_unsafe.lock().unwrap_or_else(|p| p.into_inner()).contains(&zone) {
            state.unsafe_flag = true;
        }
        self.zones.lock().unwrap_or_else(|p| p.into_inner()).insert(zone, state);
    }

    /// Latches a zone Unsafe from the sequencer's side of a job.
    pub fn mark_unsafe(&self, zone: ZoneId) {
        self.sequencer_unsafe.lock().unwrap_or_else(|p| p.into_inner()).insert(zone);
        let mut guard = self.zones.lock().unwrap_or_else(|p| p.into_inner());
        guard.entry(zone).or_default().unsafe_flag = true;
    }

    /// `additional_volume_ml` is the shot this zone would receive if the job
    /// proceeds, checked against the remaining daily budget. A zone with no
    /// recorded state (never ticked yet) passes open.
    pub fn check(&self, zone: ZoneId, now: DateTime<Utc>, additional_volume_ml: f64) -> Result<(), GateBlock> {
        let guard = self.zones.lock().unwrap_or_else(|p| p.into_inner());
        let Some(state) = guard.get(&zone) else {
            return Ok(());
        };
        if state.unsafe_flag {
            return Err(GateBlock::Unsafe);
        }
        if state.manual_override_active(now) {
            return Err(GateBlock::ManualOverride);
        }
        if state.daily_usage_ml + additional_volume_ml > state.daily_budget_ml {
            return Err(GateBlock::DailyBudgetExceeded);
        }
        Ok(())
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
    fn unknown_zone_passes_open() {
        let reg = SafetyRegistry::new();
        assert!(reg.check(ZoneId(9), at(0), 100.0).is_ok());
    }

    #[test]
    fn unsafe_flag_blocks() {
        let reg = SafetyRegistry::new();
        reg.update(ZoneId(1), ZoneSafetyState { unsafe_flag: true, daily_budget_ml: 5000.0, ..Default::default() });
        assert_eq!(reg.check(ZoneId(1), at(0), 50.0), Err(GateBlock::Unsafe));
    }

    #[test]
    fn manual_override_blocks_until_expiry() {
        let reg = SafetyRegistry::new();
        reg.update(
            ZoneId(1),
            ZoneSafetyState { manual_override_until: Some(at(5)), daily_budget_ml: 5000.0, ..Default::default() },
        );
        assert_eq!(reg.check(ZoneId(1), at(2), 50.0), Err(GateBlock::ManualOverride));
        assert!(reg.check(ZoneId(1), at(6), 50.0).is_ok());
    }

    #[test]
    fn daily_budget_blocks_when_exceeded() {
        let reg = SafetyRegistry::new();
        reg.update(ZoneId(1), ZoneSafetyState { daily_usage_ml: 4980.0, daily_budget_ml: 5000.0, ..Default::default() });
        assert_eq!(reg.check(ZoneId(1), at(0), 50.0), Err(GateBlock::DailyBudgetExceeded));
        assert!(reg.check(ZoneId(1), at(0), 10.0).is_ok());
    }

    #[test]
    fn sequencer_mark_unsafe_survives_a_later_coordinator_update() {
        let reg = SafetyRegistry::new();
        reg.update(ZoneId(1), ZoneSafetyState { daily_budget_ml: 5000.0, ..Default::default() });
        reg.mark_unsafe(ZoneId(1));
        assert_eq!(reg.check(ZoneId(1), at(0), 10.0), Err(GateBlock::Unsafe));

        // Coordinator's next tick re-mirrors ZoneRuntime, which still thinks
        // the zone is safe; the sequencer's latch must not be clobbered.
        reg.update(ZoneId(1), ZoneSafetyState { daily_budget_ml: 5000.0, ..Default::default() });
        assert_eq!(reg.check(ZoneId(1), at(0), 10.0), Err(GateBlock::Unsafe));
    }
}
