use crate::bridge::EntityRef;
use crate::ids::ZoneId;
use crate::types::Priority;
use chrono::{DateTime, Utc};

/// One zone's slice of a (possibly grouped) job: its valve and the duration
/// it stays open.
#[derive(Debug, Clone)]
pub struct ZoneShot {
    pub zone: ZoneId,
    pub volume_ml: f64,
    pub duration_ms: u64,
    pub zone_valve: EntityRef,
}

/// Queued actuation (spec.md §3). A job with more than one `shots` entry is
/// a grouped burst: all zone valves open together in step 4 and close
/// together in step 6.
#[derive(Debug, Clone)]
pub struct IrrigationJob {
    pub shots: Vec<ZoneShot>,
    pub pump: EntityRef,
    pub main_valve: EntityRef,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    /// `threshold - fusedVwc` for the driest contributing zone; used as the
    /// same-priority tie-break (spec.md §4.3: "driest first").
    pub vwc_margin: f64,
    pub reason: &'static str,
}

impl IrrigationJob {
    pub fn max_duration_ms(&self) -> u64 {
        self.shots.iter().map(|s| s.duration_ms).max().unwrap_or(0)
    }

    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.shots.iter().map(|s| s.zone).collect()
    }
}

/// Step marker persisted as the crash-safety in-flight record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStep {
    OpeningPump,
    OpeningMain,
    OpeningZones,
    Holding,
    ClosingZones,
    ClosingMain,
    ClosingPump,
}

impl JobStep {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStep::OpeningPump => "opening_pump",
            JobStep::OpeningMain => "opening_main",
            JobStep::OpeningZones => "opening_zones",
            JobStep::Holding => "holding",
            JobStep::ClosingZones => "closing_zones",
            JobStep::ClosingMain => "closing_main",
            JobStep::ClosingPump => "closing_pump",
        }
    }
}
