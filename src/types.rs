//! Small shared value types with no behavior of their own.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Actuation priority. Ordered `Critical > High > Normal > Low`; the derived
/// `Ord` on the enum's declaration order gives `Low < Normal < High <
/// Critical`, so sequencer code compares with `.cmp(..).reverse()` or sorts
/// descending — see `sequencer::queue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Growth mode selecting which row of the EC target matrix and which
/// dryback-target constant a zone uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowMode {
    Vegetative,
    Generative,
}

/// Sensor kind fused independently; VWC and EC are never mixed into one
/// fusion instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Vwc,
    Ec,
}

impl SensorKind {
    /// Plausible range for a raw reading of this kind (spec.md §3).
    pub fn plausible_range(self) -> (f64, f64) {
        match self {
            SensorKind::Vwc => (0.0, 100.0),
            SensorKind::Ec => (0.0, 20.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorKind::Vwc => "vwc",
            SensorKind::Ec => "ec",
        }
    }
}

/// Orders priorities so that `Critical` sorts first in a max-heap / sorted
/// descending context.
pub fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Critical => 3,
        Priority::High => 2,
        Priority::Normal => 1,
        Priority::Low => 0,
    }
}

pub fn compare_priority_desc(a: Priority, b: Priority) -> Ordering {
    priority_rank(b).cmp(&priority_rank(a))
}
