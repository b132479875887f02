use serde::{Deserialize, Serialize};
use std::fmt;

/// The four stages of a zone's daily cycle (spec.md §3, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Morning dryback: no irrigation except emergency.
    P0,
    /// Ramp-up: escalating shots until VWC target and minimum shot count.
    P1,
    /// Maintenance: threshold-triggered shots, EC-ratio adjusted.
    P2,
    /// Pre-dark: hold, emergency only.
    P3,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::P0 => "P0",
            Phase::P1 => "P1",
            Phase::P2 => "P2",
            Phase::P3 => "P3",
        };
        write!(f, "{s}")
    }
}

impl Phase {
    /// Initial phase recovered at boot absent a persisted snapshot: P2 if
    /// lights are on, P0 if lights are off (spec.md §4.3).
    pub fn initial(lights_on: bool) -> Phase {
        if lights_on {
            Phase::P2
        } else {
            Phase::P0
        }
    }
}
