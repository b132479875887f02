//! Identifier types shared across every layer.
//!
//! Kept separate from the `zone` module so that low layers (`bridge`,
//! `fusion`, `dryback`) can refer to a zone by id without importing zone
//! state-machine logic, preserving the bridge < fusion < dryback < zone <
//! sequencer < coordinator layering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a zone, 1..=N (N <= 6 per topology limits enforced at config
/// load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ZoneId {
    fn from(value: u32) -> Self {
        ZoneId(value)
    }
}
