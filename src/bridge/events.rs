//! Domain events published through the bridge (spec.md §6 "Emitted events").

use crate::ids::ZoneId;
use crate::types::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DomainEvent {
    PhaseTransition {
        zone: ZoneId,
        from: String,
        to: String,
        reason: String,
        at: DateTime<Utc>,
    },
    IrrigationScheduled {
        zone: ZoneId,
        volume_ml: f64,
        priority: Priority,
    },
    IrrigationStarted {
        zone: ZoneId,
    },
    IrrigationCompleted {
        zone: ZoneId,
        volume_ml: f64,
        reason: String,
    },
    IrrigationSkipped {
        zone: Option<ZoneId>,
        reason: String,
    },
    SensorDegraded {
        zone: ZoneId,
        kind: &'static str,
    },
    ZoneParked {
        zone: ZoneId,
        reason: String,
    },
    UnsafeZone {
        zone: ZoneId,
        reason: String,
    },
    PersistenceDegraded {
        reason: String,
    },
}

impl DomainEvent {
    pub fn zone(&self) -> Option<ZoneId> {
        match self {
            DomainEvent::PhaseTransition { zone, .. }
            | DomainEvent::IrrigationScheduled { zone, .. }
            | DomainEvent::IrrigationStarted { zone }
            | DomainEvent::IrrigationCompleted { zone, .. }
            | DomainEvent::SensorDegraded { zone, .. }
            | DomainEvent::ZoneParked { zone, .. }
            | DomainEvent::UnsafeZone { zone, .. } => Some(*zone),
            DomainEvent::IrrigationSkipped { zone, .. } => *zone,
            DomainEvent::PersistenceDegraded { .. } => None,
        }
    }
}
