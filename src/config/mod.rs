//! Tunable configuration (spec.md §6). Grounded on the teacher's
//! `config/mod.rs`: a single typed record loaded once into a
//! `OnceLock`, with named constants as defaults rather than a dynamic
//! "config object" with arbitrary keys.

pub mod defaults;
pub mod topology;

pub use topology::{ZoneEntityRefs, ZoneTopology};

use crate::error::EngineError;
use crate::types::GrowMode;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initializes the global config. Must be called exactly once, before any
/// call to [`get`]. Calling it twice only warns — matching the teacher's
/// `config::init`, which treats a double-init as a recoverable mistake
/// rather than a panic (the first value wins either way, since
/// `OnceLock::set` is a no-op after the first success).
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init called more than once; ignoring subsequent call");
    }
}

/// Returns the global config.
///
/// # Panics
/// Panics if called before [`init`]. This is a startup bug, not a runtime
/// condition callers should handle.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG.get().expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightScheduleConfig {
    #[serde(default = "default_on_hour")]
    pub on_hour: u32,
    #[serde(default = "default_off_hour")]
    pub off_hour: u32,
}

fn default_on_hour() -> u32 { defaults::DEFAULT_LIGHT_ON_HOUR }
fn default_off_hour() -> u32 { defaults::DEFAULT_LIGHT_OFF_HOUR }

impl Default for LightScheduleConfig {
    fn default() -> Self {
        Self { on_hour: defaults::DEFAULT_LIGHT_ON_HOUR, off_hour: defaults::DEFAULT_LIGHT_OFF_HOUR }
    }
}

impl LightScheduleConfig {
    pub fn on_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.on_hour % 24, 0, 0).unwrap_or_default()
    }

    pub fn off_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.off_hour % 24, 0, 0).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrybackTargetConfig {
    #[serde(default = "defaults::dryback_target_veg_pct")]
    pub veg_pct: f64,
    #[serde(default = "defaults::dryback_target_gen_pct")]
    pub gen_pct: f64,
}

impl Default for DrybackTargetConfig {
    fn default() -> Self {
        Self { veg_pct: defaults::DRYBACK_TARGET_VEG_PCT, gen_pct: defaults::DRYBACK_TARGET_GEN_PCT }
    }
}

impl DrybackTargetConfig {
    pub fn for_mode(&self, mode: GrowMode) -> f64 {
        match mode {
            GrowMode::Vegetative => self.veg_pct,
            GrowMode::Generative => self.gen_pct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P1Config {
    #[serde(default = "defaults::p1_target_vwc_pct")]
    pub target_vwc_pct: f64,
    #[serde(default = "defaults::p1_initial_shot_pct")]
    pub initial_shot_pct: f64,
    #[serde(default = "defaults::p1_shot_increment_pct")]
    pub shot_increment_pct: f64,
    #[serde(default = "defaults::p1_max_shot_pct")]
    pub max_shot_pct: f64,
    #[serde(default = "defaults::p1_min_shots")]
    pub min_shots: u32,
    #[serde(default = "defaults::p1_max_shots")]
    pub max_shots: u32,
    #[serde(default = "defaults::p1_inter_shot_sec")]
    pub inter_shot_sec: u64,
}

impl Default for P1Config {
    fn default() -> Self {
        Self {
            target_vwc_pct: defaults::P1_TARGET_VWC_PCT,
            initial_shot_pct: defaults::P1_INITIAL_SHOT_PCT,
            shot_increment_pct: defaults::P1_SHOT_INCREMENT_PCT,
            max_shot_pct: defaults::P1_MAX_SHOT_PCT,
            min_shots: defaults::P1_MIN_SHOTS,
            max_shots: defaults::P1_MAX_SHOTS,
            inter_shot_sec: defaults::P1_INTER_SHOT_SEC,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2Config {
    #[serde(default = "defaults::p2_vwc_threshold_pct")]
    pub vwc_threshold_pct: f64,
    #[serde(default = "defaults::p2_shot_pct")]
    pub shot_pct: f64,
    #[serde(default = "defaults::ec_high")]
    pub ec_high: f64,
    #[serde(default = "defaults::ec_low")]
    pub ec_low: f64,
    #[serde(default = "defaults::vwc_bump_high")]
    pub vwc_bump_high: f64,
    #[serde(default = "defaults::vwc_bump_low")]
    pub vwc_bump_low: f64,
}

impl Default for P2Config {
    fn default() -> Self {
        Self {
            vwc_threshold_pct: defaults::P2_VWC_THRESHOLD_PCT,
            shot_pct: defaults::P2_SHOT_PCT,
            ec_high: defaults::EC_HIGH,
            ec_low: defaults::EC_LOW,
            vwc_bump_high: defaults::VWC_BUMP_HIGH,
            vwc_bump_low: defaults::VWC_BUMP_LOW,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P3Config {
    #[serde(default = "defaults::p3_lead_time_min")]
    pub lead_time_min: u64,
    #[serde(default = "defaults::p3_emergency_threshold_pct")]
    pub emergency_threshold_pct: f64,
    #[serde(default = "defaults::p3_emergency_shot_pct")]
    pub emergency_shot_pct: f64,
    #[serde(default = "defaults::emergency_cooldown_sec")]
    pub emergency_cooldown_sec: u64,
}

impl Default for P3Config {
    fn default() -> Self {
        Self {
            lead_time_min: defaults::P3_LEAD_TIME_MIN,
            emergency_threshold_pct: defaults::P3_EMERGENCY_THRESHOLD_PCT,
            emergency_shot_pct: defaults::P3_EMERGENCY_SHOT_PCT,
            emergency_cooldown_sec: defaults::EMERGENCY_COOLDOWN_SEC,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcTargetSet {
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcTargetsByMode {
    pub vegetative: EcTargetSet,
    pub generative: EcTargetSet,
}

impl Default for EcTargetsByMode {
    fn default() -> Self {
        Self {
            vegetative: EcTargetSet { p1: 1.2, p2: 1.4, p3: 1.4 },
            generative: EcTargetSet { p1: 1.6, p2: 1.8, p3: 1.8 },
        }
    }
}

impl EcTargetsByMode {
    pub fn target_for(&self, mode: GrowMode, phase: crate::zone::Phase) -> f64 {
        use crate::zone::Phase;
        let set = match mode {
            GrowMode::Vegetative => &self.vegetative,
            GrowMode::Generative => &self.generative,
        };
        match phase {
            Phase::P0 | Phase::P1 => set.p1,
            Phase::P2 => set.p2,
            Phase::P3 => set.p3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "defaults::freshness_horizon_sec")]
    pub freshness_horizon_sec: u64,
    #[serde(default = "defaults::min_sensors")]
    pub min_sensors: usize,
    #[serde(default = "defaults::sensor_ring_window_sec")]
    pub sensor_ring_window_sec: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            freshness_horizon_sec: defaults::FRESHNESS_HORIZON_SEC,
            min_sensors: defaults::MIN_SENSORS,
            sensor_ring_window_sec: defaults::SENSOR_RING_WINDOW_SEC,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerTimingConfig {
    #[serde(default = "defaults::pump_prime_ms")]
    pub pump_prime_ms: u64,
    #[serde(default = "defaults::main_line_pressure_ms")]
    pub main_line_pressure_ms: u64,
    #[serde(default = "defaults::main_line_drain_ms")]
    pub main_line_drain_ms: u64,
    #[serde(default = "defaults::min_shot_ms")]
    pub min_shot_ms: u64,
    #[serde(default = "defaults::max_shot_ms")]
    pub max_shot_ms: u64,
    /// How long to wait after a write before reading the entity back to
    /// confirm it landed (spec.md §7 retry path).
    #[serde(default = "defaults::write_confirm_poll_ms")]
    pub write_confirm_poll_ms: u64,
    /// Upper bound (exclusive) of the jittered backoff between retry
    /// attempts on an unconfirmed write.
    #[serde(default = "defaults::write_retry_jitter_ms")]
    pub write_retry_jitter_ms: u64,
}

impl Default for SequencerTimingConfig {
    fn default() -> Self {
        Self {
            pump_prime_ms: defaults::PUMP_PRIME_MS,
            main_line_pressure_ms: defaults::MAIN_LINE_PRESSURE_MS,
            main_line_drain_ms: defaults::MAIN_LINE_DRAIN_MS,
            min_shot_ms: defaults::MIN_SHOT_MS,
            max_shot_ms: defaults::MAX_SHOT_MS,
            write_confirm_poll_ms: defaults::WRITE_CONFIRM_POLL_MS,
            write_retry_jitter_ms: defaults::WRITE_RETRY_JITTER_MS,
        }
    }
}

impl SequencerTimingConfig {
    pub fn shutdown_budget_ms(&self) -> u64 {
        self.pump_prime_ms
            + self.main_line_pressure_ms
            + self.main_line_drain_ms
            + defaults::SHUTDOWN_SAFETY_MARGIN_MS
    }
}

/// Top-level configuration record. `zones` is topology, loaded once and
/// never live-edited after boot; everything else may be patched through the
/// coordinator's typed service-call path at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub zones: Vec<ZoneTopology>,
    #[serde(default)]
    pub light_schedule: LightScheduleConfig,
    #[serde(default)]
    pub dryback_target: DrybackTargetConfig,
    #[serde(default = "defaults::p0_max_wait_min")]
    pub p0_max_wait_min: u64,
    #[serde(default)]
    pub p1: P1Config,
    #[serde(default)]
    pub p2: P2Config,
    #[serde(default)]
    pub p3: P3Config,
    #[serde(default)]
    pub ec_targets: EcTargetsByMode,
    #[serde(default = "defaults::ec_flush_target")]
    pub ec_flush_target: f64,
    #[serde(default = "defaults::tick_interval_sec")]
    pub tick_interval_sec: u64,
    #[serde(default = "defaults::snapshot_interval_sec")]
    pub snapshot_interval_sec: u64,
    #[serde(default)]
    pub sequencer: SequencerTimingConfig,
    #[serde(default = "defaults::group_threshold_pct")]
    pub group_threshold_pct: f64,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default = "defaults::sensor_stale_grace_min")]
    pub sensor_stale_grace_min: u64,
    #[serde(default = "defaults::emergency_stale_min")]
    pub emergency_stale_min: u64,
    #[serde(default = "defaults::write_max_attempts")]
    pub write_max_attempts: u32,
    #[serde(default = "defaults::shot_multiplier")]
    pub shot_multiplier: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            zones: Vec::new(),
            light_schedule: LightScheduleConfig::default(),
            dryback_target: DrybackTargetConfig::default(),
            p0_max_wait_min: defaults::P0_MAX_WAIT_MIN,
            p1: P1Config::default(),
            p2: P2Config::default(),
            p3: P3Config::default(),
            ec_targets: EcTargetsByMode::default(),
            ec_flush_target: defaults::EC_FLUSH_TARGET,
            tick_interval_sec: defaults::TICK_INTERVAL_SEC,
            snapshot_interval_sec: defaults::SNAPSHOT_INTERVAL_SEC,
            sequencer: SequencerTimingConfig::default(),
            group_threshold_pct: defaults::GROUP_THRESHOLD_PCT,
            fusion: FusionConfig::default(),
            sensor_stale_grace_min: defaults::SENSOR_STALE_GRACE_MIN,
            emergency_stale_min: defaults::EMERGENCY_STALE_MIN,
            write_max_attempts: defaults::WRITE_MAX_ATTEMPTS,
            shot_multiplier: defaults::SHOT_MULTIPLIER,
        }
    }
}

impl EngineConfig {
    /// Loads config in priority order: `IRRIGATION_CONFIG` env var path,
    /// else `irrigation.toml` in the working directory, else built-in
    /// defaults with zero zones (a valid but useless config — callers
    /// should usually treat an empty topology as a config error).
    pub fn load() -> Result<Self, EngineError> {
        if let Ok(path) = std::env::var("IRRIGATION_CONFIG") {
            return Self::load_from_path(Path::new(&path));
        }
        let default_path = Path::new("irrigation.toml");
        if default_path.exists() {
            return Self::load_from_path(default_path);
        }
        tracing::warn!("no config file found (IRRIGATION_CONFIG unset, irrigation.toml absent); using built-in defaults with no zones");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("reading {}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces: zone count bound,
    /// non-empty sensor lists, unique ids.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.zones.len() > 6 {
            return Err(EngineError::Config(format!("at most 6 zones supported, got {}", self.zones.len())));
        }
        let mut seen = std::collections::HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id) {
                return Err(EngineError::Config(format!("duplicate zone id {}", zone.id)));
            }
            if zone.vwc_sensor_entities.is_empty() {
                return Err(EngineError::Config(format!("zone {} has no VWC sensors configured", zone.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document_with_defaults() {
        let raw = r#"
            [[zones]]
            id = 1
            pump_entity = "switch.pump"
            main_valve_entity = "switch.main"
            zone_valve_entity = "switch.zone1"
            vwc_sensor_entities = ["sensor.vwc1"]
            ec_sensor_entities = ["sensor.ec1"]
        "#;
        let config = EngineConfig::parse(raw).unwrap();
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.p1.target_vwc_pct, defaults::P1_TARGET_VWC_PCT);
        assert_eq!(config.tick_interval_sec, defaults::TICK_INTERVAL_SEC);
    }

    #[test]
    fn rejects_more_than_six_zones() {
        let mut config = EngineConfig::default();
        for i in 0..7 {
            config.zones.push(ZoneTopology {
                id: crate::ids::ZoneId(i),
                pump_entity: "switch.pump".into(),
                main_valve_entity: "switch.main".into(),
                zone_valve_entity: format!("switch.zone{i}"),
                vwc_sensor_entities: vec!["sensor.vwc".into()],
                ec_sensor_entities: vec![],
                dripper_count: 4,
                dripper_flow_ml_per_ms: 0.05,
                substrate_volume_ml: 3000.0,
                group_id: None,
                daily_budget_ml: 5000.0,
                priority: crate::types::Priority::Normal,
                mode: GrowMode::Vegetative,
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zone_with_no_vwc_sensors() {
        let mut config = EngineConfig::default();
        config.zones.push(ZoneTopology {
            id: crate::ids::ZoneId(1),
            pump_entity: "switch.pump".into(),
            main_valve_entity: "switch.main".into(),
            zone_valve_entity: "switch.zone1".into(),
            vwc_sensor_entities: vec![],
            ec_sensor_entities: vec![],
            dripper_count: 4,
            dripper_flow_ml_per_ms: 0.05,
            substrate_volume_ml: 3000.0,
            group_id: None,
            daily_budget_ml: 5000.0,
            priority: crate::types::Priority::Normal,
            mode: GrowMode::Vegetative,
        });
        assert!(config.validate().is_err());
    }
}
