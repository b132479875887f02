//! Named default constants, grouped by subsystem, mirrored into
//! [`super::EngineConfig::default`] and used wherever a loaded document
//! omits a field. TOML deserialization fills gaps via `#[serde(default =
//! "...")]` pointing at the functions below rather than hand rolled
//! `Option` unwrapping at every call site.

use std::time::Duration;

// --- Fusion -----------------------------------------------------------

pub const FRESHNESS_HORIZON_SEC: u64 = 300;
pub const MIN_SENSORS: usize = 1;
pub const SENSOR_RING_WINDOW_SEC: u64 = 600;
pub const RELIABILITY_DECREMENT: f64 = 0.05;
pub const RELIABILITY_INCREMENT: f64 = 0.01;
pub const RELIABILITY_FLOOR: f64 = 0.1;
pub const RELIABILITY_CEILING: f64 = 1.0;

// --- Dryback ------------------------------------------------------------

pub const NOISE_BAND_PCT: f64 = 1.0;
pub const DRYBACK_HISTORY_HOURS: u64 = 24;

// --- Phase timing / targets ---------------------------------------------

pub const DRYBACK_TARGET_VEG_PCT: f64 = 20.0;
pub const DRYBACK_TARGET_GEN_PCT: f64 = 15.0;
pub const P0_MAX_WAIT_MIN: u64 = 180;

pub const P1_TARGET_VWC_PCT: f64 = 65.0;
pub const P1_INITIAL_SHOT_PCT: f64 = 2.0;
pub const P1_SHOT_INCREMENT_PCT: f64 = 1.0;
pub const P1_MAX_SHOT_PCT: f64 = 8.0;
pub const P1_MIN_SHOTS: u32 = 3;
pub const P1_MAX_SHOTS: u32 = 12;
pub const P1_INTER_SHOT_SEC: u64 = 900;

pub const P2_VWC_THRESHOLD_PCT: f64 = 60.0;
pub const P2_SHOT_PCT: f64 = 3.0;
pub const EC_HIGH: f64 = 1.3;
pub const EC_LOW: f64 = 0.7;
pub const VWC_BUMP_HIGH: f64 = 3.0;
pub const VWC_BUMP_LOW: f64 = 3.0;

pub const P3_LEAD_TIME_MIN: u64 = 60;
pub const P3_EMERGENCY_THRESHOLD_PCT: f64 = 35.0;
pub const P3_EMERGENCY_SHOT_PCT: f64 = 4.0;
pub const EMERGENCY_COOLDOWN_SEC: u64 = 1800;

pub const EC_FLUSH_TARGET: f64 = 0.8;

// --- Cadences -------------------------------------------------------------

pub const TICK_INTERVAL_SEC: u64 = 30;
pub const SNAPSHOT_INTERVAL_SEC: u64 = 300;

// --- Sequencer --------------------------------------------------------

pub const PUMP_PRIME_MS: u64 = 2000;
pub const MAIN_LINE_PRESSURE_MS: u64 = 1000;
pub const MAIN_LINE_DRAIN_MS: u64 = 500;
pub const MIN_SHOT_MS: u64 = 500;
pub const MAX_SHOT_MS: u64 = 300_000;
pub const SHUTDOWN_SAFETY_MARGIN_MS: u64 = 2000;
pub const WRITE_CONFIRM_POLL_MS: u64 = 20;
pub const WRITE_RETRY_JITTER_MS: u64 = 100;

pub const GROUP_THRESHOLD_PCT: f64 = 50.0;
pub const SHOT_MULTIPLIER: f64 = 1.0;

// --- Safety / staleness -------------------------------------------------

pub const SENSOR_STALE_GRACE_MIN: u64 = 15;
pub const EMERGENCY_STALE_MIN: u64 = 30;
pub const WRITE_MAX_ATTEMPTS: u32 = 3;
pub const BRIDGE_WRITE_DEADLINE_SEC: u64 = 5;
pub const PERSISTENCE_WRITE_DEADLINE_SEC: u64 = 10;
pub const BRIDGE_WRITE_QUEUE_CAPACITY: usize = 256;

// --- Sequencer safety gate switches (spec.md §4.5 step 1) ---------------

pub const SYSTEM_ENABLED_ENTITY: &str = "switch.system_enabled";
pub const AUTO_IRRIGATION_ENTITY: &str = "switch.auto_irrigation";

// --- Light schedule fallback --------------------------------------------

pub const DEFAULT_LIGHT_ON_HOUR: u32 = 6;
pub const DEFAULT_LIGHT_OFF_HOUR: u32 = 18;

pub fn default_tick_interval() -> Duration {
    Duration::from_secs(TICK_INTERVAL_SEC)
}

pub fn default_snapshot_interval() -> Duration {
    Duration::from_secs(SNAPSHOT_INTERVAL_SEC)
}

// --- serde `default = "..."` targets -------------------------------------
//
// One function per tunable field so a TOML document can omit any subset of
// keys and still deserialize; each function just forwards the constant
// above.

pub fn freshness_horizon_sec() -> u64 { FRESHNESS_HORIZON_SEC }
pub fn min_sensors() -> usize { MIN_SENSORS }
pub fn sensor_ring_window_sec() -> u64 { SENSOR_RING_WINDOW_SEC }

pub fn noise_band_pct() -> f64 { NOISE_BAND_PCT }

pub fn dryback_target_veg_pct() -> f64 { DRYBACK_TARGET_VEG_PCT }
pub fn dryback_target_gen_pct() -> f64 { DRYBACK_TARGET_GEN_PCT }
pub fn p0_max_wait_min() -> u64 { P0_MAX_WAIT_MIN }

pub fn p1_target_vwc_pct() -> f64 { P1_TARGET_VWC_PCT }
pub fn p1_initial_shot_pct() -> f64 { P1_INITIAL_SHOT_PCT }
pub fn p1_shot_increment_pct() -> f64 { P1_SHOT_INCREMENT_PCT }
pub fn p1_max_shot_pct() -> f64 { P1_MAX_SHOT_PCT }
pub fn p1_min_shots() -> u32 { P1_MIN_SHOTS }
pub fn p1_max_shots() -> u32 { P1_MAX_SHOTS }
pub fn p1_inter_shot_sec() -> u64 { P1_INTER_SHOT_SEC }

pub fn p2_vwc_threshold_pct() -> f64 { P2_VWC_THRESHOLD_PCT }
pub fn p2_shot_pct() -> f64 { P2_SHOT_PCT }
pub fn ec_high() -> f64 { EC_HIGH }
pub fn ec_low() -> f64 { EC_LOW }
pub fn vwc_bump_high() -> f64 { VWC_BUMP_HIGH }
pub fn vwc_bump_low() -> f64 { VWC_BUMP_LOW }

pub fn p3_lead_time_min() -> u64 { P3_LEAD_TIME_MIN }
pub fn p3_emergency_threshold_pct() -> f64 { P3_EMERGENCY_THRESHOLD_PCT }
pub fn p3_emergency_shot_pct() -> f64 { P3_EMERGENCY_SHOT_PCT }
pub fn emergency_cooldown_sec() -> u64 { EMERGENCY_COOLDOWN_SEC }

pub fn ec_flush_target() -> f64 { EC_FLUSH_TARGET }

pub fn tick_interval_sec() -> u64 { TICK_INTERVAL_SEC }
pub fn snapshot_interval_sec() -> u64 { SNAPSHOT_INTERVAL_SEC }

pub fn pump_prime_ms() -> u64 { PUMP_PRIME_MS }
pub fn main_line_pressure_ms() -> u64 { MAIN_LINE_PRESSURE_MS }
pub fn main_line_drain_ms() -> u64 { MAIN_LINE_DRAIN_MS }
pub fn min_shot_ms() -> u64 { MIN_SHOT_MS }
pub fn max_shot_ms() -> u64 { MAX_SHOT_MS }
pub fn write_confirm_poll_ms() -> u64 { WRITE_CONFIRM_POLL_MS }
pub fn write_retry_jitter_ms() -> u64 { WRITE_RETRY_JITTER_MS }

pub fn group_threshold_pct() -> f64 { GROUP_THRESHOLD_PCT }
pub fn shot_multiplier() -> f64 { SHOT_MULTIPLIER }

pub fn sensor_stale_grace_min() -> u64 { SENSOR_STALE_GRACE_MIN }
pub fn emergency_stale_min() -> u64 { EMERGENCY_STALE_MIN }
pub fn write_max_attempts() -> u32 { WRITE_MAX_ATTEMPTS }

pub fn light_on_hour() -> u32 { DEFAULT_LIGHT_ON_HOUR }
pub fn light_off_hour() -> u32 { DEFAULT_LIGHT_OFF_HOUR }

pub fn daily_budget_ml() -> f64 { 5000.0 }
pub fn dripper_count() -> u32 { 4 }
pub fn dripper_flow_ml_per_ms() -> f64 { 0.05 }
pub fn substrate_volume_ml() -> f64 { 3000.0 }
