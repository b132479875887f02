//! Entity values and typed handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Tag distinguishing what an [`EntityRef`] points at. Validated once at
/// config load time (REDESIGN FLAGS: no stringly-typed lookups after boot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// An on/off actuator (pump, main valve, zone valve).
    Switch,
    /// A numeric or text sensor reading.
    Sensor,
    /// A plain numeric entity (e.g. a counter or setpoint mirrored on the
    /// host for dashboards).
    Numeric,
}

/// A typed, validated handle to a host entity. Cheap to clone (`Arc<str>`
/// name).
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub name: Arc<str>,
}

impl EntityRef {
    pub fn switch(name: impl Into<Arc<str>>) -> Self {
        Self { kind: EntityKind::Switch, name: name.into() }
    }

    pub fn sensor(name: impl Into<Arc<str>>) -> Self {
        Self { kind: EntityKind::Sensor, name: name.into() }
    }

    pub fn numeric(name: impl Into<Arc<str>>) -> Self {
        Self { kind: EntityKind::Numeric, name: name.into() }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for EntityRef {}

/// A value read from or written to the host bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityValue {
    Bool(bool),
    Number(f64),
    Text(String),
    /// Sentinel or unparseable value — treated as "no value".
    Unknown,
}

const SENTINEL_STRINGS: [&str; 3] = ["unknown", "unavailable", ""];

impl EntityValue {
    /// Parses a raw host string into a value, recognizing the sentinels the
    /// bridge treats as absent.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if SENTINEL_STRINGS.contains(&trimmed.to_ascii_lowercase().as_str()) {
            return EntityValue::Unknown;
        }
        if let Ok(b) = trimmed.parse::<bool>() {
            return EntityValue::Bool(b);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return EntityValue::Number(n);
        }
        EntityValue::Text(trimmed.to_string())
    }

    /// Coerces to a numeric value, returning `default` for `Unknown`,
    /// non-numeric text, or a `Bool` is coerced to `0.0`/`1.0`.
    pub fn as_numeric(&self, default: f64) -> f64 {
        match self {
            EntityValue::Number(n) => *n,
            EntityValue::Bool(b) => if *b { 1.0 } else { 0.0 },
            EntityValue::Text(s) => s.parse::<f64>().unwrap_or(default),
            EntityValue::Unknown => default,
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, EntityValue::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_strings_become_unknown() {
        assert_eq!(EntityValue::from_raw("unknown"), EntityValue::Unknown);
        assert_eq!(EntityValue::from_raw("unavailable"), EntityValue::Unknown);
        assert_eq!(EntityValue::from_raw(""), EntityValue::Unknown);
        assert_eq!(EntityValue::from_raw("UNAVAILABLE"), EntityValue::Unknown);
    }

    #[test]
    fn numeric_coercion_falls_back_on_absent() {
        assert_eq!(EntityValue::Unknown.as_numeric(42.0), 42.0);
        assert_eq!(EntityValue::Number(3.5).as_numeric(0.0), 3.5);
        assert_eq!(EntityValue::Bool(true).as_numeric(0.0), 1.0);
    }

    #[test]
    fn parses_numbers_and_bools_from_raw() {
        assert_eq!(EntityValue::from_raw("63.4"), EntityValue::Number(63.4));
        assert_eq!(EntityValue::from_raw("true"), EntityValue::Bool(true));
        assert_eq!(EntityValue::from_raw("on-override"), EntityValue::Text("on-override".into()));
    }
}
