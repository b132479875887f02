//! Background self-check (spec.md §4.3 invariant: "a zone valve is never
//! open unless the pump and main valve are also open"). Grounded on the
//! teacher's `HealthCheck` trait: small, pollable, side-effect-free checks
//! run on a timer as defense-in-depth against a bug elsewhere opening a
//! valve outside the sequencer's gated sequence.

use crate::bridge::{EntityBridge, EntityValue};
use crate::config::ZoneEntityRefs;
use crate::ids::ZoneId;

pub trait HealthCheck: Send + Sync {
    /// Returns one `(zone, message)` per violated invariant; empty when
    /// healthy. The zone is carried so the caller can latch that specific
    /// zone Unsafe rather than the whole system.
    fn check(&self, bridge: &dyn EntityBridge) -> Vec<(ZoneId, String)>;

    fn name(&self) -> &'static str;
}

/// Asserts the pump/main-valve interlock across every zone's actuators.
pub struct SafetyInterlockCheck {
    zones: Vec<ZoneEntityRefs>,
}

impl SafetyInterlockCheck {
    pub fn new(zones: Vec<ZoneEntityRefs>) -> Self {
        Self { zones }
    }
}

impl HealthCheck for SafetyInterlockCheck {
    fn check(&self, bridge: &dyn EntityBridge) -> Vec<(ZoneId, String)> {
        let mut violations = Vec::new();
        for refs in &self.zones {
            let (zone_valve, _) = bridge.get(&refs.zone_valve);
            if !matches!(zone_valve, EntityValue::Bool(true)) {
                continue;
            }
            let (pump, _) = bridge.get(&refs.pump);
            let (main, _) = bridge.get(&refs.main_valve);
            if !matches!(pump, EntityValue::Bool(true)) || !matches!(main, EntityValue::Bool(true)) {
                violations.push((
                    refs.id,
                    format!(
                        "zone valve {} is open without pump ({pump:?}) and main valve ({main:?}) also open",
                        refs.zone_valve
                    ),
                ));
            }
        }
        violations
    }

    fn name(&self) -> &'static str {
        "safety-interlock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{EntityRef, MemoryBridge};

    fn refs() -> ZoneEntityRefs {
        ZoneEntityRefs {
            id: ZoneId(1),
            pump: EntityRef::switch("switch.pump"),
            main_valve: EntityRef::switch("switch.main"),
            zone_valve: EntityRef::switch("switch.zone1"),
            vwc_sensors: vec![],
            ec_sensors: vec![],
        }
    }

    #[tokio::test]
    async fn flags_zone_valve_open_without_pump() {
        let bridge = MemoryBridge::new();
        bridge.seed("switch.zone1", EntityValue::Bool(true));
        bridge.seed("switch.pump", EntityValue::Bool(false));
        bridge.seed("switch.main", EntityValue::Bool(true));

        let check = SafetyInterlockCheck::new(vec![refs()]);
        let violations = check.check(&bridge);
        assert_eq!(violations.len(), 1);
    }

    #[tokio::test]
    async fn silent_when_interlock_holds() {
        let bridge = MemoryBridge::new();
        bridge.seed("switch.zone1", EntityValue::Bool(true));
        bridge.seed("switch.pump", EntityValue::Bool(true));
        bridge.seed("switch.main", EntityValue::Bool(true));

        let check = SafetyInterlockCheck::new(vec![refs()]);
        assert!(check.check(&bridge).is_empty());
    }
}
