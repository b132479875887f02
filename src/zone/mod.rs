//! Zone State Machine (spec.md §4.3): one instance per zone, holding
//! `Phase` and phase-scoped data, exposing `tick(now, inputs) -> Decision`.

mod decision;
mod phase;
mod runtime;
mod transitions;
pub(crate) mod volume;

pub use decision::Decision;
pub use phase::Phase;
pub use runtime::ZoneRuntime;
pub use transitions::{build_transition_table, TickContext, TransitionRule};

use crate::bridge::DomainEvent;
use crate::config::{EngineConfig, ZoneTopology};
use crate::fusion::FusedValue;
use crate::ids::ZoneId;
use chrono::{DateTime, Utc};

/// Per-tick inputs a coordinator assembles before calling [`tick`].
pub struct TickInputs<'a> {
    pub now: DateTime<Utc>,
    pub vwc: Result<FusedValue, crate::fusion::NoReliableSample>,
    pub ec: Result<FusedValue, crate::fusion::NoReliableSample>,
    pub lights_off_reached: bool,
    pub seconds_until_lights_off: i64,
    pub config: &'a EngineConfig,
    pub topology: &'a ZoneTopology,
}

/// A zone below its current P1/P2 threshold this tick, independent of
/// whether its individual `Decision` actually fired (it may be held back by
/// inter-shot cooldown or its max-shots cap). Used only for group-threshold
/// evaluation (spec.md §4.5 "Grouping").
#[derive(Debug, Clone, Copy)]
pub struct GroupCandidate {
    pub volume_ml: f64,
    pub vwc_margin: f64,
}

/// A tick's decision plus any soft domain events it raised along the way
/// (sensor-degraded, unsafe, forced-transition bookkeeping).
pub struct TickOutcome {
    pub decision: Decision,
    pub events: Vec<DomainEvent>,
    pub group_candidate: Option<GroupCandidate>,
}

impl TickOutcome {
    fn hold(events: Vec<DomainEvent>) -> Self {
        Self { decision: Decision::Hold, events, group_candidate: None }
    }
}

/// Runs one tick for a zone: resolves sensor-degraded/unsafe handling,
/// evaluates the transition table, then the per-phase irrigation decision
/// and the emergency path, in that order (emergency bypasses normal gating
/// but still only fires one decision per tick — whichever comes first here
/// wins; the sequencer, not this function, assigns priority ordering across
/// zones).
pub fn tick(rt: &mut ZoneRuntime, inputs: TickInputs) -> TickOutcome {
    rt.roll_daily_counters(inputs.now);

    if rt.unsafe_flag {
        return TickOutcome::hold(vec![]);
    }

    let mut events = Vec::new();

    // `vwc_for_emergency` is the value the emergency path may act on (fresh,
    // or the last known reading while degraded but not yet emergency-stale);
    // `fresh_vwc` is only `Some` on a genuinely fresh reading and gates the
    // normal (non-emergency) path. Spec.md §4.3: a degraded sensor cannot
    // drive a P1/P2 irrigate decision or a phase transition, unconditionally
    // — there is no grace period before this applies, only before the zone
    // is parked/marked Unsafe.
    let (vwc_for_emergency, fresh_vwc) = match resolve_sensor(rt, &inputs, &mut events) {
        SensorResolution::Unsafe => return TickOutcome::hold(events),
        SensorResolution::Degraded(last_known) => match last_known {
            Some(v) => (Some(v), None),
            None => return TickOutcome::hold(events),
        },
        SensorResolution::Value(v) => (Some(v), Some(v)),
    };

    // Emergency path: checked first, any phase, bypasses normal gating, and
    // may use a stale-but-not-emergency-stale last known value.
    if let Some(vwc_value) = vwc_for_emergency {
        if let Some(outcome) = emergency_check(rt, &inputs, vwc_value) {
            events.push(DomainEvent::IrrigationScheduled {
                zone: rt.id,
                volume_ml: match &outcome.decision {
                    Decision::Emergency { volume_ml, .. } => *volume_ml,
                    _ => 0.0,
                },
                priority: crate::types::Priority::Critical,
            });
            let mut outcome = outcome;
            outcome.events.splice(0..0, events);
            return outcome;
        }
    }

    let Some(vwc_value) = fresh_vwc else {
        return TickOutcome::hold(events);
    };
    let ec_value = inputs.ec.as_ref().map(|f| f.value).unwrap_or(0.0);
    let mode = inputs.topology.mode;

    let ctx = TickContext {
        vwc: vwc_value,
        ec: ec_value,
        peak_vwc: rt.peak_vwc,
        elapsed_in_phase_sec: (inputs.now - rt.phase_entered_at).num_seconds(),
        shots_in_phase: rt.shots_in_phase,
        dryback_target_pct: inputs.config.dryback_target.for_mode(mode),
        p0_max_wait_sec: inputs.config.p0_max_wait_min as i64 * 60,
        p1_target_vwc_pct: inputs.config.p1.target_vwc_pct,
        p1_min_shots: inputs.config.p1.min_shots,
        p1_max_shots: inputs.config.p1.max_shots,
        ec_flush_target: inputs.config.ec_flush_target,
        p3_emergency_threshold_pct: inputs.config.p3.emergency_threshold_pct,
        lights_off_reached: inputs.lights_off_reached,
        seconds_until_lights_off: inputs.seconds_until_lights_off,
        p3_lead_time_sec: inputs.config.p3.lead_time_min as i64 * 60,
    };

    let table = build_transition_table();
    if let Some(rule) = transitions::first_match(&table, rt.phase, &ctx) {
        let from = rt.phase;
        rt.enter_phase(rule.to, inputs.now, vwc_value);
        events.push(DomainEvent::PhaseTransition {
            zone: rt.id,
            from: from.to_string(),
            to: rule.to.to_string(),
            reason: rule.reason.to_string(),
            at: inputs.now,
        });
        return TickOutcome {
            decision: Decision::PhaseTransition { zone: rt.id, from, to: rule.to, reason: rule.reason },
            events,
            group_candidate: None,
        };
    }

    let (decision, group_candidate) = per_phase_decision(rt, &inputs, &ctx, vwc_value, ec_value, mode);
    if let Decision::Shot { volume_ml, reason, .. } = &decision {
        events.push(DomainEvent::IrrigationScheduled { zone: rt.id, volume_ml: *volume_ml, priority: decision.priority() });
        let _ = reason;
    }
    TickOutcome { decision, events, group_candidate }
}

/// Stand-in for "no prior timestamp, so never treat this as fresh" without
/// relying on a saturating/bounded `chrono::Duration` API.
fn far_future_duration() -> chrono::Duration {
    chrono::Duration::days(365 * 100)
}

/// `Degraded` carries the last known value (if any) strictly for
/// [`emergency_check`]'s use; the normal (non-emergency) path never sees it.
enum SensorResolution {
    Value(f64),
    Degraded(Option<f64>),
    Unsafe,
}

fn resolve_sensor(rt: &mut ZoneRuntime, inputs: &TickInputs, events: &mut Vec<DomainEvent>) -> SensorResolution {
    match &inputs.vwc {
        Ok(fv) => {
            rt.sensor_degraded_since = None;
            rt.parked = false;
            rt.last_known_vwc_value = Some(fv.value);
            rt.last_known_vwc_at = Some(fv.at);
            SensorResolution::Value(fv.value)
        }
        Err(_) => {
            if rt.sensor_degraded_since.is_none() {
                rt.sensor_degraded_since = Some(inputs.now);
            }
            events.push(DomainEvent::SensorDegraded { zone: rt.id, kind: "vwc" });

            let emergency_stale = chrono::Duration::minutes(inputs.config.emergency_stale_min as i64);
            let last_known_age = rt
                .last_known_vwc_at
                .map(|at| inputs.now - at)
                .unwrap_or_else(far_future_duration);

            if last_known_age >= emergency_stale {
                rt.mark_unsafe("sensor degraded past emergency-stale horizon");
                events.push(DomainEvent::UnsafeZone { zone: rt.id, reason: "sensor degraded past emergency-stale horizon".into() });
                return SensorResolution::Unsafe;
            }

            let stale_grace = chrono::Duration::minutes(inputs.config.sensor_stale_grace_min as i64);
            let degraded_for = inputs.now - rt.sensor_degraded_since.unwrap_or(inputs.now);
            if !rt.parked && degraded_for >= stale_grace {
                rt.parked = true;
                events.push(DomainEvent::ZoneParked { zone: rt.id, reason: "sensor degraded past stale grace".into() });
            }

            SensorResolution::Degraded(rt.last_known_vwc_value)
        }
    }
}

fn emergency_check(rt: &mut ZoneRuntime, inputs: &TickInputs, vwc_value: f64) -> Option<TickOutcome> {
    if vwc_value >= inputs.config.p3.emergency_threshold_pct {
        return None;
    }
    let cooldown = chrono::Duration::seconds(inputs.config.p3.emergency_cooldown_sec as i64);
    if let Some(last) = rt.last_emergency_at {
        if inputs.now - last < cooldown {
            return None;
        }
    }
    let volume = volume::volume_ml(inputs.config.p3.emergency_shot_pct, inputs.topology.substrate_volume_ml, inputs.config.shot_multiplier);
    let margin = inputs.config.p3.emergency_threshold_pct - vwc_value;
    rt.record_emergency(volume, inputs.now);
    Some(TickOutcome {
        decision: Decision::Emergency { zone: rt.id, volume_ml: volume, vwc_margin: margin },
        events: vec![],
        group_candidate: None,
    })
}

fn per_phase_decision(
    rt: &mut ZoneRuntime,
    inputs: &TickInputs,
    ctx: &TickContext,
    vwc_value: f64,
    ec_value: f64,
    mode: crate::types::GrowMode,
) -> (Decision, Option<GroupCandidate>) {
    match rt.phase {
        Phase::P0 => (Decision::Hold, None),
        Phase::P1 => {
            let threshold = 0.9 * inputs.config.p1.target_vwc_pct;
            let since_last_shot = rt
                .last_shot_at
                .map(|t| inputs.now - t)
                .unwrap_or_else(far_future_duration);
            let inter_shot = chrono::Duration::seconds(inputs.config.p1.inter_shot_sec as i64);
            let below_threshold = vwc_value < threshold;
            let pct = volume::p1_shot_pct(inputs.config.p1.initial_shot_pct, inputs.config.p1.shot_increment_pct, ctx.shots_in_phase, inputs.config.p1.max_shot_pct);
            let vol = volume::volume_ml(pct, inputs.topology.substrate_volume_ml, inputs.config.shot_multiplier);
            let margin = threshold - vwc_value;
            let candidate = below_threshold.then_some(GroupCandidate { volume_ml: vol, vwc_margin: margin });
            if below_threshold && since_last_shot >= inter_shot && ctx.shots_in_phase < inputs.config.p1.max_shots {
                rt.record_shot(vol, inputs.now);
                (Decision::Shot { zone: rt.id, volume_ml: vol, reason: "p1-ramp", vwc_margin: margin, priority: inputs.topology.priority }, candidate)
            } else {
                (Decision::Hold, candidate)
            }
        }
        Phase::P2 => {
            let ec_target = inputs.config.ec_targets.target_for(mode, Phase::P2);
            let bump = volume::ec_ratio_adjustment(ec_value, ec_target, inputs.config.p2.ec_high, inputs.config.p2.ec_low, inputs.config.p2.vwc_bump_high, inputs.config.p2.vwc_bump_low);
            let effective_threshold = inputs.config.p2.vwc_threshold_pct + bump;
            let below_threshold = vwc_value < effective_threshold;
            let vol = volume::volume_ml(inputs.config.p2.shot_pct, inputs.topology.substrate_volume_ml, inputs.config.shot_multiplier);
            let margin = effective_threshold - vwc_value;
            let candidate = below_threshold.then_some(GroupCandidate { volume_ml: vol, vwc_margin: margin });
            if below_threshold {
                rt.record_shot(vol, inputs.now);
                (Decision::Shot { zone: rt.id, volume_ml: vol, reason: "p2-maintenance", vwc_margin: margin, priority: inputs.topology.priority }, candidate)
            } else {
                (Decision::Hold, candidate)
            }
        }
        Phase::P3 => (Decision::Hold, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ZoneTopology};
    use crate::fusion::FusedValue;
    use crate::types::{GrowMode, Priority};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, h, m, 0).unwrap()
    }

    fn topology() -> ZoneTopology {
        ZoneTopology {
            id: ZoneId(1),
            pump_entity: "switch.pump".into(),
            main_valve_entity: "switch.main".into(),
            zone_valve_entity: "switch.zone1".into(),
            vwc_sensor_entities: vec!["sensor.vwc1".into()],
            ec_sensor_entities: vec!["sensor.ec1".into()],
            dripper_count: 4,
            dripper_flow_ml_per_ms: 0.05,
            substrate_volume_ml: 3000.0,
            group_id: None,
            daily_budget_ml: 5000.0,
            priority: Priority::Normal,
            mode: GrowMode::Vegetative,
        }
    }

    fn fused(value: f64, at: DateTime<Utc>) -> Result<FusedValue, crate::fusion::NoReliableSample> {
        Ok(FusedValue { value, confidence: 1.0, contributing: 1, at })
    }

    #[test]
    fn p0_to_p1_on_dryback_target() {
        let config = EngineConfig::default();
        let topo = topology();
        let mut rt = ZoneRuntime::new(ZoneId(1), Phase::P0, at(8, 0), 70.0);
        let outcome = tick(&mut rt, TickInputs {
            now: at(9, 30),
            vwc: fused(56.0, at(9, 30)),
            ec: fused(1.0, at(9, 30)),
            lights_off_reached: false,
            seconds_until_lights_off: 36000,
            config: &config,
            topology: &topo,
        });
        assert_eq!(rt.phase, Phase::P1);
        assert!(matches!(outcome.decision, Decision::PhaseTransition { to: Phase::P1, .. }));
    }

    #[test]
    fn p1_shot_counter_increases_monotonically_and_resets_on_transition() {
        let mut config = EngineConfig::default();
        config.p1.inter_shot_sec = 0;
        config.p1.min_shots = 1;
        let topo = topology();
        let mut rt = ZoneRuntime::new(ZoneId(1), Phase::P1, at(8, 0), 70.0);
        let before = rt.shots_in_phase;
        let outcome = tick(&mut rt, TickInputs {
            now: at(8, 1),
            vwc: fused(50.0, at(8, 1)),
            ec: fused(1.0, at(8, 1)),
            lights_off_reached: false,
            seconds_until_lights_off: 36000,
            config: &config,
            topology: &topo,
        });
        assert!(matches!(outcome.decision, Decision::Shot { .. }));
        assert_eq!(rt.shots_in_phase, before + 1);

        // Force into P2 and confirm reset.
        rt.enter_phase(Phase::P2, at(8, 2), 66.0);
        assert_eq!(rt.shots_in_phase, 0);
    }

    #[test]
    fn ec_reset_path_requires_all_three_conditions() {
        let mut config = EngineConfig::default();
        config.p1.min_shots = 3;
        config.p1.target_vwc_pct = 65.0;
        config.ec_flush_target = 0.8;
        let topo = topology();
        let mut rt = ZoneRuntime::new(ZoneId(2), Phase::P1, at(8, 0), 70.0);
        rt.shots_in_phase = 4;
        let outcome = tick(&mut rt, TickInputs {
            now: at(9, 0),
            vwc: fused(66.0, at(9, 0)),
            ec: fused(0.7, at(9, 0)),
            lights_off_reached: false,
            seconds_until_lights_off: 36000,
            config: &config,
            topology: &topo,
        });
        assert_eq!(rt.phase, Phase::P2);
        match outcome.decision {
            Decision::PhaseTransition { reason, .. } => assert!(reason == "target-reached" || reason == "ec-reset"),
            other => panic!("expected phase transition, got {other:?}"),
        }
    }

    #[test]
    fn emergency_fires_regardless_of_phase() {
        let config = EngineConfig::default();
        let topo = topology();
        let mut rt = ZoneRuntime::new(ZoneId(3), Phase::P3, at(22, 30), 48.0);
        let outcome = tick(&mut rt, TickInputs {
            now: at(22, 31),
            vwc: fused(34.0, at(22, 31)),
            ec: fused(1.0, at(22, 31)),
            lights_off_reached: false,
            seconds_until_lights_off: 5400,
            config: &config,
            topology: &topo,
        });
        assert!(matches!(outcome.decision, Decision::Emergency { .. }));
        assert_eq!(outcome.decision.priority(), Priority::Critical);
    }

    #[test]
    fn sensor_degraded_holds_and_emits_event() {
        let config = EngineConfig::default();
        let topo = topology();
        let mut rt = ZoneRuntime::new(ZoneId(4), Phase::P2, at(8, 0), 65.0);
        let outcome = tick(&mut rt, TickInputs {
            now: at(8, 1),
            vwc: Err(crate::fusion::NoReliableSample),
            ec: Err(crate::fusion::NoReliableSample),
            lights_off_reached: false,
            seconds_until_lights_off: 36000,
            config: &config,
            topology: &topo,
        });
        assert_eq!(outcome.decision, Decision::Hold);
        assert!(outcome.events.iter().any(|e| matches!(e, DomainEvent::SensorDegraded { .. })));
    }

    #[test]
    fn zone_parked_after_stale_grace_and_unsafe_after_emergency_stale() {
        let mut config = EngineConfig::default();
        config.sensor_stale_grace_min = 15;
        config.emergency_stale_min = 30;
        let topo = topology();
        let mut rt = ZoneRuntime::new(ZoneId(4), Phase::P2, at(8, 0), 65.0);
        rt.last_known_vwc_value = Some(65.0);
        rt.last_known_vwc_at = Some(at(8, 0));

        let outcome = tick(&mut rt, TickInputs {
            now: at(8, 20),
            vwc: Err(crate::fusion::NoReliableSample),
            ec: Err(crate::fusion::NoReliableSample),
            lights_off_reached: false,
            seconds_until_lights_off: 36000,
            config: &config,
            topology: &topo,
        });
        assert_eq!(outcome.decision, Decision::Hold);
        assert!(!rt.unsafe_flag);

        let outcome2 = tick(&mut rt, TickInputs {
            now: at(8, 31),
            vwc: Err(crate::fusion::NoReliableSample),
            ec: Err(crate::fusion::NoReliableSample),
            lights_off_reached: false,
            seconds_until_lights_off: 36000,
            config: &config,
            topology: &topo,
        });
        assert_eq!(outcome2.decision, Decision::Hold);
        assert!(rt.unsafe_flag);
    }
}
