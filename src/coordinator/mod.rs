//! Coordinator (spec.md §4.6): the top-level process owner. Boots config and
//! persisted state, wires sensor readings into fusion, drives the tick
//! scheduler, owns the sequencer worker and snapshot timer, and runs the
//! background safety self-check.

pub mod health;

use crate::bridge::{DomainEvent, EntityBridge};
use crate::clock::{Clock, LightSchedule};
use crate::config::{EngineConfig, ZoneTopology};
use crate::dryback::DrybackDetector;
use crate::error::{EngineError, EngineResult};
use crate::fusion::SensorFusion;
use crate::ids::ZoneId;
use crate::persistence::{PersistedState, PersistenceStore};
use crate::sequencer::{IrrigationJob, SafetyRegistry, Sequencer, ZoneSafetyState, ZoneShot};
use crate::types::{Priority, SensorKind};
use crate::zone::{self, Decision, GroupCandidate, Phase, TickInputs, ZoneRuntime};
use health::{HealthCheck, SafetyInterlockCheck};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Per-zone mutable state the coordinator owns: one `tokio::sync::Mutex`
/// guarding everything that changes on a tick (spec.md §5: "one mutex per
/// zone, never a crate-wide lock").
struct ZoneHandle {
    runtime: ZoneRuntime,
    vwc_fusion: SensorFusion,
    ec_fusion: SensorFusion,
    dryback: DrybackDetector,
    topology: ZoneTopology,
}

/// One zone's tick result, carried from the tick pass to the dispatch pass
/// so group membership can be evaluated across a whole group at once.
struct ZoneTickResult {
    id: ZoneId,
    topology: ZoneTopology,
    decision: Decision,
    group_candidate: Option<GroupCandidate>,
    enabled: bool,
}

pub struct Coordinator {
    bridge: Arc<dyn EntityBridge>,
    persistence: Arc<PersistenceStore>,
    sequencer: Arc<Sequencer>,
    safety: Arc<SafetyRegistry>,
    clock: Arc<dyn Clock>,
    light_schedule: Arc<dyn LightSchedule>,
    zones: HashMap<ZoneId, Mutex<ZoneHandle>>,
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl Coordinator {
    pub fn new(
        config: &EngineConfig,
        bridge: Arc<dyn EntityBridge>,
        persistence: Arc<PersistenceStore>,
        clock: Arc<dyn Clock>,
        light_schedule: Arc<dyn LightSchedule>,
    ) -> Self {
        let now = clock.now();
        let lights_on = light_schedule.lights_on(now);

        let mut zones = HashMap::new();
        let mut entity_refs = Vec::new();
        for topo in &config.zones {
            let refs = topo.entity_refs();
            entity_refs.push(refs.clone());
            let handle = ZoneHandle {
                runtime: ZoneRuntime::new(topo.id, Phase::initial(lights_on), now, 0.0),
                vwc_fusion: SensorFusion::new(
                    SensorKind::Vwc,
                    topo.vwc_sensor_entities.len(),
                    config.fusion.sensor_ring_window_sec,
                    config.fusion.freshness_horizon_sec,
                    config.fusion.min_sensors,
                ),
                ec_fusion: SensorFusion::new(
                    SensorKind::Ec,
                    topo.ec_sensor_entities.len(),
                    config.fusion.sensor_ring_window_sec,
                    config.fusion.freshness_horizon_sec,
                    config.fusion.min_sensors,
                ),
                dryback: DrybackDetector::new(
                    crate::config::defaults::NOISE_BAND_PCT,
                    crate::config::defaults::DRYBACK_HISTORY_HOURS,
                    0.0,
                    now,
                ),
                topology: topo.clone(),
            };
            zones.insert(topo.id, Mutex::new(handle));
        }

        let safety = Arc::new(SafetyRegistry::new());
        let sequencer = Arc::new(Sequencer::new(bridge.clone(), persistence.clone(), safety.clone()));
        let health_checks: Vec<Box<dyn HealthCheck>> = vec![Box::new(SafetyInterlockCheck::new(entity_refs))];

        Self { bridge, persistence, sequencer, safety, clock, light_schedule, zones, health_checks }
    }

    /// Boot sequence (spec.md §4.6): replay any crashed in-flight job, then
    /// restore per-zone runtime from the last snapshot where present.
    pub async fn boot(&self) -> EngineResult<()> {
        let _ = crate::sequencer::recover_in_flight(self.bridge.as_ref(), &self.persistence).await;

        match self.persistence.load().await {
            Ok(state) => {
                for (id, handle) in &self.zones {
                    if let Some(saved) = state.zones.get(id) {
                        let mut guard = handle.lock().await;
                        guard.runtime = saved.clone();
                        guard.dryback.reset_peak(saved.peak_vwc, self.clock.now());
                    }
                }
                tracing::info!(zones = state.zones.len(), "restored persisted zone state");
            }
            Err(e) => {
                tracing::warn!("no usable persisted state at boot ({e}); starting from topology defaults");
            }
        }
        Ok(())
    }

    /// Runs the tick scheduler, snapshot timer, sequencer worker, and
    /// self-check loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let config = crate::config::get();

        let seq = self.sequencer.clone();
        let seq_cancel = cancel.clone();
        let sequencer_task = tokio::spawn(async move { seq.run_worker(seq_cancel).await });

        let mut tick_timer = tokio::time::interval(std::time::Duration::from_secs(config.tick_interval_sec.max(1)));
        let mut snapshot_timer = tokio::time::interval(std::time::Duration::from_secs(config.snapshot_interval_sec.max(1)));
        let mut health_timer = tokio::time::interval(std::time::Duration::from_secs(10));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick_timer.tick() => self.tick_all().await,
                _ = snapshot_timer.tick() => {
                    if let Err(e) = self.snapshot().await {
                        tracing::warn!("snapshot failed: {e}");
                    }
                }
                _ = health_timer.tick() => self.run_health_checks().await,
            }
        }

        let _ = self.snapshot().await;
        let _ = sequencer_task.await;
    }

    /// Runs every background self-check and, for each violation, latches the
    /// offending zone Unsafe immediately (spec.md §4.7) rather than only
    /// logging: a bug elsewhere opening a valve outside the sequencer's
    /// gated sequence is exactly the kind of fault this check exists to
    /// catch, and logging alone would let it keep irrigating.
    async fn run_health_checks(&self) {
        for check in &self.health_checks {
            for (zone, violation) in check.check(self.bridge.as_ref()) {
                tracing::error!(check = check.name(), zone = zone.0, "{violation}");
                self.mark_zone_unsafe(zone, violation).await;
            }
        }
    }

    async fn mark_zone_unsafe(&self, zone: ZoneId, reason: String) {
        let Some(handle) = self.zones.get(&zone) else { return };
        let mut guard = handle.lock().await;
        guard.runtime.mark_unsafe(reason.clone());
        self.safety.update(zone, ZoneSafetyState {
            unsafe_flag: true,
            manual_override_until: guard.runtime.manual_override_until,
            daily_usage_ml: guard.runtime.daily_usage_ml,
            daily_budget_ml: guard.topology.daily_budget_ml,
        });
        drop(guard);
        self.bridge.publish_event(DomainEvent::UnsafeZone { zone, reason });
    }

    /// One pass over every zone: ingest current sensor readings, fuse, feed
    /// the dryback tracker, run the zone tick, and submit any resulting shot
    /// as a sequencer job. Zones are ticked independently but dispatched in
    /// a second pass so that grouped zones (spec.md §4.5 "Grouping") can be
    /// evaluated against the whole group's tick results at once.
    async fn tick_all(&self) {
        let now = self.clock.now();
        let lights_off_reached = !self.light_schedule.lights_on(now);
        let seconds_until_lights_off = self.light_schedule.seconds_until_off(now);
        let config = crate::config::get();

        let mut results = Vec::with_capacity(self.zones.len());
        for (id, handle) in &self.zones {
            let mut guard = handle.lock().await;
            let refs = guard.topology.entity_refs();

            for (i, sensor) in refs.vwc_sensors.iter().enumerate() {
                let value = self.bridge.get_numeric(sensor, f64::NAN);
                if value.is_finite() {
                    guard.vwc_fusion.ingest(i, value, now);
                }
            }
            for (i, sensor) in refs.ec_sensors.iter().enumerate() {
                let value = self.bridge.get_numeric(sensor, f64::NAN);
                if value.is_finite() {
                    guard.ec_fusion.ingest(i, value, now);
                }
            }

            let vwc = guard.vwc_fusion.fuse(now);
            let ec = guard.ec_fusion.fuse(now);
            if let Ok(fv) = &vwc {
                guard.dryback.observe(fv.value, now);
            }

            let topology = guard.topology.clone();
            let outcome = zone::tick(&mut guard.runtime, TickInputs {
                now,
                vwc,
                ec,
                lights_off_reached,
                seconds_until_lights_off,
                config,
                topology: &topology,
            });
            let enabled = !guard.runtime.unsafe_flag && !guard.runtime.is_manual_override_active(now);
            self.safety.update(*id, ZoneSafetyState {
                unsafe_flag: guard.runtime.unsafe_flag,
                manual_override_until: guard.runtime.manual_override_until,
                daily_usage_ml: guard.runtime.daily_usage_ml,
                daily_budget_ml: topology.daily_budget_ml,
            });
            drop(guard);

            for event in outcome.events {
                self.bridge.publish_event(event);
            }

            results.push(ZoneTickResult { id: *id, topology, decision: outcome.decision, group_candidate: outcome.group_candidate, enabled });
        }

        self.dispatch_results(results).await;
    }

    /// Groups same-tick results by `group_id`, dispatches a single burst job
    /// for any group that crosses `group_threshold_pct`, then dispatches
    /// every remaining (ungrouped, or group-not-triggered) zone individually.
    async fn dispatch_results(&self, results: Vec<ZoneTickResult>) {
        let config = crate::config::get();

        let mut groups: HashMap<String, Vec<&ZoneTickResult>> = HashMap::new();
        for r in &results {
            if let Some(gid) = &r.topology.group_id {
                groups.entry(gid.clone()).or_default().push(r);
            }
        }

        let mut recruited: std::collections::HashSet<ZoneId> = std::collections::HashSet::new();
        for members in groups.values() {
            let enabled: Vec<&&ZoneTickResult> = members.iter().filter(|m| m.enabled).collect();
            if enabled.len() < 2 {
                continue;
            }
            let below: Vec<&&ZoneTickResult> = enabled.iter().filter(|m| m.group_candidate.is_some()).copied().collect();
            if below.is_empty() {
                continue;
            }
            let fraction_pct = below.len() as f64 / enabled.len() as f64 * 100.0;
            if fraction_pct >= config.group_threshold_pct {
                let zones: Vec<ZoneId> = below.iter().map(|m| m.id).collect();
                self.dispatch_group(&below, config).await;
                recruited.extend(zones);
            }
        }

        for r in results {
            if recruited.contains(&r.id) {
                continue;
            }
            self.dispatch_decision(r.id, &r.topology, r.decision);
        }
    }

    /// Builds and enqueues one multi-zone burst job from a group's
    /// below-threshold members. A member whose individual `Decision` wasn't
    /// already `Shot` (e.g. a P1 zone still inside its inter-shot cooldown)
    /// still gets its shot counters bumped here, since it is about to be
    /// physically irrigated as part of the burst.
    async fn dispatch_group(&self, recruited: &[&&ZoneTickResult], config: &EngineConfig) {
        let mut shots = Vec::with_capacity(recruited.len());
        let mut margin_max = f64::MIN;
        let mut priority = Priority::Low;

        for m in recruited {
            let candidate = m.group_candidate.expect("filtered to Some above");
            let refs = m.topology.entity_refs();
            let duration_ms = crate::zone::volume::duration_ms(
                candidate.volume_ml,
                m.topology.dripper_count,
                m.topology.dripper_flow_ml_per_ms,
                config.sequencer.min_shot_ms,
                config.sequencer.max_shot_ms,
            );
            shots.push(ZoneShot { zone: m.id, volume_ml: candidate.volume_ml, duration_ms, zone_valve: refs.zone_valve });
            margin_max = margin_max.max(candidate.vwc_margin);
            priority = priority.max(m.topology.priority);

            if !matches!(m.decision, Decision::Shot { .. }) {
                if let Some(handle) = self.zones.get(&m.id) {
                    let mut guard = handle.lock().await;
                    guard.runtime.record_shot(candidate.volume_ml, self.clock.now());
                }
            }
            self.bridge.publish_event(DomainEvent::IrrigationScheduled { zone: m.id, volume_ml: candidate.volume_ml, priority });
        }

        let leader_refs = recruited[0].topology.entity_refs();
        let job = IrrigationJob {
            shots,
            pump: leader_refs.pump,
            main_valve: leader_refs.main_valve,
            priority,
            enqueued_at: self.clock.now(),
            vwc_margin: margin_max,
            reason: "grouped",
        };
        self.sequencer.enqueue(job);
    }

    fn dispatch_decision(&self, zone: ZoneId, topology: &ZoneTopology, decision: Decision) {
        let config = crate::config::get();
        let priority = decision.priority();
        let (volume_ml, reason, vwc_margin) = match decision {
            Decision::Shot { volume_ml, reason, vwc_margin, .. } => (volume_ml, reason, vwc_margin),
            Decision::Emergency { volume_ml, vwc_margin, .. } => (volume_ml, "emergency", vwc_margin),
            Decision::Hold | Decision::PhaseTransition { .. } => return,
        };

        let refs = topology.entity_refs();
        let duration_ms = crate::zone::volume::duration_ms(
            volume_ml,
            topology.dripper_count,
            topology.dripper_flow_ml_per_ms,
            config.sequencer.min_shot_ms,
            config.sequencer.max_shot_ms,
        );

        let job = IrrigationJob {
            shots: vec![ZoneShot { zone, volume_ml, duration_ms, zone_valve: refs.zone_valve }],
            pump: refs.pump,
            main_valve: refs.main_valve,
            priority,
            enqueued_at: self.clock.now(),
            vwc_margin,
            reason,
        };

        self.sequencer.enqueue(job);
    }

    fn zone_handle(&self, zone: ZoneId) -> EngineResult<&Mutex<ZoneHandle>> {
        self.zones.get(&zone).ok_or_else(|| EngineError::InvariantViolation { detail: format!("unknown zone {zone:?}") })
    }

    /// `ForcePhase` (spec.md §6): jumps a zone straight to `phase`, bypassing
    /// the transition table, and publishes the same `PhaseTransition` event a
    /// table-driven transition would.
    pub async fn force_phase(&self, zone: ZoneId, phase: Phase, reason: &str) -> EngineResult<()> {
        let handle = self.zone_handle(zone)?;
        let now = self.clock.now();
        let mut guard = handle.lock().await;
        let from = guard.runtime.phase;
        let current_vwc = guard.vwc_fusion.clone().fuse(now).map(|fv| fv.value).unwrap_or(guard.runtime.peak_vwc);
        guard.runtime.enter_phase(phase, now, current_vwc);
        drop(guard);

        self.bridge.publish_event(DomainEvent::PhaseTransition {
            zone,
            from: from.to_string(),
            to: phase.to_string(),
            reason: reason.to_string(),
            at: now,
        });
        Ok(())
    }

    /// `ExecuteShot` (spec.md §6): queues an operator-requested shot directly,
    /// outside the normal per-phase decision path. Bookkeeping follows the
    /// same "counted at decision time" policy as a tick-driven shot.
    pub async fn execute_shot(&self, zone: ZoneId, volume_ml: f64, shot_type: &'static str, priority: Priority) -> EngineResult<()> {
        let handle = self.zone_handle(zone)?;
        let config = crate::config::get();
        let now = self.clock.now();

        let mut guard = handle.lock().await;
        let refs = guard.topology.entity_refs();
        let duration_ms = crate::zone::volume::duration_ms(
            volume_ml,
            guard.topology.dripper_count,
            guard.topology.dripper_flow_ml_per_ms,
            config.sequencer.min_shot_ms,
            config.sequencer.max_shot_ms,
        );
        guard.runtime.record_shot(volume_ml, now);
        drop(guard);

        self.bridge.publish_event(DomainEvent::IrrigationScheduled { zone, volume_ml, priority });
        self.sequencer.enqueue(IrrigationJob {
            shots: vec![ZoneShot { zone, volume_ml, duration_ms, zone_valve: refs.zone_valve }],
            pump: refs.pump,
            main_valve: refs.main_valve,
            priority,
            enqueued_at: now,
            vwc_margin: 0.0,
            reason: shot_type,
        });
        Ok(())
    }

    /// `SetManualOverride` (spec.md §6): opens or clears a zone's manual
    /// override window. Mirrored into the `SafetyRegistry` immediately rather
    /// than waiting for the next tick, since the sequencer reads that
    /// snapshot at job-execution time, not `ZoneRuntime` directly.
    pub async fn set_manual_override(&self, zone: ZoneId, enable: bool, timeout_sec: u64) -> EngineResult<()> {
        let handle = self.zone_handle(zone)?;
        let now = self.clock.now();
        let mut guard = handle.lock().await;
        guard.runtime.manual_override_until = if enable { Some(now + chrono::Duration::seconds(timeout_sec as i64)) } else { None };
        let state = ZoneSafetyState {
            unsafe_flag: guard.runtime.unsafe_flag,
            manual_override_until: guard.runtime.manual_override_until,
            daily_usage_ml: guard.runtime.daily_usage_ml,
            daily_budget_ml: guard.topology.daily_budget_ml,
        };
        drop(guard);
        self.safety.update(zone, state);
        Ok(())
    }

    /// `CheckTransitionConditions` (spec.md §6): a non-mutating dry run of
    /// what the next tick would decide for `zone`. Runs against cloned
    /// runtime and fusion state so the real zone is left untouched — no
    /// shot is recorded, no event is published, no phase changes.
    pub async fn check_transition_conditions(&self, zone: ZoneId) -> EngineResult<Decision> {
        let handle = self.zone_handle(zone)?;
        let now = self.clock.now();
        let lights_off_reached = !self.light_schedule.lights_on(now);
        let seconds_until_lights_off = self.light_schedule.seconds_until_off(now);
        let config = crate::config::get();

        let guard = handle.lock().await;
        let mut runtime = guard.runtime.clone();
        let mut vwc_fusion = guard.vwc_fusion.clone();
        let mut ec_fusion = guard.ec_fusion.clone();
        let topology = guard.topology.clone();
        let refs = topology.entity_refs();
        drop(guard);

        for (i, sensor) in refs.vwc_sensors.iter().enumerate() {
            let value = self.bridge.get_numeric(sensor, f64::NAN);
            if value.is_finite() {
                vwc_fusion.ingest(i, value, now);
            }
        }
        for (i, sensor) in refs.ec_sensors.iter().enumerate() {
            let value = self.bridge.get_numeric(sensor, f64::NAN);
            if value.is_finite() {
                ec_fusion.ingest(i, value, now);
            }
        }

        let outcome = zone::tick(&mut runtime, TickInputs {
            now,
            vwc: vwc_fusion.fuse(now),
            ec: ec_fusion.fuse(now),
            lights_off_reached,
            seconds_until_lights_off,
            config,
            topology: &topology,
        });
        Ok(outcome.decision)
    }

    /// Current in-memory runtime state for every zone (spec.md §6 `inspect`:
    /// "print current in-memory state"), independent of what's on disk.
    pub async fn zone_states(&self) -> HashMap<ZoneId, ZoneRuntime> {
        let mut states = HashMap::with_capacity(self.zones.len());
        for (id, handle) in &self.zones {
            let guard = handle.lock().await;
            states.insert(*id, guard.runtime.clone());
        }
        states
    }

    pub async fn snapshot(&self) -> EngineResult<()> {
        let mut zones = HashMap::new();
        for (id, handle) in &self.zones {
            let guard = handle.lock().await;
            zones.insert(*id, guard.runtime.clone());
        }
        let state = PersistedState::new(zones, None, self.clock.now());
        self.persistence
            .save(&state)
            .await
            .map_err(|e| EngineError::PersistenceDegraded(e.to_string()))
    }
}
