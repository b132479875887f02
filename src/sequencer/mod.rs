//! Hardware Sequencer (spec.md §4.5): the process-singleton actuator owner.
//! Serializes every physical actuation through one dwell-gated sequence and
//! enforces the pump/main-valve safety interlocks no other component may
//! bypass.

mod job;
mod queue;
mod safety;

pub use job::{IrrigationJob, JobStep, ZoneShot};
pub use queue::JobQueue;
pub use safety::{GateBlock, SafetyRegistry, ZoneSafetyState};

use crate::bridge::{DomainEvent, EntityBridge, EntityRef, EntityValue};
use crate::error::{EngineError, EngineResult};
use crate::ids::ZoneId;
use crate::persistence::{InFlightMarker, PersistenceStore};
use crate::types::Priority;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Outcome of one executed job, handed to the coordinator so it can update
/// `ZoneRuntime` counters and emit `IrrigationCompleted`.
pub struct JobOutcome {
    pub zones: Vec<ZoneId>,
    pub total_volume_ml: f64,
    pub reason: &'static str,
    pub skipped: Option<&'static str>,
}

pub struct Sequencer {
    bridge: Arc<dyn EntityBridge>,
    persistence: Arc<PersistenceStore>,
    safety: Arc<SafetyRegistry>,
    queue: JobQueue,
    preempt_requested: AtomicBool,
    current_is_critical: AtomicBool,
    wake: Notify,
}

impl Sequencer {
    pub fn new(bridge: Arc<dyn EntityBridge>, persistence: Arc<PersistenceStore>, safety: Arc<SafetyRegistry>) -> Self {
        Self {
            bridge,
            persistence,
            safety,
            queue: JobQueue::new(),
            preempt_requested: AtomicBool::new(false),
            current_is_critical: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn enqueue(&self, job: IrrigationJob) {
        if job.priority == Priority::Critical && !self.current_is_critical.load(Ordering::SeqCst) {
            self.preempt_requested.store(true, Ordering::SeqCst);
        }
        self.queue.push(job);
        self.wake.notify_one();
    }

    pub fn cancel_zone(&self, zone: ZoneId) {
        self.queue.cancel_zone(zone);
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Drains and returns the next queued job without running it. Test-only:
    /// production code only ever consumes the queue via `run_worker`.
    #[cfg(test)]
    pub fn pop_front_for_test(&self) -> Option<IrrigationJob> {
        self.queue.pop_front()
    }

    /// Drains the queue, one job at a time, until cancelled. A job
    /// in progress always finishes its shutdown sub-sequence before the
    /// worker honors cancellation (spec.md §5).
    pub async fn run_worker(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                () = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
            }
            while let Some(job) = self.queue.pop_front() {
                self.current_is_critical.store(job.priority == Priority::Critical, Ordering::SeqCst);
                self.preempt_requested.store(false, Ordering::SeqCst);
                let outcome = self.execute_job(job, &cancel).await;
                self.current_is_critical.store(false, Ordering::SeqCst);
                self.report(outcome);
                if cancel.is_cancelled() {
                    return;
                }
            }
        }
    }

    fn report(&self, outcome: JobOutcome) {
        if let Some(reason) = outcome.skipped {
            for zone in &outcome.zones {
                self.bridge.publish_event(DomainEvent::IrrigationSkipped {
                    zone: Some(*zone),
                    reason: reason.to_string(),
                });
            }
        } else {
            for zone in &outcome.zones {
                self.bridge.publish_event(DomainEvent::IrrigationCompleted {
                    zone: *zone,
                    volume_ml: outcome.total_volume_ml,
                    reason: outcome.reason.to_string(),
                });
            }
        }
    }

    /// Publishes one `IrrigationSkipped` per zone, used when the safety gate
    /// drops a zone (or the whole job) before any actuation happens.
    fn skip_zones(&self, zones: &[ZoneId], reason: &str) {
        for zone in zones {
            self.bridge.publish_event(DomainEvent::IrrigationSkipped { zone: Some(*zone), reason: reason.to_string() });
        }
    }

    fn zone_gate(&self, shot: &ZoneShot, now: DateTime<Utc>) -> Result<(), GateBlock> {
        let enabled = EntityRef::switch(format!("switch.zone{}_enabled", shot.zone.0));
        if !self.bridge.get_bool(&enabled, true) {
            return Err(GateBlock::ZoneDisabled);
        }
        self.safety.check(shot.zone, now, shot.volume_ml)
    }

    /// Writes `value` to `entity` and confirms it landed, retrying with
    /// jittered backoff up to `writeMaxAttempts` (spec.md §7). `set` is
    /// fire-and-forget, so confirmation means reading the entity back after
    /// giving the bridge's write worker a moment to drain.
    async fn set_confirmed(&self, entity: &EntityRef, value: EntityValue) -> bool {
        let cfg = crate::config::get();
        let max_attempts = cfg.write_max_attempts.max(1);
        for attempt in 0..max_attempts {
            self.bridge.set(entity, value.clone());
            tokio::time::sleep(std::time::Duration::from_millis(cfg.sequencer.write_confirm_poll_ms)).await;
            let (seen, ok) = self.bridge.get(entity);
            if ok && seen == value {
                return true;
            }
            if attempt + 1 < max_attempts {
                let jitter_ms = {
                    use rand::Rng;
                    rand::thread_rng().gen_range(0..cfg.sequencer.write_retry_jitter_ms.max(1))
                };
                tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;
            }
        }
        false
    }

    /// A bridge write never confirmed after every retry: runs the shutdown
    /// sub-sequence with best effort, latches every zone in the job Unsafe,
    /// and reports the job skipped (spec.md §7).
    async fn abort_on_write_failure(&self, job: &IrrigationJob, entity: &EntityRef) -> JobOutcome {
        tracing::error!(entity = %entity, "bridge write did not confirm after max attempts, aborting job");
        self.close_down(job).await;
        for zone in job.zone_ids() {
            self.safety.mark_unsafe(zone);
            self.bridge.publish_event(DomainEvent::UnsafeZone {
                zone,
                reason: format!("bridge write to {entity} failed after max attempts"),
            });
        }
        JobOutcome { zones: job.zone_ids(), total_volume_ml: 0.0, reason: job.reason, skipped: Some("bridge-write-failed") }
    }

    /// Safety gate (spec.md §4.5 step 1), re-checked right before actuation
    /// rather than at enqueue time since a job can sit queued behind
    /// higher-priority work for a while. A zone the gate drops is removed
    /// from the job rather than failing it outright, so the rest of a
    /// grouped burst still runs.
    async fn execute_job(&self, job: IrrigationJob, cancel: &CancellationToken) -> JobOutcome {
        let cfg = crate::config::get();
        let now = Utc::now();

        if !self.bridge.get_bool(&EntityRef::switch(crate::config::defaults::SYSTEM_ENABLED_ENTITY), true) {
            self.skip_zones(&job.zone_ids(), GateBlock::SystemDisabled.as_str());
            return JobOutcome { zones: vec![], total_volume_ml: 0.0, reason: job.reason, skipped: None };
        }
        if job.priority != Priority::Critical
            && !self.bridge.get_bool(&EntityRef::switch(crate::config::defaults::AUTO_IRRIGATION_ENTITY), true)
        {
            self.skip_zones(&job.zone_ids(), GateBlock::AutoIrrigationOff.as_str());
            return JobOutcome { zones: vec![], total_volume_ml: 0.0, reason: job.reason, skipped: None };
        }

        let mut shots = Vec::with_capacity(job.shots.len());
        for shot in job.shots {
            match self.zone_gate(&shot, now) {
                Ok(()) => shots.push(shot),
                Err(block) => self.skip_zones(&[shot.zone], block.as_str()),
            }
        }
        if shots.is_empty() {
            return JobOutcome { zones: vec![], total_volume_ml: 0.0, reason: job.reason, skipped: None };
        }
        let job = IrrigationJob { shots, ..job };
        let zones = job.zone_ids();

        let marker = InFlightMarker {
            zone_ids: zones.clone(),
            step: JobStep::OpeningPump.as_str().to_string(),
            entities: marker_entities(&job),
        };
        if let Err(e) = self.write_marker(Some(marker)).await {
            tracing::warn!("failed to persist in-flight marker: {e}");
        }

        if !self.set_confirmed(&job.pump, EntityValue::Bool(true)).await {
            return self.abort_on_write_failure(&job, &job.pump).await;
        }
        if self.dwell(cfg.sequencer.pump_prime_ms, cancel).await.is_cancelled() {
            return self.shutdown(&job, cancel).await;
        }

        if !self.set_confirmed(&job.main_valve, EntityValue::Bool(true)).await {
            return self.abort_on_write_failure(&job, &job.main_valve).await;
        }
        if self.dwell(cfg.sequencer.main_line_pressure_ms, cancel).await.is_cancelled() {
            return self.shutdown(&job, cancel).await;
        }

        for shot in &job.shots {
            if !self.set_confirmed(&shot.zone_valve, EntityValue::Bool(true)).await {
                return self.abort_on_write_failure(&job, &shot.zone_valve).await;
            }
        }
        for zone in &zones {
            self.bridge.publish_event(DomainEvent::IrrigationStarted { zone: *zone });
        }

        let hold_ms = job.max_duration_ms();
        if self.dwell(hold_ms, cancel).await.is_cancelled() || self.preempt_requested.load(Ordering::SeqCst) {
            return self.shutdown(&job, cancel).await;
        }

        self.close_down(&job).await;
        JobOutcome {
            zones,
            total_volume_ml: job.shots.iter().map(|s| s.volume_ml).sum(),
            reason: job.reason,
            skipped: None,
        }
    }

    /// Runs steps 6->8 unconditionally, used both for a normal completion
    /// and for cancellation/preemption mid-job (spec.md §5, §8 property 6).
    async fn shutdown(&self, job: &IrrigationJob, _cancel: &CancellationToken) -> JobOutcome {
        self.close_down(job).await;
        JobOutcome {
            zones: job.zone_ids(),
            total_volume_ml: 0.0,
            reason: job.reason,
            skipped: Some("interrupted"),
        }
    }

    async fn close_down(&self, job: &IrrigationJob) {
        let cfg = crate::config::get();
        for shot in &job.shots {
            self.bridge.set(&shot.zone_valve, EntityValue::Bool(false));
        }
        self.mark_step(job, JobStep::ClosingMain).await;
        self.bridge.set(&job.main_valve, EntityValue::Bool(false));
        let _ = self.dwell(cfg.sequencer.main_line_drain_ms, &CancellationToken::new()).await;
        self.mark_step(job, JobStep::ClosingPump).await;
        self.bridge.set(&job.pump, EntityValue::Bool(false));
        let _ = self.write_marker(None).await;
    }

    async fn mark_step(&self, job: &IrrigationJob, step: JobStep) {
        let marker = InFlightMarker {
            zone_ids: job.zone_ids(),
            step: step.as_str().to_string(),
            entities: marker_entities(job),
        };
        let _ = self.write_marker(Some(marker)).await;
    }

    async fn write_marker(&self, marker: Option<InFlightMarker>) -> EngineResult<()> {
        // The coordinator owns the full snapshot; the sequencer only needs
        // the marker to round-trip, so it loads-modifies-saves rather than
        // holding its own copy of zone state.
        let mut state = match self.persistence.load().await {
            Ok(s) => s,
            Err(_) => crate::persistence::PersistedState::new(Default::default(), None, chrono::Utc::now()),
        };
        state.job_in_flight = marker;
        state.timestamp = chrono::Utc::now();
        self.persistence.save(&state).await.map_err(|e| EngineError::PersistenceDegraded(e.to_string()))
    }

    async fn dwell(&self, ms: u64, cancel: &CancellationToken) -> DwellOutcome {
        tokio::select! {
            _ = cancel.cancelled() => DwellOutcome::Cancelled,
            () = tokio::time::sleep(std::time::Duration::from_millis(ms)) => DwellOutcome::Completed,
        }
    }
}

enum DwellOutcome {
    Completed,
    Cancelled,
}

impl DwellOutcome {
    fn is_cancelled(&self) -> bool {
        matches!(self, DwellOutcome::Cancelled)
    }
}

fn marker_entities(job: &IrrigationJob) -> Vec<String> {
    let mut entities = vec![job.pump.name.to_string(), job.main_valve.name.to_string()];
    entities.extend(job.shots.iter().map(|s| s.zone_valve.name.to_string()));
    entities
}

/// On boot, if a marker is present, runs the shutdown half of the sequence
/// (steps 6->8) unconditionally against the entities it names, then clears
/// it (spec.md §4.5 crash policy, §8 property 8).
pub async fn recover_in_flight(bridge: &dyn EntityBridge, persistence: &PersistenceStore) -> EngineResult<bool> {
    let mut state = match persistence.load().await {
        Ok(s) => s,
        Err(_) => return Ok(false),
    };
    let Some(marker) = state.job_in_flight.take() else {
        return Ok(false);
    };
    tracing::warn!(entities = ?marker.entities, "recovering crashed job, running shutdown sub-sequence");

    let cfg = crate::config::get();
    // entities[0] = pump, entities[1] = main valve, rest = zone valves.
    if let Some(zone_valves) = marker.entities.get(2..) {
        for valve in zone_valves {
            bridge.set(&crate::bridge::EntityRef::switch(valve.clone()), EntityValue::Bool(false));
        }
    }
    if let Some(main) = marker.entities.get(1) {
        bridge.set(&crate::bridge::EntityRef::switch(main.clone()), EntityValue::Bool(false));
        tokio::time::sleep(std::time::Duration::from_millis(cfg.sequencer.main_line_drain_ms)).await;
    }
    if let Some(pump) = marker.entities.first() {
        bridge.set(&crate::bridge::EntityRef::switch(pump.clone()), EntityValue::Bool(false));
    }

    for zone in &marker.zone_ids {
        bridge.publish_event(DomainEvent::IrrigationSkipped { zone: Some(*zone), reason: "crash-recovery".to_string() });
    }

    state.job_in_flight = None;
    persistence.save(&state).await.map_err(|e| EngineError::PersistenceDegraded(e.to_string()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{EntityRef, MemoryBridge};
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_job(priority: Priority) -> IrrigationJob {
        IrrigationJob {
            shots: vec![ZoneShot {
                zone: ZoneId(1),
                volume_ml: 90.0,
                duration_ms: 10,
                zone_valve: EntityRef::switch("switch.zone1"),
            }],
            pump: EntityRef::switch("switch.pump"),
            main_valve: EntityRef::switch("switch.main"),
            priority,
            enqueued_at: Utc::now(),
            vwc_margin: 0.0,
            reason: "test",
        }
    }

    fn init_config() {
        if !crate::config::is_initialized() {
            let mut cfg = crate::config::EngineConfig::default();
            cfg.sequencer.pump_prime_ms = 5;
            cfg.sequencer.main_line_pressure_ms = 5;
            cfg.sequencer.main_line_drain_ms = 5;
            crate::config::init(cfg);
        }
    }

    #[tokio::test]
    async fn completed_job_closes_pump_and_main_in_order() {
        init_config();
        let dir = tempdir().unwrap();
        let persistence = Arc::new(PersistenceStore::new(dir.path().join("state.json")));
        let bridge: Arc<dyn EntityBridge> = Arc::new(MemoryBridge::new());
        let sequencer = Arc::new(Sequencer::new(bridge.clone(), persistence, Arc::new(SafetyRegistry::new())));

        sequencer.enqueue(test_job(Priority::Normal));
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let seq = sequencer.clone();
        let handle = tokio::spawn(async move { seq.run_worker(worker_cancel).await });

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.cancel();
        let _ = handle.await;

        let (pump, _) = bridge.get(&EntityRef::switch("switch.pump"));
        assert_eq!(pump, crate::bridge::EntityValue::Bool(false));
    }

    #[tokio::test]
    async fn crash_recovery_closes_in_order_and_clears_marker() {
        init_config();
        let dir = tempdir().unwrap();
        let persistence = PersistenceStore::new(dir.path().join("state.json"));
        let bridge = MemoryBridge::new();

        let marker = InFlightMarker {
            zone_ids: vec![ZoneId(1)],
            step: "holding".to_string(),
            entities: vec!["switch.pump".into(), "switch.main".into(), "switch.zone1".into()],
        };
        let state = crate::persistence::PersistedState::new(Default::default(), Some(marker), Utc::now());
        persistence.save(&state).await.unwrap();

        let recovered = recover_in_flight(&bridge, &persistence).await.unwrap();
        assert!(recovered);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (zone_valve, _) = bridge.get(&EntityRef::switch("switch.zone1"));
        assert_eq!(zone_valve, crate::bridge::EntityValue::Bool(false));

        let reloaded = persistence.load().await.unwrap();
        assert!(reloaded.job_in_flight.is_none());
    }

    #[tokio::test]
    async fn system_disabled_switch_blocks_the_whole_job() {
        init_config();
        let dir = tempdir().unwrap();
        let persistence = Arc::new(PersistenceStore::new(dir.path().join("state.json")));
        let bridge = Arc::new(MemoryBridge::new());
        bridge.seed("switch.system_enabled", crate::bridge::EntityValue::Bool(false));
        let bridge_dyn: Arc<dyn EntityBridge> = bridge.clone();
        let sequencer = Arc::new(Sequencer::new(bridge_dyn, persistence, Arc::new(SafetyRegistry::new())));

        let cancel = CancellationToken::new();
        let outcome = sequencer.execute_job(test_job(Priority::Normal), &cancel).await;
        assert!(outcome.zones.is_empty());

        let (pump, ok) = bridge.get(&EntityRef::switch("switch.pump"));
        assert!(!ok, "pump was never written, since the job never left the gate");
        assert_ne!(pump, crate::bridge::EntityValue::Bool(true));
    }

    #[tokio::test]
    async fn auto_irrigation_off_does_not_block_a_critical_job() {
        init_config();
        let dir = tempdir().unwrap();
        let persistence = Arc::new(PersistenceStore::new(dir.path().join("state.json")));
        let bridge = Arc::new(MemoryBridge::new());
        bridge.seed("switch.auto_irrigation", crate::bridge::EntityValue::Bool(false));
        let bridge_dyn: Arc<dyn EntityBridge> = bridge.clone();
        let sequencer = Arc::new(Sequencer::new(bridge_dyn, persistence, Arc::new(SafetyRegistry::new())));

        let cancel = CancellationToken::new();
        let outcome = sequencer.execute_job(test_job(Priority::Critical), &cancel).await;
        assert_eq!(outcome.zones, vec![ZoneId(1)]);

        // Critical bypassed the gate and ran the full sequence, so the pump
        // ends up closed again once the write queue finishes draining.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (pump, _) = bridge.get(&EntityRef::switch("switch.pump"));
        assert_eq!(pump, crate::bridge::EntityValue::Bool(false));
    }

    #[tokio::test]
    async fn unsafe_zone_is_dropped_from_the_job() {
        init_config();
        let dir = tempdir().unwrap();
        let persistence = Arc::new(PersistenceStore::new(dir.path().join("state.json")));
        let bridge: Arc<dyn EntityBridge> = Arc::new(MemoryBridge::new());
        let safety = Arc::new(SafetyRegistry::new());
        safety.update(ZoneId(1), ZoneSafetyState { unsafe_flag: true, daily_budget_ml: 5000.0, ..Default::default() });
        let sequencer = Arc::new(Sequencer::new(bridge, persistence, safety));

        let cancel = CancellationToken::new();
        let outcome = sequencer.execute_job(test_job(Priority::Normal), &cancel).await;
        assert!(outcome.zones.is_empty());
    }

    /// A bridge whose writes never confirm: `get` always reports the
    /// opposite of whatever was last requested, so `set_confirmed` exhausts
    /// every attempt.
    struct NeverConfirmsBridge {
        inner: MemoryBridge,
    }

    impl EntityBridge for NeverConfirmsBridge {
        fn get(&self, entity: &EntityRef) -> (EntityValue, bool) {
            let (value, ok) = self.inner.get(entity);
            match value {
                EntityValue::Bool(b) => (EntityValue::Bool(!b), ok),
                other => (other, ok),
            }
        }
        fn set(&self, entity: &EntityRef, value: EntityValue) {
            self.inner.set(entity, value);
        }
        fn subscribe(&self, entity: &EntityRef) -> broadcast::Receiver<EntityValue> {
            self.inner.subscribe(entity)
        }
        fn publish_event(&self, event: DomainEvent) {
            self.inner.publish_event(event);
        }
        fn backend_name(&self) -> &'static str {
            "never-confirms"
        }
    }

    #[tokio::test]
    async fn persistent_write_failure_aborts_the_job_and_marks_the_zone_unsafe() {
        init_config();

        let dir = tempdir().unwrap();
        let persistence = Arc::new(PersistenceStore::new(dir.path().join("state.json")));
        let bridge: Arc<dyn EntityBridge> = Arc::new(NeverConfirmsBridge { inner: MemoryBridge::new() });
        let safety = Arc::new(SafetyRegistry::new());
        let sequencer = Arc::new(Sequencer::new(bridge, persistence, safety.clone()));

        let cancel = CancellationToken::new();
        let outcome = sequencer.execute_job(test_job(Priority::Normal), &cancel).await;

        assert_eq!(outcome.skipped, Some("bridge-write-failed"));
        assert_eq!(outcome.zones, vec![ZoneId(1)]);
        assert_eq!(safety.check(ZoneId(1), Utc::now(), 0.0), Err(GateBlock::Unsafe));
    }
}
