//! Persistence Store (spec.md §4.6): crash-safe atomic snapshot of per-zone
//! runtime state, water-usage counters, and the job-in-flight marker.
//!
//! Grounded on the teacher's `Db::backup` (`VACUUM INTO` + atomic rename)
//! and `storage::lockfile::ProcessLock`: write to a temp file in the same
//! directory, `fsync`, `rename` over the target, so a reader never observes
//! a partial snapshot.

pub mod lockfile;

use crate::error::{EngineError, EngineResult};
use crate::ids::ZoneId;
use crate::zone::ZoneRuntime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 1;

/// One sequencer job's in-flight record (spec.md §6 persistence layout).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InFlightMarker {
    pub zone_ids: Vec<ZoneId>,
    pub step: String,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub zones: HashMap<ZoneId, ZoneRuntime>,
    pub job_in_flight: Option<InFlightMarker>,
}

impl PersistedState {
    pub fn new(zones: HashMap<ZoneId, ZoneRuntime>, job_in_flight: Option<InFlightMarker>, now: DateTime<Utc>) -> Self {
        Self { schema_version: SCHEMA_VERSION, timestamp: now, zones, job_in_flight }
    }
}

/// Atomic-file snapshot store with a single writer (the coordinator).
pub struct PersistenceStore {
    path: PathBuf,
}

impl PersistenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes and atomically replaces the snapshot file. Soft-fails by
    /// returning `Err` — callers set `PersistenceDegraded` rather than
    /// propagating this as fatal (spec.md §7).
    pub async fn save(&self, state: &PersistedState) -> EngineResult<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| EngineError::PersistenceDegraded(format!("serialize: {e}")))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| EngineError::PersistenceDegraded(format!("create data dir: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| EngineError::PersistenceDegraded(format!("create temp snapshot: {e}")))?;
        use tokio::io::AsyncWriteExt;
        file.write_all(&json)
            .await
            .map_err(|e| EngineError::PersistenceDegraded(format!("write temp snapshot: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| EngineError::PersistenceDegraded(format!("fsync temp snapshot: {e}")))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| EngineError::PersistenceDegraded(format!("rename snapshot into place: {e}")))?;

        Ok(())
    }

    /// Loads the snapshot. A missing file or parse failure returns `Err`
    /// rather than panicking; the coordinator falls back to a host-entity
    /// scan in that case (spec.md §4.6, §7).
    pub async fn load(&self) -> EngineResult<PersistedState> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| EngineError::PersistenceDegraded(format!("read snapshot: {e}")))?;
        let state: PersistedState = serde_json::from_slice(&raw)
            .map_err(|e| EngineError::PersistenceDegraded(format!("parse snapshot: {e}")))?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(EngineError::InvariantViolation {
                detail: format!("unsupported schema version {}", state.schema_version),
            });
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Phase;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_state(now: DateTime<Utc>) -> PersistedState {
        let mut zones = HashMap::new();
        zones.insert(ZoneId(1), ZoneRuntime::new(ZoneId(1), Phase::P2, now, 65.0));
        PersistedState::new(zones, None, now)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = PersistenceStore::new(dir.path().join("state.json"));
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 8, 0, 0).unwrap();
        let state = sample_state(now);

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.schema_version, state.schema_version);
        assert_eq!(loaded.zones.get(&ZoneId(1)).unwrap().phase, Phase::P2);
    }

    #[tokio::test]
    async fn load_of_missing_file_is_soft_failure() {
        let dir = tempdir().unwrap();
        let store = PersistenceStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn no_partial_snapshot_is_ever_observable() {
        let dir = tempdir().unwrap();
        let store = PersistenceStore::new(dir.path().join("state.json"));
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 8, 0, 0).unwrap();
        store.save(&sample_state(now)).await.unwrap();
        let first = store.load().await.unwrap();

        let later = now + chrono::Duration::minutes(5);
        store.save(&sample_state(later)).await.unwrap();
        let second = store.load().await.unwrap();

        assert_ne!(first.timestamp, second.timestamp);
    }
}
