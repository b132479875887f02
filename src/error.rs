//! Crate-wide error taxonomy.
//!
//! Boot-time failures (`Config`, `BridgeUnavailable`,
//! `PersistenceUnrecoverable`) are fatal and map to the process exit codes
//! used by `main`. Everything else is soft: the engine logs it, raises the
//! matching domain event, and keeps running with the affected zone parked
//! rather than the whole process aborting.

use crate::ids::ZoneId;
use thiserror::Error;

/// Unified error type for the irrigation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration failed to load or did not validate. Fatal at boot.
    #[error("configuration error: {0}")]
    Config(String),

    /// The entity bridge could not be reached at boot.
    #[error("entity bridge unavailable: {0}")]
    BridgeUnavailable(String),

    /// Persisted state could not be loaded or written and no fallback
    /// reconstruction was possible.
    #[error("persistence unrecoverable: {0}")]
    PersistenceUnrecoverable(String),

    /// Persistence is degraded (write or read failing) but the engine
    /// continues operating from in-memory state.
    #[error("persistence degraded: {0}")]
    PersistenceDegraded(String),

    /// A zone has no reliable sensor sample to act on.
    #[error("zone {zone} has no reliable sample for {kind}")]
    NoReliableSample { zone: ZoneId, kind: &'static str },

    /// A zone has been parked due to continuous sensor degradation.
    #[error("zone {zone} sensor degraded past grace period")]
    SensorDegraded { zone: ZoneId },

    /// A zone has been marked unsafe and irrigation disabled pending operator
    /// intervention.
    #[error("zone {zone} marked unsafe: {reason}")]
    Unsafe { zone: ZoneId, reason: String },

    /// An internal invariant was violated (e.g. unknown phase loaded from a
    /// snapshot, a negative computed volume). Logged loudly; the offending
    /// state is reset rather than trusted.
    #[error("invariant violation: {detail}")]
    InvariantViolation { detail: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
