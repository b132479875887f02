//! Autonomous precision-irrigation engine for substrate-grown plants.
//!
//! Layering, bottom to top: [`ids`]/[`types`]/[`error`]/[`clock`] are shared
//! leaves; [`bridge`] < [`fusion`] < [`dryback`] < [`zone`] < [`sequencer`] <
//! [`coordinator`]. [`config`] sits beside `bridge` (it resolves
//! [`config::ZoneTopology`] into typed entity handles) and is depended on by
//! every layer above it.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dryback;
pub mod error;
pub mod fusion;
pub mod ids;
pub mod persistence;
pub mod sequencer;
pub mod types;
pub mod zone;

pub use coordinator::Coordinator;
pub use error::{EngineError, EngineResult};
