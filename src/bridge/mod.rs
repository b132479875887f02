//! Entity Bridge: the single chokepoint between the engine and the host
//! automation platform (spec.md §4.1).
//!
//! Grounded on the teacher's `storage::persistence::PersistenceLayer`
//! trait-with-in-memory-impl split: a small object-safe trait so production
//! code and tests share one API, with [`memory::MemoryBridge`] as the
//! in-process double used by the CLI's `inspect` path and by tests.

mod events;
mod memory;
mod value;

pub use events::DomainEvent;
pub use memory::MemoryBridge;
pub use value::{EntityKind, EntityRef, EntityValue};

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Capacity of the bounded write queue (spec.md §4.1: "bounded backpressure,
/// dropped oldest-first on overflow").
pub const WRITE_QUEUE_CAPACITY: usize = crate::config::defaults::BRIDGE_WRITE_QUEUE_CAPACITY;

/// Single-chokepoint adapter to the host automation platform.
///
/// `set` is fire-and-forget: it enqueues the write and returns immediately.
/// Failures surface later as a [`DomainEvent::PersistenceDegraded`]-style
/// soft signal or are simply retried; callers never await host I/O here.
pub trait EntityBridge: Send + Sync {
    /// Last known value for `entity`; `ok=false` when absent or a sentinel.
    fn get(&self, entity: &EntityRef) -> (EntityValue, bool);

    /// Numeric coercion with a default for absent/non-numeric/sentinel
    /// values.
    fn get_numeric(&self, entity: &EntityRef, default: f64) -> f64 {
        let (value, ok) = self.get(entity);
        if ok {
            value.as_numeric(default)
        } else {
            default
        }
    }

    /// Boolean coercion with a default for absent/sentinel values, used by
    /// the sequencer's operator-facing enable switches.
    fn get_bool(&self, entity: &EntityRef, default: bool) -> bool {
        let (value, ok) = self.get(entity);
        if !ok {
            return default;
        }
        match value {
            EntityValue::Bool(b) => b,
            EntityValue::Number(n) => n != 0.0,
            EntityValue::Text(s) => s.eq_ignore_ascii_case("on") || s.eq_ignore_ascii_case("true"),
            EntityValue::Unknown => default,
        }
    }

    /// Queue a write. Never blocks the caller on host I/O.
    fn set(&self, entity: &EntityRef, value: EntityValue);

    /// Subscribe to externally produced changes for one entity. Ordering is
    /// preserved per entity, not globally.
    fn subscribe(&self, entity: &EntityRef) -> broadcast::Receiver<EntityValue>;

    /// Publish a domain event (phase change, shot executed, safety block).
    fn publish_event(&self, event: DomainEvent);

    fn backend_name(&self) -> &'static str;
}

/// One queued write. Confirmation and jittered-backoff retry (spec.md §7:
/// `writeMaxAttempts`) happen one layer up, in the sequencer's own actuation
/// steps, which read a write back and resubmit it on mismatch — this queue
/// only ever sees fresh, unconditional writes.
#[derive(Debug, Clone)]
pub struct WriteCommand {
    pub entity: EntityRef,
    pub value: EntityValue,
}

/// Bounded write queue shared by bridge implementations. Pushing past
/// capacity drops the oldest queued command and returns it so the caller can
/// log/emit a warning event.
pub struct WriteQueue {
    inner: Mutex<VecDeque<WriteCommand>>,
    capacity: usize,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    /// Pushes a command, evicting the oldest entry if at capacity.
    /// Returns the evicted command, if any.
    #[allow(clippy::missing_panics_doc)]
    pub fn push(&self, cmd: WriteCommand) -> Option<WriteCommand> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let evicted = if guard.len() >= self.capacity { guard.pop_front() } else { None };
        guard.push_back(cmd);
        evicted
    }

    pub fn pop(&self) -> Option<WriteCommand> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(name: &str) -> WriteCommand {
        WriteCommand { entity: EntityRef::switch(name), value: EntityValue::Bool(true) }
    }

    #[test]
    fn drops_oldest_on_overflow() {
        let q = WriteQueue::new(2);
        assert!(q.push(cmd("a")).is_none());
        assert!(q.push(cmd("b")).is_none());
        let evicted = q.push(cmd("c"));
        assert_eq!(evicted.unwrap().entity.name.as_ref(), "a");
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap().entity.name.as_ref(), "b");
        assert_eq!(q.pop().unwrap().entity.name.as_ref(), "c");
        assert!(q.pop().is_none());
    }
}
