//! In-process bridge double. Grounded on the teacher's `InMemoryDAL`
//! (`storage::persistence`): a plain map behind a lock, used wherever the
//! engine runs without a real host integration — the CLI's `inspect`
//! command, and every test in this crate.

use super::{DomainEvent, EntityBridge, EntityRef, EntityValue, WriteCommand, WriteQueue};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

struct Inner {
    values: Mutex<HashMap<String, EntityValue>>,
    channels: Mutex<HashMap<String, broadcast::Sender<EntityValue>>>,
    events: broadcast::Sender<DomainEvent>,
    queue: WriteQueue,
    published_events: Mutex<Vec<DomainEvent>>,
}

/// In-memory [`EntityBridge`]. `set` pushes onto a bounded queue; a
/// background task (spawned by [`MemoryBridge::new`]) drains it and applies
/// writes to the map, exercising the same backpressure path a real adapter
/// would.
pub struct MemoryBridge {
    inner: std::sync::Arc<Inner>,
    cancel: CancellationToken,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::with_capacity(super::WRITE_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = std::sync::Arc::new(Inner {
            values: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            events: events_tx,
            queue: WriteQueue::new(capacity),
            published_events: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        spawn_write_worker(inner.clone(), cancel.clone());
        Self { inner, cancel }
    }

    /// Seeds an entity's value directly (test setup helper), bypassing the
    /// write queue and not notifying subscribers.
    pub fn seed(&self, name: &str, value: EntityValue) {
        self.inner.values.lock().unwrap_or_else(|p| p.into_inner()).insert(name.to_string(), value);
    }

    /// Returns every event published so far, for assertions in tests.
    pub fn published_events(&self) -> Vec<DomainEvent> {
        self.inner.published_events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.events.subscribe()
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.queue.len()
    }
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl EntityBridge for MemoryBridge {
    fn get(&self, entity: &EntityRef) -> (EntityValue, bool) {
        let values = self.inner.values.lock().unwrap_or_else(|p| p.into_inner());
        match values.get(entity.name.as_ref()) {
            Some(v) if v.is_present() => (v.clone(), true),
            Some(v) => (v.clone(), false),
            None => (EntityValue::Unknown, false),
        }
    }

    fn set(&self, entity: &EntityRef, value: EntityValue) {
        let cmd = WriteCommand { entity: entity.clone(), value };
        if let Some(dropped) = self.inner.queue.push(cmd) {
            tracing::warn!(entity = %dropped.entity, "bridge write queue overflow, dropped oldest write");
        }
    }

    fn subscribe(&self, entity: &EntityRef) -> broadcast::Receiver<EntityValue> {
        let mut channels = self.inner.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(entity.name.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn publish_event(&self, event: DomainEvent) {
        self.inner.published_events.lock().unwrap_or_else(|p| p.into_inner()).push(event.clone());
        let _ = self.inner.events.send(event);
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn spawn_write_worker(inner: std::sync::Arc<Inner>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                () = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
            }
            while let Some(cmd) = inner.queue.pop() {
                apply_write(&inner, cmd);
            }
        }
    });
}

fn apply_write(inner: &Inner, cmd: WriteCommand) {
    {
        let mut values = inner.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(cmd.entity.name.to_string(), cmd.value.clone());
    }
    let channels = inner.channels.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(tx) = channels.get(cmd.entity.name.as_ref()) {
        let _ = tx.send(cmd.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips_after_worker_drains() {
        let bridge = MemoryBridge::new();
        let entity = EntityRef::switch("switch.pump");
        bridge.set(&entity, EntityValue::Bool(true));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (value, ok) = bridge.get(&entity);
        assert!(ok);
        assert_eq!(value, EntityValue::Bool(true));
    }

    #[tokio::test]
    async fn get_numeric_falls_back_on_absent() {
        let bridge = MemoryBridge::new();
        let entity = EntityRef::sensor("sensor.vwc1");
        assert_eq!(bridge.get_numeric(&entity, 12.5), 12.5);
    }

    #[tokio::test]
    async fn subscribe_sees_externally_applied_write() {
        let bridge = MemoryBridge::new();
        let entity = EntityRef::switch("switch.main");
        let mut rx = bridge.subscribe(&entity);
        bridge.set(&entity, EntityValue::Bool(true));
        let value = rx.recv().await.unwrap();
        assert_eq!(value, EntityValue::Bool(true));
    }

    #[test]
    fn publish_event_records_for_inspection() {
        let bridge = MemoryBridge::new();
        bridge.publish_event(DomainEvent::PersistenceDegraded { reason: "disk full".into() });
        assert_eq!(bridge.published_events().len(), 1);
    }
}
