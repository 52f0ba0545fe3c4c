use std::sync::{Arc, Mutex};

use super::item::{ItemId, QueueItem};
use super::manager::QueueSnapshot;

/// Queue persistence collaborator. Calls are mirrored after the local
/// queue has already changed; a failure never rolls the local queue back.
pub trait QueueStore: Send {
    fn enqueue(&mut self, item: &QueueItem, position: usize) -> Result<(), String>;
    fn dequeue(&mut self, id: ItemId) -> Result<(), String>;
    fn move_item(&mut self, id: ItemId, position: usize) -> Result<(), String>;
    fn fetch_snapshot(&mut self) -> Result<Option<QueueSnapshot>, String>;
}

/// One mirrored operation, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Enqueue { id: ItemId, position: usize },
    Dequeue { id: ItemId },
    Move { id: ItemId, position: usize },
}

/// In-process store. Clones share the same log so a test can hand one
/// clone to the session and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    ops: Arc<Mutex<Vec<StoreOp>>>,
    snapshot: Arc<Mutex<Option<QueueSnapshot>>>,
    fail: bool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: QueueSnapshot) -> Self {
        let store = Self::default();
        if let Ok(mut slot) = store.snapshot.lock() {
            *slot = Some(snapshot);
        }
        store
    }

    /// Every call fails, for exercising the swallow-and-continue path.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn record(&self, op: StoreOp) -> Result<(), String> {
        if self.fail {
            return Err(format!("Queue store unavailable for {:?}", op));
        }
        self.ops
            .lock()
            .map_err(|e| format!("Queue store lock poisoned: {}", e))?
            .push(op);
        Ok(())
    }
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(&mut self, item: &QueueItem, position: usize) -> Result<(), String> {
        self.record(StoreOp::Enqueue { id: item.id, position })
    }

    fn dequeue(&mut self, id: ItemId) -> Result<(), String> {
        self.record(StoreOp::Dequeue { id })
    }

    fn move_item(&mut self, id: ItemId, position: usize) -> Result<(), String> {
        self.record(StoreOp::Move { id, position })
    }

    fn fetch_snapshot(&mut self) -> Result<Option<QueueSnapshot>, String> {
        if self.fail {
            return Err("Queue store unavailable".to_string());
        }
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .map_err(|e| format!("Queue store lock poisoned: {}", e))
    }
}
