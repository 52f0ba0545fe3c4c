use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::{ItemDraft, ItemId, QueueItem};
use super::reorder;

/// Serializable view of the queue plus the item on air.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queue: Vec<QueueItem>,
    #[serde(default)]
    pub current: Option<QueueItem>,
    pub saved_at: DateTime<Utc>,
}

/// Ordered show queue plus the "now playing" slot.
///
/// The manager is the only place ordering changes. Playback consumes from
/// the head through [`take_through`](QueueManager::take_through) and
/// [`take_head`](QueueManager::take_head).
#[derive(Debug)]
pub struct QueueManager {
    items: Vec<QueueItem>,
    current: Option<QueueItem>,
    next_id: u64,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            current: None,
            next_id: 1,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn head(&self) -> Option<&QueueItem> {
        self.items.first()
    }

    pub fn get(&self, index: usize) -> Option<&QueueItem> {
        self.items.get(index)
    }

    pub fn position_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<ItemId> {
        self.current.as_ref().map(|i| i.id)
    }

    /// First queued voice track or overlay, the talk-up candidate.
    pub fn first_overlay_eligible(&self) -> Option<&QueueItem> {
        self.items.iter().find(|i| !i.is_stop() && i.is_overlay_eligible())
    }

    /// First queued item that would play on a main deck.
    pub fn first_primary(&self) -> Option<&QueueItem> {
        self.items.iter().find(|i| !i.is_stop() && !i.is_overlay_eligible())
    }

    /// True when the queue was empty and nothing is on air, which is the
    /// condition for auto-starting a freshly enqueued item.
    pub fn is_idle(&self) -> bool {
        self.items.is_empty() && self.current.is_none()
    }

    // ── Mutations ─────────────────────────────────────────────────────────

    /// Insert a new item at `position` (clamped, default tail). A fresh id
    /// is always assigned, so re-enqueueing the same media gets a new one.
    pub fn enqueue(&mut self, draft: ItemDraft, position: Option<usize>) -> QueueItem {
        let id = ItemId(self.next_id);
        self.next_id += 1;
        let item = draft.into_item(id);
        let at = position.unwrap_or(self.items.len()).min(self.items.len());
        self.items.insert(at, item.clone());
        log::debug!("Enqueued {} '{}' at {}", item.kind, item.title, at);
        item
    }

    /// Remove by identity. Absent ids are a no-op.
    pub fn dequeue(&mut self, id: ItemId) -> Option<QueueItem> {
        let idx = self.position_of(id)?;
        Some(self.items.remove(idx))
    }

    pub fn move_item(&mut self, id: ItemId, position: usize) -> bool {
        let Some(item) = self.dequeue(id) else {
            return false;
        };
        let at = position.min(self.items.len());
        self.items.insert(at, item);
        true
    }

    /// Operator drag of `id` to the insertion slot `drop_index`.
    pub fn drag(&mut self, id: ItemId, drop_index: usize) -> bool {
        match self.position_of(id) {
            Some(idx) => reorder::reorder(&mut self.items, idx, drop_index),
            None => false,
        }
    }

    /// Pop stop markers off the head. Returns how many were consumed.
    pub fn shift_past_stops(&mut self) -> usize {
        let n = self.items.iter().take_while(|i| i.is_stop()).count();
        self.items.drain(..n);
        n
    }

    pub fn take_head(&mut self) -> Option<QueueItem> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Drop everything before `index` and remove the item at `index`,
    /// returning it.
    pub fn take_through(&mut self, index: usize) -> Option<QueueItem> {
        if index >= self.items.len() {
            return None;
        }
        let mut removed = self.items.drain(..=index);
        removed.next_back()
    }

    pub fn set_current(&mut self, item: QueueItem) {
        self.current = Some(item);
    }

    pub fn take_current(&mut self) -> Option<QueueItem> {
        self.current.take()
    }

    pub fn clear(&mut self) -> Vec<QueueItem> {
        self.current = None;
        std::mem::take(&mut self.items)
    }

    /// Drop the queued items but keep the current one.
    pub fn clear_queued(&mut self) -> Vec<QueueItem> {
        std::mem::take(&mut self.items)
    }

    // ── Snapshot / restore ────────────────────────────────────────────────

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue: self.items.clone(),
            current: self.current.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Replace the queue with `snapshot`. The saved current item goes back
    /// to the head, nothing is on air afterwards, and id generation
    /// continues past the highest restored id.
    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        let QueueSnapshot { mut queue, current, .. } = snapshot;
        if let Some(cur) = current {
            if !queue.iter().any(|i| i.id == cur.id) {
                queue.insert(0, cur);
            }
        }
        // Keep ids unique even if a snapshot was edited by hand.
        let mut seen = std::collections::HashSet::new();
        queue.retain(|i| seen.insert(i.id));

        let max_id = queue.iter().map(|i| i.id.0).max().unwrap_or(0);
        self.next_id = self.next_id.max(max_id + 1);
        self.items = queue;
        self.current = None;
        log::info!("Restored queue with {} item(s)", self.items.len());
    }
}
