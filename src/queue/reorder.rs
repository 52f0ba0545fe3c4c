//! Drag-and-drop rules for the operator's queue list.
//!
//! Stop markers split the queue into segments. An item can only move
//! within its own segment, and it drags the overlays that trail it.

use super::item::QueueItem;

/// Stop markers and overlay-kind items stay where they are.
pub fn is_draggable(item: &QueueItem) -> bool {
    !item.is_stop() && !item.is_overlay_eligible()
}

/// Half-open `[start, end)` range of the stop-delimited segment holding
/// `index`. `end` may equal `items.len()`.
pub fn segment_bounds(items: &[QueueItem], index: usize) -> (usize, usize) {
    let start = items[..index.min(items.len())]
        .iter()
        .rposition(QueueItem::is_stop)
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = items
        .iter()
        .enumerate()
        .skip(index + 1)
        .find(|(_, item)| item.is_stop())
        .map(|(i, _)| i)
        .unwrap_or(items.len());
    (start, end)
}

/// Number of items that move together when dragging `index`: the item
/// itself plus the contiguous overlays right after it.
pub fn group_len(items: &[QueueItem], index: usize) -> usize {
    1 + items
        .iter()
        .skip(index + 1)
        .take_while(|item| !item.is_stop() && item.is_overlay_eligible())
        .count()
}

/// `drop_index` is an insertion slot in `0..=items.len()`.
pub fn can_drop_at(items: &[QueueItem], drag_index: usize, drop_index: usize) -> bool {
    if drag_index >= items.len() || drop_index > items.len() {
        return false;
    }
    let (start, end) = segment_bounds(items, drag_index);
    if drop_index < start || drop_index > end {
        return false;
    }
    // Dropping in front of an overlay would split it from its lead item.
    if let Some(target) = items.get(drop_index) {
        if target.is_overlay_eligible() && !target.is_stop() {
            return false;
        }
    }
    let len = group_len(items, drag_index);
    !(drop_index > drag_index && drop_index < drag_index + len)
}

/// Move the group at `drag_index` to the slot `drop_index`. Returns false
/// and leaves `items` untouched when the drag is not allowed.
pub fn reorder(items: &mut Vec<QueueItem>, drag_index: usize, drop_index: usize) -> bool {
    if drag_index >= items.len() || !is_draggable(&items[drag_index]) {
        return false;
    }
    if !can_drop_at(items, drag_index, drop_index) {
        return false;
    }
    let len = group_len(items, drag_index);
    let group: Vec<QueueItem> = items.drain(drag_index..drag_index + len).collect();
    let insert_at = if drop_index > drag_index {
        drop_index - len
    } else {
        drop_index
    };
    items.splice(insert_at..insert_at, group);
    true
}
