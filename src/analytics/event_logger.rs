use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{ItemId, ItemKind, QueueItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEvent {
    Start,
    End,
    Insert,
}

impl PlaybackEvent {
    pub fn as_str(&self) -> &str {
        match self {
            PlaybackEvent::Start => "start",
            PlaybackEvent::End => "end",
            PlaybackEvent::Insert => "insert",
        }
    }
}

/// One row of the show log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackLogEntry {
    pub event: PlaybackEvent,
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<f64>,
    pub metadata: serde_json::Value,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl PlaybackLogEntry {
    pub fn new(event: PlaybackEvent, item: &QueueItem, reason: &str) -> Self {
        Self {
            event,
            item_id: item.id,
            kind: item.kind,
            title: item.title.clone(),
            artist: item.artist.clone(),
            duration: item.duration,
            metadata: serde_json::to_value(&item.metadata).unwrap_or_default(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Now-playing/log collaborator. Delivery is fire-and-forget.
pub trait EventSink: Send {
    fn emit(&self, entry: PlaybackLogEntry);
}

/// Keeps every entry in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    entries: Arc<Mutex<Vec<PlaybackLogEntry>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<PlaybackLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// `(event, item)` pairs in emission order.
    pub fn events(&self) -> Vec<(PlaybackEvent, ItemId)> {
        self.entries()
            .into_iter()
            .map(|e| (e.event, e.item_id))
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, entry: PlaybackLogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// POSTs each entry as JSON on the ambient tokio runtime.
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build event log client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl EventSink for HttpEventSink {
    fn emit(&self, entry: PlaybackLogEntry) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("No runtime for event log; dropped {} for {}", entry.event.as_str(), entry.item_id);
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        handle.spawn(async move {
            match client.post(&url).json(&entry).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    log::debug!("Event log rejected {}: HTTP {}", entry.event.as_str(), resp.status());
                }
                Ok(_) => {}
                Err(e) => log::debug!("Event log unreachable: {}", e),
            }
        });
    }
}

/// Ended items remembered so a late duplicate end (or start) is dropped.
const RETIRED_CAPACITY: usize = 64;

/// Emits start/end/insert for queue items, each at most once per item.
///
/// Bookkeeping for an item is released once its end is logged or it is
/// forgotten, so a long-running session does not accumulate entries.
pub struct PlaybackLogger {
    sink: Box<dyn EventSink>,
    emitted: HashMap<ItemId, HashSet<PlaybackEvent>>,
    retired: VecDeque<ItemId>,
}

impl PlaybackLogger {
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink,
            emitted: HashMap::new(),
            retired: VecDeque::with_capacity(RETIRED_CAPACITY),
        }
    }

    /// Drop what is known about an item that left the queue unplayed.
    pub fn forget(&mut self, id: ItemId) {
        self.emitted.remove(&id);
    }

    pub fn start(&mut self, item: &QueueItem, reason: &str) -> bool {
        self.log(PlaybackEvent::Start, item, reason)
    }

    pub fn end(&mut self, item: &QueueItem, reason: &str) -> bool {
        self.log(PlaybackEvent::End, item, reason)
    }

    pub fn insert(&mut self, item: &QueueItem, reason: &str) -> bool {
        self.log(PlaybackEvent::Insert, item, reason)
    }

    /// Stop markers never produce playback events.
    fn log(&mut self, event: PlaybackEvent, item: &QueueItem, reason: &str) -> bool {
        if item.is_stop() {
            if event != PlaybackEvent::Insert {
                return false;
            }
        } else if self.retired.contains(&item.id)
            || !self.emitted.entry(item.id).or_default().insert(event)
        {
            return false;
        }
        log::info!("[playback] {} '{}' ({}, {})", event.as_str(), item.title, item.kind, reason);
        self.sink.emit(PlaybackLogEntry::new(event, item, reason));
        if event == PlaybackEvent::End {
            self.retire(item.id);
        }
        true
    }

    fn retire(&mut self, id: ItemId) {
        self.emitted.remove(&id);
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ItemDraft;

    fn item(id: u64) -> QueueItem {
        ItemDraft::new("Song", ItemKind::Music)
            .with_artist("Band")
            .into_item(ItemId(id))
    }

    #[test]
    fn each_event_fires_once_per_item() {
        let sink = MemoryEventSink::new();
        let mut logger = PlaybackLogger::new(Box::new(sink.clone()));
        let a = item(1);
        assert!(logger.insert(&a, "manual"));
        assert!(logger.start(&a, "auto"));
        assert!(!logger.start(&a, "auto"));
        assert!(logger.end(&a, "ended"));
        assert!(!logger.end(&a, "skip"));
        assert_eq!(
            sink.events(),
            vec![
                (PlaybackEvent::Insert, ItemId(1)),
                (PlaybackEvent::Start, ItemId(1)),
                (PlaybackEvent::End, ItemId(1)),
            ]
        );
        assert_eq!(sink.entries()[2].reason, "ended");
    }

    #[test]
    fn ended_items_release_their_bookkeeping() {
        let sink = MemoryEventSink::new();
        let mut logger = PlaybackLogger::new(Box::new(sink.clone()));
        for id in 1..=200 {
            let it = item(id);
            logger.insert(&it, "manual");
            logger.start(&it, "auto");
            logger.end(&it, "ended");
        }
        assert!(logger.emitted.is_empty());
        assert_eq!(logger.retired.len(), RETIRED_CAPACITY);

        let last = item(200);
        assert!(!logger.end(&last, "skip"));
        assert!(!logger.start(&last, "auto"));
        assert_eq!(sink.events().len(), 600);
    }

    #[test]
    fn forgotten_items_are_released() {
        let mut logger = PlaybackLogger::new(Box::new(MemoryEventSink::new()));
        let a = item(1);
        logger.insert(&a, "manual");
        logger.forget(a.id);
        assert!(logger.emitted.is_empty());

        let stop = ItemDraft::stop_marker().into_item(ItemId(2));
        logger.insert(&stop, "manual");
        assert!(logger.emitted.is_empty());
    }

    #[test]
    fn stop_markers_have_no_playback_events() {
        let sink = MemoryEventSink::new();
        let mut logger = PlaybackLogger::new(Box::new(sink.clone()));
        let stop = ItemDraft::stop_marker().into_item(ItemId(5));
        assert!(!logger.start(&stop, "auto"));
        assert!(!logger.end(&stop, "auto"));
        assert!(logger.insert(&stop, "manual"));
        assert_eq!(sink.events(), vec![(PlaybackEvent::Insert, ItemId(5))]);
    }

    #[test]
    fn entry_serializes_with_rfc3339_timestamp() {
        let entry = PlaybackLogEntry::new(PlaybackEvent::Start, &item(2), "auto");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"], "start");
        assert_eq!(json["kind"], "music");
        assert_eq!(json["artist"], "Band");
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn http_sink_without_runtime_drops_quietly() {
        let sink = HttpEventSink::new("http://127.0.0.1:9/log", Duration::from_millis(50)).unwrap();
        sink.emit(PlaybackLogEntry::new(PlaybackEvent::End, &item(3), "ended"));
    }
}
