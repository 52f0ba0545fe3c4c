use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cue::CuePoints;

/// Queue identity. Assigned on enqueue and never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Music,
    Psa,
    Imaging,
    #[serde(rename = "voicetrack")]
    VoiceTrack,
    Stop,
    Overlay,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Psa => "psa",
            Self::Imaging => "imaging",
            Self::VoiceTrack => "voicetrack",
            Self::Stop => "stop",
            Self::Overlay => "overlay",
        }
    }

    /// Resolve a kind from the loosely-typed fields library payloads carry.
    /// An explicit kind wins, then the stop flag, then category keywords.
    pub fn resolve(kind: Option<&str>, category: Option<&str>, stop: bool) -> Self {
        let explicit = kind.map(|k| k.trim().to_ascii_lowercase());
        match explicit.as_deref() {
            Some("music") => return Self::Music,
            Some("psa") => return Self::Psa,
            Some("imaging") => return Self::Imaging,
            Some("voicetrack") | Some("voice_track") => return Self::VoiceTrack,
            Some("stop") => return Self::Stop,
            Some("overlay") => return Self::Overlay,
            _ => {}
        }
        if stop {
            return Self::Stop;
        }
        let category = category.map(|c| c.to_ascii_lowercase()).unwrap_or_default();
        if category.contains("voice") {
            Self::VoiceTrack
        } else if category.contains("imaging") {
            Self::Imaging
        } else if category.contains("psa") {
            Self::Psa
        } else {
            Self::Music
        }
    }

    /// Voice tracks and overlays play on the overlay deck instead of being
    /// crossfaded on the main decks.
    pub fn is_overlay_eligible(self) -> bool {
        matches!(self, Self::VoiceTrack | Self::Overlay)
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A playable (or marker) entry in the show queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Seconds. Unknown until a deck has loaded the media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cues: Option<CuePoints>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub stop: bool,
}

impl QueueItem {
    pub fn is_stop(&self) -> bool {
        self.stop || self.kind == ItemKind::Stop
    }

    pub fn is_overlay_eligible(&self) -> bool {
        self.kind.is_overlay_eligible()
    }

    pub fn cues(&self) -> CuePoints {
        self.cues.unwrap_or_default()
    }
}

/// Loosely-typed input for a new queue entry, as it arrives from the
/// library browser, the voice-track recorder or a show file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDraft {
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub cues: Option<CuePoints>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub stop: bool,
}

impl ItemDraft {
    pub fn new(title: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            title: Some(title.into()),
            kind: Some(kind.as_str().to_string()),
            ..Default::default()
        }
    }

    /// The operator's "STOP" marker.
    pub fn stop_marker() -> Self {
        Self {
            title: Some("STOP".to_string()),
            kind: Some("stop".to_string()),
            stop: true,
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    pub fn with_cues(mut self, cues: CuePoints) -> Self {
        self.cues = Some(cues);
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    /// Resolve the draft into a typed item carrying `id`.
    pub(crate) fn into_item(self, id: ItemId) -> QueueItem {
        let kind = ItemKind::resolve(self.kind.as_deref(), self.category.as_deref(), self.stop);
        let cues = match self.cues {
            Some(c) => match c.validate() {
                Ok(()) => Some(c),
                Err(e) => {
                    log::warn!("Dropping cues for queue item {}: {}", id, e);
                    None
                }
            },
            None => None,
        };
        let duration = self.duration.filter(|d| d.is_finite() && *d > 0.0);
        QueueItem {
            id,
            title: self.title.unwrap_or_else(|| "Untitled".to_string()),
            artist: self.artist,
            duration,
            url: self.url,
            stop: kind == ItemKind::Stop,
            kind,
            cues,
            metadata: self.metadata,
        }
    }
}
