//! Read-only RadioDJ now-playing monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioDjConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RadioDjConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            poll_interval_ms: 5000,
            timeout_ms: 6000,
        }
    }
}

/// What RadioDJ reports as on air. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NowPlaying {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f64>,
    pub elapsed: Option<f64>,
}

impl NowPlaying {
    pub fn remaining(&self) -> Option<f64> {
        Some((self.duration? - self.elapsed.unwrap_or(0.0)).max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct RadioDjClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RadioDjClient {
    /// `None` unless both a base URL and an API key are configured.
    pub fn from_config(config: &RadioDjConfig) -> Result<Option<Self>, String> {
        if !config.enabled || config.base_url.is_empty() || config.api_key.is_empty() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| format!("Failed to build RadioDJ client: {}", e))?;
        Ok(Some(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }))
    }

    pub fn now_playing_url(&self) -> String {
        format!("{}/nowplaying", self.base_url)
    }

    async fn fetch(&self) -> Result<NowPlaying, String> {
        let resp = self
            .client
            .get(self.now_playing_url())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| format!("RadioDJ poll failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("RadioDJ returned HTTP {}", resp.status()));
        }
        resp.json::<NowPlaying>()
            .await
            .map_err(|e| format!("RadioDJ JSON parse error: {e}"))
    }

    /// Current on-air metadata. Failures are logged and yield `None`.
    pub async fn now_playing(&self) -> Option<NowPlaying> {
        match self.fetch().await {
            Ok(np) => Some(np),
            Err(e) => {
                log::warn!("[radiodj] {}", e);
                None
            }
        }
    }
}
