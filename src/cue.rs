use serde::{Deserialize, Serialize};

/// Seconds before `loop_out` at which the loop jumps back, so a coarse
/// polling tick cannot step over the loop point.
pub const LOOP_TOLERANCE_SECS: f64 = 0.05;

/// Named cue offsets for one media item, in seconds from the start of the
/// media. Every cue is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CuePoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cue_in: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_in: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_out: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_next: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outro: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cue_out: Option<f64>,
}

/// A cue offset is usable only when it is finite and strictly positive.
/// A zero cue means "not set" for trigger purposes.
fn usable(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

impl CuePoints {
    pub fn intro(&self) -> Option<f64> {
        usable(self.intro)
    }

    pub fn outro(&self) -> Option<f64> {
        usable(self.outro)
    }

    pub fn start_next(&self) -> Option<f64> {
        usable(self.start_next)
    }

    pub fn cue_out(&self) -> Option<f64> {
        usable(self.cue_out)
    }

    /// `(loop_in, loop_out)` when both ends are present and ordered.
    pub fn loop_range(&self) -> Option<(f64, f64)> {
        match (self.loop_in, self.loop_out) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() && a >= 0.0 && b > a => {
                Some((a, b))
            }
            _ => None,
        }
    }

    pub fn has_loop(&self) -> bool {
        self.loop_range().is_some()
    }

    /// Reject cue sets that cannot be acted on. Out-of-order intro,
    /// start_next and outro are accepted as-is.
    pub fn validate(&self) -> Result<(), String> {
        let named = [
            ("cue_in", self.cue_in),
            ("intro", self.intro),
            ("loop_in", self.loop_in),
            ("loop_out", self.loop_out),
            ("start_next", self.start_next),
            ("outro", self.outro),
            ("cue_out", self.cue_out),
        ];
        for (name, value) in named {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("Cue '{name}' must be a non-negative offset, got {v}"));
                }
            }
        }

        match (self.loop_in, self.loop_out) {
            (Some(_), None) | (None, Some(_)) => {
                return Err("loop_in and loop_out must be set together".to_string());
            }
            (Some(a), Some(b)) if b <= a => {
                return Err(format!("loop_out ({b}) must be after loop_in ({a})"));
            }
            _ => {}
        }

        if let (Some(a), Some(b)) = (self.cue_in, self.cue_out) {
            if b <= a {
                return Err(format!("cue_out ({b}) must be after cue_in ({a})"));
            }
        }
        Ok(())
    }

    /// Seconds until the item should hand over to the next one.
    ///
    /// Uses `start_next` when it is set and something is queued behind the
    /// item, otherwise the natural end of the media.
    pub fn remaining(&self, position: f64, duration: f64, queue_has_next: bool) -> f64 {
        let end = match self.start_next() {
            Some(sn) if queue_has_next => sn,
            _ => duration,
        };
        (end - position).max(0.0)
    }

    pub fn intro_remaining(&self, position: f64) -> f64 {
        self.intro().map(|i| (i - position).max(0.0)).unwrap_or(0.0)
    }

    pub fn outro_remaining(&self, position: f64) -> f64 {
        self.outro().map(|o| (o - position).max(0.0)).unwrap_or(0.0)
    }

    /// Where to seek when looping is enabled and the position is within
    /// `tolerance` of the loop end.
    pub fn loop_target(&self, position: f64, tolerance: f64) -> Option<f64> {
        let (loop_in, loop_out) = self.loop_range()?;
        if position >= loop_out - tolerance {
            Some(loop_in)
        } else {
            None
        }
    }

    /// True once playback has crossed the `start_next` cue.
    pub fn start_next_reached(&self, position: f64) -> bool {
        self.start_next().is_some_and(|sn| position >= sn)
    }
}

/// Countdown readout shown to the operator for the current item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CueCountdown {
    pub position: f64,
    pub duration: f64,
    pub remaining: f64,
    pub intro_remaining: f64,
    pub outro_remaining: f64,
    pub remaining_urgent: bool,
    pub intro_urgent: bool,
    pub outro_urgent: bool,
}

impl CueCountdown {
    pub fn compute(
        cues: &CuePoints,
        position: f64,
        duration: f64,
        queue_has_next: bool,
        thresholds: UrgencyThresholds,
    ) -> Self {
        let remaining = cues.remaining(position, duration, queue_has_next);
        let intro_remaining = cues.intro_remaining(position);
        let outro_remaining = cues.outro_remaining(position);
        let within = |v: f64, limit: f64| v > 0.0 && v <= limit;
        Self {
            position,
            duration,
            remaining,
            intro_remaining,
            outro_remaining,
            remaining_urgent: within(remaining, thresholds.remaining_secs),
            intro_urgent: within(intro_remaining, thresholds.cue_secs),
            outro_urgent: within(outro_remaining, thresholds.cue_secs),
        }
    }

    /// `MM:SS.cc` rendering of the remaining time.
    pub fn remaining_display(&self) -> String {
        let total = self.remaining.max(0.0);
        let minutes = (total / 60.0).floor() as u64;
        let seconds = (total % 60.0).floor() as u64;
        let centis = ((total - total.floor()) * 100.0).floor() as u64;
        format!("{minutes:02}:{seconds:02}.{centis:02}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UrgencyThresholds {
    /// Intro/outro badges flash at or below this many seconds.
    pub cue_secs: f64,
    /// The main countdown turns red at or below this many seconds.
    pub remaining_secs: f64,
}

impl Default for UrgencyThresholds {
    fn default() -> Self {
        Self {
            cue_secs: 8.0,
            remaining_secs: 15.0,
        }
    }
}
