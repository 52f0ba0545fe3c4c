use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic session time in seconds. Timers, simulated decks and the
/// automation scheduler all read time through this so tests can drive it.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-advanced clock. Stored as whole microseconds so repeated 80 ms
/// steps land on exact values.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, secs: f64) {
        let delta = (secs.max(0.0) * 1_000_000.0).round() as u64;
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, secs: f64) {
        let at = (secs.max(0.0) * 1_000_000.0).round() as u64;
        self.micros.store(at, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
