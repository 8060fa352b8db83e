// src/utils/time.rs
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Source of the deliberate blocking stalls in hardware sequences
///
/// Injected so tests can observe the requested stall without waiting it out.
pub trait Clock: Send {
    fn sleep(&self, duration: Duration);
}

/// Clock that really blocks the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock for deterministic testing; records stalls instead of blocking
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    stalls: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stall requested so far
    pub fn stalls(&self) -> Vec<Duration> {
        self.stalls.lock().clone()
    }

    pub fn total_stalled(&self) -> Duration {
        self.stalls.lock().iter().sum()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.stalls.lock().push(duration);
    }
}

/// Convert a millisecond setting into a `Duration`
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Split a duration into whole minutes and remaining seconds for display
pub fn minutes_seconds(duration: Duration) -> (u64, u64) {
    let secs = duration.as_secs();
    (secs / 60, secs % 60)
}
