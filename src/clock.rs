use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Source of time and of delays. The polling loop, the calibrators and the sensor driver all
/// go through this so tests can run without real time passing.
pub trait Clock {
    /// Wall-clock time, for display only. May jump in either direction.
    fn now(&self) -> DateTime<Utc>;

    /// Time since a fixed point in the past. Never decreases, so intervals are measured
    /// with this.
    fn monotonic(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        // shared by all instances so stamps from different handles are comparable
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}
