use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic reference point for one measurement phase.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Monotonic seconds since start, as a float.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Time left until `length` has passed since start; zero once it has.
    pub fn remaining(&self, length: Duration) -> Duration {
        length.saturating_sub(self.elapsed())
    }

    /// Wall-clock seconds since the Unix epoch (for output records only).
    pub fn unix_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}
