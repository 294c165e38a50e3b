use serde::Serialize;

/// Running min/max/sum/count for one channel in watch mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RpmStats {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl RpmStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, rpm: f64) {
        if self.count == 0 {
            self.min = rpm;
            self.max = rpm;
        } else {
            self.min = self.min.min(rpm);
            self.max = self.max.max(rpm);
        }
        self.sum += rpm;
        self.count += 1;
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Average of all updates, `0.0` before the first one.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
