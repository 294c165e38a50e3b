use crate::edge::EdgeError;
use crate::output::Reading;

/// Hook for telemetry. Called from worker threads and the coordinator, so
/// implementations must be cheap and thread-safe.
pub trait RunObserver: Send + Sync {
    fn sample_completed(&self, _line: u32, _rpm: f64, _edges: u64) {}
    fn sample_interrupted(&self, _line: u32) {}
    fn acquisition_failed(&self, _line: u32, _error: &EdgeError) {}
    fn channel_faulted(&self, _line: u32, _error: &EdgeError) {}
    fn round_emitted(&self, _readings: &[Reading]) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
