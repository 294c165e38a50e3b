use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on how long any blocking wait may go without looking at the
/// stop flag.
pub const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Process-wide cancellation flag.
///
/// Created once at startup and handed by clone to every thread that has to
/// observe it. It is set at most once (further calls are no-ops) and never
/// cleared. Reads never take a lock.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that actually
    /// flipped the flag.
    pub fn trigger(&self) -> bool {
        !self.inner.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Runs `wait` in `trials` parallel trials, each stopped at a different
/// point of the poll interval, and returns the 99th percentile of the delay
/// between the trigger and `wait` returning.
#[cfg(test)]
pub(crate) fn stop_latency_p99(trials: u32, wait: fn(&StopFlag)) -> Duration {
    use std::thread;
    use std::time::Instant;

    let handles: Vec<_> = (0..trials)
        .map(|trial| {
            thread::spawn(move || {
                let stop = StopFlag::new();
                let remote = stop.clone();
                let offset = Duration::from_millis(20) + CANCEL_POLL * (trial % 10) / 10
                    + Duration::from_millis(u64::from(trial % 7));
                let trigger = thread::spawn(move || {
                    thread::sleep(offset);
                    let at = Instant::now();
                    remote.trigger();
                    at
                });
                wait(&stop);
                let returned = Instant::now();
                returned.saturating_duration_since(trigger.join().unwrap())
            })
        })
        .collect();
    let mut latencies: Vec<Duration> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    latencies.sort();
    latencies[(latencies.len() * 99).div_ceil(100) - 1]
}
