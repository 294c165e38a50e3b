//! Two-phase timed edge counting.
//!
//! A sample runs a discarded warmup phase followed by a counted measurement
//! phase on one [`EdgeSource`]. How a phase waits (plain polling or a kernel
//! timer multiplexed with the edge descriptor) is a [`PhaseWait`] strategy
//! chosen once per worker.

use crate::cancel::{StopFlag, CANCEL_POLL};
use crate::edge::{EdgeError, EdgeSource, EdgeWait};
use crate::plan::ChannelConfig;
use crate::timebase::TimeBase;
use log::debug;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase timer fired. `edges` is zero for uncounted phases.
    Completed { edges: u64 },
    /// The stop flag was observed before the timer fired.
    Interrupted,
}

/// Blocks for one timed phase, consuming edges as they arrive.
pub trait PhaseWait: Send {
    fn run_phase(
        &mut self,
        source: &mut dyn EdgeSource,
        length: Duration,
        stop: &StopFlag,
        counting: bool,
    ) -> Result<PhaseOutcome, EdgeError>;

    fn name(&self) -> &'static str;
}

/// Portable strategy: bounded waits on the edge source, re-checking elapsed
/// monotonic time and the stop flag on every iteration.
#[derive(Debug, Clone, Copy)]
pub struct PollingWait {
    interval: Duration,
}

impl PollingWait {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.min(CANCEL_POLL),
        }
    }
}

impl Default for PollingWait {
    fn default() -> Self {
        Self::new(CANCEL_POLL)
    }
}

impl PhaseWait for PollingWait {
    fn run_phase(
        &mut self,
        source: &mut dyn EdgeSource,
        length: Duration,
        stop: &StopFlag,
        counting: bool,
    ) -> Result<PhaseOutcome, EdgeError> {
        let clock = TimeBase::new();
        let mut edges = 0u64;
        loop {
            if stop.is_set() {
                return Ok(PhaseOutcome::Interrupted);
            }
            let remaining = clock.remaining(length);
            if remaining.is_zero() {
                return Ok(PhaseOutcome::Completed { edges });
            }
            if source.wait_for_edge(remaining.min(self.interval))? == EdgeWait::Ready {
                let consumed = source.consume_edge()?;
                if counting {
                    edges += consumed;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}

/// Result of one sampler invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Revolutions per minute, never negative.
    Rate(f64),
    /// Cancellation was observed before the measurement finished.
    Interrupted,
}

impl Sample {
    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Rate(rpm) => Some(*rpm),
            Self::Interrupted => None,
        }
    }
}

/// `(edges / pulses) / elapsed * 60`, or `0.0` when elapsed is not positive.
pub fn rpm_from_edges(edges: u64, pulses_per_rev: u32, elapsed_secs: f64) -> f64 {
    if elapsed_secs.is_nan() || elapsed_secs <= 0.0 || pulses_per_rev == 0 {
        return 0.0;
    }
    let revolutions = edges as f64 / pulses_per_rev as f64;
    let rpm = revolutions / elapsed_secs * 60.0;
    if rpm.is_finite() {
        rpm
    } else {
        0.0
    }
}

/// Drives one edge source through warmup and measurement.
pub struct TimedSampler {
    config: ChannelConfig,
    wait: Box<dyn PhaseWait>,
    last_edges: u64,
}

impl TimedSampler {
    pub fn new(config: ChannelConfig, wait: Box<dyn PhaseWait>) -> Self {
        Self {
            config,
            wait,
            last_edges: 0,
        }
    }

    pub fn strategy(&self) -> &'static str {
        self.wait.name()
    }

    /// Edges counted by the most recent completed measurement phase.
    pub fn last_edges(&self) -> u64 {
        self.last_edges
    }

    pub fn sample(
        &mut self,
        source: &mut dyn EdgeSource,
        stop: &StopFlag,
    ) -> Result<Sample, EdgeError> {
        let warmup = self.config.warmup();
        if !warmup.is_zero() {
            debug!("warmup phase: {:?}", warmup);
            if self.wait.run_phase(source, warmup, stop, false)? == PhaseOutcome::Interrupted {
                return Ok(Sample::Interrupted);
            }
        }

        let window = self.config.measurement_window();
        debug!("measurement phase: {:?}", window);
        let clock = TimeBase::new();
        let edges = match self.wait.run_phase(source, window, stop, true)? {
            PhaseOutcome::Completed { edges } => edges,
            PhaseOutcome::Interrupted => return Ok(Sample::Interrupted),
        };
        let elapsed = clock.elapsed_secs();
        self.last_edges = edges;

        let pulses = self.config.pulses_per_rev();
        let rpm = rpm_from_edges(edges, pulses, elapsed);
        if elapsed > 0.0 {
            debug!(
                "counted {} pulses in {:.3} s ({:.2} Hz, {:.2} rev at {} pulses/rev): {:.1} rpm",
                edges,
                elapsed,
                edges as f64 / elapsed,
                edges as f64 / pulses as f64,
                pulses,
                rpm
            );
        }
        Ok(Sample::Rate(rpm))
    }
}
