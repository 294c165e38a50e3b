use crate::edge::EdgePolarity;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

pub const MAX_CHANNELS: usize = 10;
pub const MAX_LINE: u32 = 999;
pub const PULSES_RANGE: std::ops::RangeInclusive<u32> = 1..=100;
pub const MAX_WARMUP_SECS: u64 = 60;
pub const MAX_DURATION_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("at least one line is required")]
    NoChannels,
    #[error("too many lines ({count}), at most {limit} are supported")]
    TooManyChannels { count: usize, limit: usize },
    #[error("line {line} is out of range (0-{limit})")]
    LineOutOfRange { line: u32, limit: u32 },
    #[error("line {line} specified multiple times")]
    DuplicateLine { line: u32 },
    #[error("pulses must be between 1 and 100, got {pulses}")]
    PulsesOutOfRange { pulses: u32 },
    #[error("warmup must be between 0 and {limit} seconds, got {warmup}")]
    WarmupOutOfRange { warmup: u64, limit: u64 },
    #[error("duration must be between 1 and {limit} seconds, got {duration}")]
    DurationOutOfRange { duration: u64, limit: u64 },
    #[error("duration ({duration:?}) must exceed warmup ({warmup:?}) by at least {min_window:?}")]
    WindowTooShort {
        duration: Duration,
        warmup: Duration,
        min_window: Duration,
    },
}

/// Per-channel sampling configuration. Immutable once a round starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    pulses_per_rev: u32,
    warmup: Duration,
    duration: Duration,
    polarity: EdgePolarity,
}

impl ChannelConfig {
    /// Build a config from whole seconds, applying the command-line ranges.
    pub fn from_secs(
        duration: u64,
        pulses_per_rev: u32,
        warmup: u64,
        polarity: EdgePolarity,
    ) -> Result<Self, PlanError> {
        if !(1..=MAX_DURATION_SECS).contains(&duration) {
            return Err(PlanError::DurationOutOfRange {
                duration,
                limit: MAX_DURATION_SECS,
            });
        }
        if warmup > MAX_WARMUP_SECS {
            return Err(PlanError::WarmupOutOfRange {
                warmup,
                limit: MAX_WARMUP_SECS,
            });
        }
        Self::with_timing(
            Duration::from_secs(warmup),
            Duration::from_secs(duration),
            pulses_per_rev,
            polarity,
            Duration::from_secs(1),
        )
    }

    /// Build a config from arbitrary durations. The measurement window
    /// (`duration - warmup`) must be at least `min_window` and non-zero.
    pub fn with_timing(
        warmup: Duration,
        duration: Duration,
        pulses_per_rev: u32,
        polarity: EdgePolarity,
        min_window: Duration,
    ) -> Result<Self, PlanError> {
        if !PULSES_RANGE.contains(&pulses_per_rev) {
            return Err(PlanError::PulsesOutOfRange {
                pulses: pulses_per_rev,
            });
        }
        let window = duration.saturating_sub(warmup);
        if window.is_zero() || window < min_window {
            return Err(PlanError::WindowTooShort {
                duration,
                warmup,
                min_window,
            });
        }
        Ok(Self {
            pulses_per_rev,
            warmup,
            duration,
            polarity,
        })
    }

    pub fn pulses_per_rev(&self) -> u32 {
        self.pulses_per_rev
    }

    pub fn warmup(&self) -> Duration {
        self.warmup
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn polarity(&self) -> EdgePolarity {
        self.polarity
    }

    /// Length of the counted phase: total duration minus warmup.
    pub fn measurement_window(&self) -> Duration {
        self.duration - self.warmup
    }
}

/// One monitored input line with its configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    pub line: u32,
    pub config: ChannelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    SingleShot,
    Watch,
}

/// Validated set of channels in declaration order.
#[derive(Debug, Clone)]
pub struct MeasurePlan {
    channels: Vec<Channel>,
    mode: RunMode,
}

impl MeasurePlan {
    pub fn new(channels: Vec<Channel>, mode: RunMode) -> Result<Self, PlanError> {
        if channels.is_empty() {
            return Err(PlanError::NoChannels);
        }
        if channels.len() > MAX_CHANNELS {
            return Err(PlanError::TooManyChannels {
                count: channels.len(),
                limit: MAX_CHANNELS,
            });
        }
        let mut seen = HashSet::with_capacity(channels.len());
        for channel in &channels {
            if channel.line > MAX_LINE {
                return Err(PlanError::LineOutOfRange {
                    line: channel.line,
                    limit: MAX_LINE,
                });
            }
            if !seen.insert(channel.line) {
                return Err(PlanError::DuplicateLine { line: channel.line });
            }
        }
        Ok(Self { channels, mode })
    }

    /// Same configuration on every line.
    pub fn uniform(lines: &[u32], config: ChannelConfig, mode: RunMode) -> Result<Self, PlanError> {
        let channels = lines
            .iter()
            .map(|&line| Channel { line, config })
            .collect();
        Self::new(channels, mode)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn lines(&self) -> Vec<u32> {
        self.channels.iter().map(|c| c.line).collect()
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
