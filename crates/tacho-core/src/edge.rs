use crate::sampler::{PhaseWait, PollingWait};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::RawFd;
use std::time::Duration;
use thiserror::Error;

/// Which transitions on the input line count as tachometer pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolarity {
    Rising,
    Falling,
    #[default]
    Both,
}

impl fmt::Display for EdgePolarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::Both => "both",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeWait {
    Timeout,
    Ready,
}

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("line {line} is not available: {reason}")]
    Unavailable { line: u32, reason: String },

    #[error("permission denied for line {line}")]
    PermissionDenied { line: u32 },

    #[error("line {line} is busy")]
    Busy { line: u32 },

    #[error("edge wait failed: {0}")]
    Wait(#[source] std::io::Error),

    #[error("edge read failed: {0}")]
    Read(#[source] std::io::Error),
}

/// One hardware input channel delivering edge events.
///
/// Acquired by [`LineProvider::open`] and released when dropped.
pub trait EdgeSource: Send {
    /// Block up to `timeout` for a pending edge.
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<EdgeWait, EdgeError>;

    /// Consume pending edge events, returning how many were consumed.
    fn consume_edge(&mut self) -> Result<u64, EdgeError>;

    /// Descriptor that becomes readable when an edge is pending, if the source
    /// has one. Used by wait strategies that multiplex it with a timer.
    fn readiness_fd(&self) -> Option<RawFd> {
        None
    }
}

impl<S: EdgeSource + ?Sized> EdgeSource for Box<S> {
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<EdgeWait, EdgeError> {
        (**self).wait_for_edge(timeout)
    }

    fn consume_edge(&mut self) -> Result<u64, EdgeError> {
        (**self).consume_edge()
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        (**self).readiness_fd()
    }
}

/// Opens edge sources by line number. Shared by all channel workers; each
/// worker calls `open` from its own thread.
pub trait LineProvider: Send + Sync {
    fn open(&self, line: u32, polarity: EdgePolarity) -> Result<Box<dyn EdgeSource>, EdgeError>;

    /// Wait strategy for a freshly opened source. Called once per worker.
    fn phase_wait(&self) -> Box<dyn PhaseWait> {
        Box::new(PollingWait::default())
    }
}
