//! Edge sources backed by the Linux GPIO character device.

pub mod chip;
pub mod line;
pub mod uapi;

pub use chip::{auto_detect, chip_path, Chip, ChipInfo};
pub use line::GpioLine;

use crate::timer::TimerFdWait;
use std::io;
use std::path::PathBuf;
use tacho_core::{EdgeError, EdgePolarity, EdgeSource, LineProvider, PhaseWait, PollingWait};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("cannot open GPIO chip {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("cannot request line {line}: {source}")]
    Request {
        line: u32,
        #[source]
        source: io::Error,
    },

    #[error("line {line} is out of range for chip {chip} ({lines} lines)")]
    LineOutOfRange { line: u32, chip: String, lines: u32 },

    #[error("cannot auto-detect GPIO chip for line {line}")]
    NoChip { line: u32 },
}

impl GpioError {
    /// Classify for a channel worker acquiring `line`.
    pub fn into_edge_error(self, line: u32) -> EdgeError {
        let os = match &self {
            Self::Open { source, .. } | Self::Ioctl { source, .. } | Self::Request { source, .. } => {
                source.raw_os_error()
            }
            Self::LineOutOfRange { .. } | Self::NoChip { .. } => None,
        };
        match os {
            Some(libc::EBUSY) => EdgeError::Busy { line },
            Some(libc::EACCES) | Some(libc::EPERM) => EdgeError::PermissionDenied { line },
            _ => EdgeError::Unavailable {
                line,
                reason: self.to_string(),
            },
        }
    }
}

/// Opens lines on one GPIO chip. Each `open` uses its own chip handle so
/// workers never share descriptors.
#[derive(Debug, Clone)]
pub struct GpioBank {
    chip: String,
    consumer: String,
}

impl GpioBank {
    pub fn new(chip: impl Into<String>) -> Self {
        Self {
            chip: chip.into(),
            consumer: format!("tacho-{}", std::process::id()),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    fn request(&self, line: u32, polarity: EdgePolarity) -> Result<GpioLine, GpioError> {
        let chip = Chip::open(&self.chip)?;
        let info = chip.info()?;
        if line >= info.lines {
            return Err(GpioError::LineOutOfRange {
                line,
                chip: self.chip.clone(),
                lines: info.lines,
            });
        }
        GpioLine::request(&chip, line, polarity, &self.consumer)
    }
}

impl LineProvider for GpioBank {
    fn open(&self, line: u32, polarity: EdgePolarity) -> Result<Box<dyn EdgeSource>, EdgeError> {
        let source = self
            .request(line, polarity)
            .map_err(|e| e.into_edge_error(line))?;
        debug!(chip = %self.chip, line, %polarity, "line requested");
        Ok(Box::new(source))
    }

    fn phase_wait(&self) -> Box<dyn PhaseWait> {
        match TimerFdWait::new() {
            Ok(wait) => Box::new(wait),
            Err(e) => {
                warn!("timerfd unavailable, falling back to polling: {}", e);
                Box::new(PollingWait::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(code: i32) -> io::Error {
        io::Error::from_raw_os_error(code)
    }

    #[test]
    fn request_errors_are_classified() {
        let busy = GpioError::Request { line: 4, source: os(libc::EBUSY) };
        assert!(matches!(busy.into_edge_error(4), EdgeError::Busy { line: 4 }));

        let denied = GpioError::Open {
            path: chip_path("gpiochip0"),
            source: os(libc::EACCES),
        };
        assert!(matches!(
            denied.into_edge_error(4),
            EdgeError::PermissionDenied { line: 4 }
        ));

        let missing = GpioError::Request { line: 4, source: os(libc::EINVAL) };
        assert!(matches!(missing.into_edge_error(4), EdgeError::Unavailable { line: 4, .. }));
    }

    #[test]
    fn missing_chip_makes_line_unavailable() {
        let bank = GpioBank::new("/nonexistent/gpiochip0");
        let err = bank.open(17, EdgePolarity::Both).err().unwrap();
        assert!(matches!(err, EdgeError::Unavailable { line: 17, .. }));
    }

    #[test]
    fn consumer_carries_pid() {
        let bank = GpioBank::new("gpiochip0");
        assert_eq!(bank.consumer(), format!("tacho-{}", std::process::id()));
    }
}
