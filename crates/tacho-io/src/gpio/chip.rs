use super::uapi::{GpioChipInfo, Zeroed, GPIO_GET_CHIPINFO_IOCTL};
use super::GpioError;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Chips probed by [`auto_detect`]: `gpiochip0` to `gpiochip9`.
pub const AUTO_DETECT_CHIPS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    pub name: String,
    pub label: String,
    pub lines: u32,
}

/// An open GPIO character device.
#[derive(Debug)]
pub struct Chip {
    file: File,
}

impl Chip {
    /// Open a chip by device name (`gpiochip0`) or by path.
    pub fn open(name: &str) -> Result<Self, GpioError> {
        let path = chip_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| GpioError::Open { path, source })?;
        Ok(Self { file })
    }

    pub fn info(&self) -> Result<ChipInfo, GpioError> {
        let mut raw = GpioChipInfo::zeroed();
        // SAFETY: the descriptor is an open chip and `raw` matches the size
        // encoded in the request number.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                GPIO_GET_CHIPINFO_IOCTL as _,
                &mut raw as *mut GpioChipInfo,
            )
        };
        if rc < 0 {
            return Err(GpioError::Ioctl {
                op: "chip info",
                source: io::Error::last_os_error(),
            });
        }
        Ok(ChipInfo {
            name: raw.name(),
            label: raw.label(),
            lines: raw.lines,
        })
    }
}

impl AsFd for Chip {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// `/dev/<name>` for bare names, the name itself for anything with a slash.
pub fn chip_path(name: &str) -> PathBuf {
    if name.contains('/') {
        PathBuf::from(name)
    } else {
        Path::new("/dev").join(name)
    }
}

/// First chip among `gpiochip0..9` that has more than `line` lines.
pub fn auto_detect(line: u32) -> Result<String, GpioError> {
    for index in 0..AUTO_DETECT_CHIPS {
        let name = format!("gpiochip{index}");
        let chip = match Chip::open(&name) {
            Ok(chip) => chip,
            Err(_) => continue,
        };
        match chip.info() {
            Ok(info) if line < info.lines => {
                debug!(chip = %name, label = %info.label, lines = info.lines, "auto-detected GPIO chip");
                return Ok(name);
            }
            Ok(info) => debug!(chip = %name, lines = info.lines, "chip too small for line {}", line),
            Err(e) => debug!(chip = %name, error = %e, "cannot query chip"),
        }
    }
    Err(GpioError::NoChip { line })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_live_in_dev() {
        assert_eq!(chip_path("gpiochip2"), PathBuf::from("/dev/gpiochip2"));
        assert_eq!(chip_path("/tmp/chip"), PathBuf::from("/tmp/chip"));
    }

    #[test]
    fn missing_chip_reports_path() {
        let err = Chip::open("/nonexistent/gpiochip9").unwrap_err();
        assert!(matches!(err, GpioError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/gpiochip9"));
    }
}
