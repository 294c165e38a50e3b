use super::chip::Chip;
use super::uapi::{
    consumer_label, GpioV2LineEvent, GpioV2LineRequest, Zeroed, GPIO_V2_GET_LINE_IOCTL,
    GPIO_V2_LINE_FLAG_EDGE_FALLING, GPIO_V2_LINE_FLAG_EDGE_RISING, GPIO_V2_LINE_FLAG_INPUT,
};
use super::GpioError;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tacho_core::{EdgeError, EdgePolarity, EdgeSource, EdgeWait};

/// Events drained per read.
const EVENT_BATCH: usize = 16;

/// One input line requested for edge detection.
///
/// The kernel releases the line when the request descriptor is closed.
#[derive(Debug)]
pub struct GpioLine {
    fd: OwnedFd,
}

pub fn edge_flags(polarity: EdgePolarity) -> u64 {
    GPIO_V2_LINE_FLAG_INPUT
        | match polarity {
            EdgePolarity::Rising => GPIO_V2_LINE_FLAG_EDGE_RISING,
            EdgePolarity::Falling => GPIO_V2_LINE_FLAG_EDGE_FALLING,
            EdgePolarity::Both => GPIO_V2_LINE_FLAG_EDGE_RISING | GPIO_V2_LINE_FLAG_EDGE_FALLING,
        }
}

impl GpioLine {
    pub fn request(
        chip: &Chip,
        line: u32,
        polarity: EdgePolarity,
        consumer: &str,
    ) -> Result<Self, GpioError> {
        let mut req = GpioV2LineRequest::zeroed();
        req.offsets[0] = line;
        req.num_lines = 1;
        req.consumer = consumer_label(consumer);
        req.config.flags = edge_flags(polarity);

        // SAFETY: `req` is a fully initialised gpio_v2_line_request and the
        // chip descriptor stays open for the duration of the call.
        let rc = unsafe {
            libc::ioctl(
                chip.as_fd().as_raw_fd(),
                GPIO_V2_GET_LINE_IOCTL as _,
                &mut req as *mut GpioV2LineRequest,
            )
        };
        if rc < 0 {
            return Err(GpioError::Request {
                line,
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: on success the kernel hands over a new descriptor we own.
        let fd = unsafe { OwnedFd::from_raw_fd(req.fd) };
        set_nonblocking(&fd).map_err(|source| GpioError::Request { line, source })?;
        Ok(Self { fd })
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: plain fcntl flag manipulation on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Poll one descriptor for input. EINTR counts as a timeout so callers get
/// a chance to look at their stop flag.
pub(crate) fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_micros().div_ceil(1000).min(i32::MAX as u128) as libc::c_int;
    // SAFETY: one valid pollfd.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(false);
    }
    if pfd.revents & libc::POLLIN != 0 {
        return Ok(true);
    }
    Err(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("descriptor reported revents {:#x}", pfd.revents),
    ))
}

/// Drain pending events without blocking. Returns the event count.
pub(crate) fn drain_events(fd: RawFd) -> io::Result<u64> {
    let mut events = [GpioV2LineEvent::zeroed(); EVENT_BATCH];
    let size = mem::size_of_val(&events);
    // SAFETY: the buffer is valid for `size` bytes.
    let n = unsafe { libc::read(fd, events.as_mut_ptr().cast(), size) };
    if n < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(0),
            _ => Err(err),
        };
    }
    Ok(n as u64 / mem::size_of::<GpioV2LineEvent>() as u64)
}

impl EdgeSource for GpioLine {
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<EdgeWait, EdgeError> {
        match poll_readable(self.fd.as_raw_fd(), timeout) {
            Ok(true) => Ok(EdgeWait::Ready),
            Ok(false) => Ok(EdgeWait::Timeout),
            Err(e) => Err(EdgeError::Wait(e)),
        }
    }

    fn consume_edge(&mut self) -> Result<u64, EdgeError> {
        drain_events(self.fd.as_raw_fd()).map_err(EdgeError::Read)
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        Some(self.fd.as_raw_fd())
    }
}
