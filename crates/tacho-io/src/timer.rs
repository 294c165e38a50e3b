//! Phase timing on a monotonic timerfd.
//!
//! The timer descriptor is polled together with the edge descriptor, so a
//! phase ends exactly when the kernel timer fires instead of when the next
//! polling slice happens to notice. The stop flag is still checked at least
//! every [`CANCEL_POLL`].

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tacho_core::{
    EdgeError, EdgeSource, PhaseOutcome, PhaseWait, PollingWait, StopFlag, CANCEL_POLL,
};

#[derive(Debug)]
pub struct TimerFdWait {
    timer: OwnedFd,
    fallback: PollingWait,
}

impl TimerFdWait {
    /// Create the timer. Fails on kernels or sandboxes without timerfd.
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall; the returned descriptor is checked below.
        let fd = unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC | libc::TFD_NONBLOCK)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            // SAFETY: freshly created descriptor owned by nobody else.
            timer: unsafe { OwnedFd::from_raw_fd(fd) },
            fallback: PollingWait::default(),
        })
    }

    fn arm(&self, length: Duration) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: length.as_secs() as _,
                tv_nsec: length.subsec_nanos() as _,
            },
        };
        // SAFETY: valid descriptor and itimerspec; old value not requested.
        let rc = unsafe { libc::timerfd_settime(self.timer.as_raw_fd(), 0, &spec, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn disarm(&self) {
        // Zero it_value disarms; failure leaves a stale expiry that the next
        // arm overwrites.
        let _ = self.arm(Duration::ZERO);
        self.drain_expirations();
    }

    fn drain_expirations(&self) -> u64 {
        let mut expirations = 0u64;
        // SAFETY: reads exactly one u64 into a local.
        let n = unsafe {
            libc::read(
                self.timer.as_raw_fd(),
                (&mut expirations as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if n == std::mem::size_of::<u64>() as isize {
            expirations
        } else {
            0
        }
    }

    fn run_timed(
        &mut self,
        source: &mut dyn EdgeSource,
        line_fd: RawFd,
        length: Duration,
        stop: &StopFlag,
        counting: bool,
    ) -> Result<PhaseOutcome, EdgeError> {
        self.arm(length).map_err(EdgeError::Wait)?;
        let mut edges = 0u64;
        loop {
            if stop.is_set() {
                self.disarm();
                return Ok(PhaseOutcome::Interrupted);
            }
            let mut fds = [
                libc::pollfd {
                    fd: line_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.timer.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // SAFETY: two valid pollfds.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), 2, CANCEL_POLL.as_millis() as libc::c_int) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.disarm();
                return Err(EdgeError::Wait(err));
            }
            if rc == 0 {
                continue;
            }

            let line_events = fds[0].revents;
            if line_events & libc::POLLIN != 0 {
                let consumed = source.consume_edge()?;
                if counting {
                    edges += consumed;
                }
            } else if line_events & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                self.disarm();
                return Err(EdgeError::Wait(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    format!("line descriptor reported revents {:#x}", line_events),
                )));
            }

            if fds[1].revents & libc::POLLIN != 0 && self.drain_expirations() > 0 {
                return Ok(PhaseOutcome::Completed { edges });
            }
        }
    }
}

impl PhaseWait for TimerFdWait {
    fn run_phase(
        &mut self,
        source: &mut dyn EdgeSource,
        length: Duration,
        stop: &StopFlag,
        counting: bool,
    ) -> Result<PhaseOutcome, EdgeError> {
        if length.is_zero() {
            return Ok(if stop.is_set() {
                PhaseOutcome::Interrupted
            } else {
                PhaseOutcome::Completed { edges: 0 }
            });
        }
        match source.readiness_fd() {
            Some(fd) => self.run_timed(source, fd, length, stop, counting),
            None => self.fallback.run_phase(source, length, stop, counting),
        }
    }

    fn name(&self) -> &'static str {
        "timerfd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tacho_core::{EdgeWait, SimulatedFan};

    /// Pipe-backed source: every byte written is one edge.
    struct PipeSource {
        read: OwnedFd,
    }

    impl EdgeSource for PipeSource {
        fn wait_for_edge(&mut self, _timeout: Duration) -> Result<EdgeWait, EdgeError> {
            Ok(EdgeWait::Timeout)
        }

        fn consume_edge(&mut self) -> Result<u64, EdgeError> {
            let mut buf = [0u8; 64];
            let n = unsafe { libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            Ok(n.max(0) as u64)
        }

        fn readiness_fd(&self) -> Option<RawFd> {
            Some(self.read.as_raw_fd())
        }
    }

    fn pipe_source() -> (PipeSource, OwnedFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) }, 0);
        let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        (PipeSource { read }, write)
    }

    fn edges(write: &OwnedFd, count: usize) {
        let bytes = vec![1u8; count];
        let n = unsafe { libc::write(write.as_raw_fd(), bytes.as_ptr().cast(), count) };
        assert_eq!(n as usize, count);
    }

    #[test]
    fn phase_ends_on_timer() {
        let mut wait = TimerFdWait::new().unwrap();
        let (mut source, _write) = pipe_source();
        let start = Instant::now();
        let outcome = wait
            .run_phase(&mut source, Duration::from_millis(150), &StopFlag::new(), true)
            .unwrap();
        let elapsed = start.elapsed();
        assert_eq!(outcome, PhaseOutcome::Completed { edges: 0 });
        assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    }

    #[test]
    fn counts_only_when_counting() {
        let mut wait = TimerFdWait::new().unwrap();
        let (mut source, write) = pipe_source();
        edges(&write, 5);
        let outcome = wait
            .run_phase(&mut source, Duration::from_millis(50), &StopFlag::new(), true)
            .unwrap();
        assert_eq!(outcome, PhaseOutcome::Completed { edges: 5 });

        edges(&write, 3);
        let outcome = wait
            .run_phase(&mut source, Duration::from_millis(50), &StopFlag::new(), false)
            .unwrap();
        assert_eq!(outcome, PhaseOutcome::Completed { edges: 0 });
    }

    #[test]
    fn stop_interrupts_long_phase() {
        let mut wait = TimerFdWait::new().unwrap();
        let (mut source, _write) = pipe_source();
        let stop = StopFlag::new();
        let stopper = stop.clone();
        let timer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stopper.trigger();
        });
        let start = Instant::now();
        let outcome = wait
            .run_phase(&mut source, Duration::from_secs(10), &stop, true)
            .unwrap();
        assert_eq!(outcome, PhaseOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_millis(50) + CANCEL_POLL * 2);
        timer.join().unwrap();

        // a disarmed timer must not end the next phase early
        let start = Instant::now();
        wait.run_phase(&mut source, Duration::from_millis(100), &StopFlag::new(), true)
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn sources_without_descriptor_use_polling() {
        let mut wait = TimerFdWait::new().unwrap();
        let mut fan = SimulatedFan::new(600.0, 2);
        let outcome = wait
            .run_phase(&mut fan, Duration::from_millis(200), &StopFlag::new(), true)
            .unwrap();
        match outcome {
            PhaseOutcome::Completed { edges } => assert!((2..=5).contains(&edges), "{edges}"),
            PhaseOutcome::Interrupted => panic!("not interrupted"),
        }
    }
}
