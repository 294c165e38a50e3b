//! `q` to quit watch mode.
//!
//! Stdin is switched to non-canonical, no-echo mode while watching. The saved
//! terminal mode is restored by [`TerminalGuard`] on drop, by a panic hook,
//! and by [`restore_terminal`] before exit; whichever runs first wins.

use std::io;
use std::panic;
use std::sync::{Mutex, Once, PoisonError};
use std::thread;
use std::time::Duration;
use tacho_core::{StopFlag, CANCEL_POLL};
use tracing::{debug, info};

const STDIN: libc::c_int = libc::STDIN_FILENO;

static SAVED_MODE: Mutex<Option<libc::termios>> = Mutex::new(None);
static PANIC_HOOK: Once = Once::new();

pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    /// Switch stdin to key-at-a-time mode. `None` when stdin is not a
    /// terminal.
    pub fn enter() -> io::Result<Option<Self>> {
        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(STDIN) } != 1 {
            return Ok(None);
        }
        // SAFETY: termios is plain data; tcgetattr fills it in.
        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(STDIN, &mut original) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut keys = original;
        keys.c_lflag &= !(libc::ICANON | libc::ECHO);
        keys.c_cc[libc::VMIN] = 0;
        keys.c_cc[libc::VTIME] = 0;

        *SAVED_MODE.lock().unwrap_or_else(PoisonError::into_inner) = Some(original);
        install_panic_hook();
        // SAFETY: valid termios copied from the current mode.
        if unsafe { libc::tcsetattr(STDIN, libc::TCSANOW, &keys) } < 0 {
            let err = io::Error::last_os_error();
            SAVED_MODE
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            return Err(err);
        }
        debug!("terminal switched to key mode");
        Ok(Some(Self { _private: () }))
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Put back the saved terminal mode, if any. Safe to call repeatedly.
pub fn restore_terminal() {
    let saved = SAVED_MODE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(mode) = saved {
        // SAFETY: restoring a termios previously read from the same descriptor.
        unsafe {
            libc::tcsetattr(STDIN, libc::TCSANOW, &mode);
        }
    }
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_terminal();
            previous(info);
        }));
    });
}

/// Watch stdin for `q`/`Q` until it is pressed or the flag is set elsewhere.
pub fn spawn_key_watcher(stop: StopFlag) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("tacho-keys".to_string())
        .spawn(move || {
            let mut buf = [0u8; 32];
            while !stop.is_set() {
                if !stdin_readable(CANCEL_POLL) {
                    continue;
                }
                // SAFETY: reading into a local buffer.
                let n = unsafe { libc::read(STDIN, buf.as_mut_ptr().cast(), buf.len()) };
                if n <= 0 {
                    // VMIN=0 returns 0 with nothing pending; avoid spinning
                    thread::sleep(CANCEL_POLL);
                    continue;
                }
                if quit_requested(&buf[..n as usize]) {
                    if stop.trigger() {
                        info!("quit requested from keyboard");
                    }
                    break;
                }
            }
        })
}

fn stdin_readable(timeout: Duration) -> bool {
    let mut pfd = libc::pollfd {
        fd: STDIN,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
    if rc > 0 && pfd.revents & libc::POLLIN == 0 {
        // hangup or error: nothing will ever arrive, just pace the loop
        thread::sleep(timeout);
        return false;
    }
    rc > 0
}

fn quit_requested(keys: &[u8]) -> bool {
    keys.iter().any(|k| matches!(k, b'q' | b'Q'))
}
