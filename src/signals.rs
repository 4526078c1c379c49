//! Stop and restart requests delivered by signals.
//!
//! SIGHUP asks for a restart, SIGINT and SIGTERM for a stop. The handlers only flip
//! atomics in `PROCESS_STOP`; the connection checks them between records and when a
//! blocking read is interrupted.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct StopSignal {
    stopping: AtomicBool,
    restart: AtomicBool,
}

impl StopSignal {
    pub const fn new() -> StopSignal {
        StopSignal {
            stopping: AtomicBool::new(false),
            restart: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        self.restart.store(false, Ordering::SeqCst);
    }
}

/// The flags the process's signal handlers write to.
pub static PROCESS_STOP: StopSignal = StopSignal::new();

#[cfg(unix)]
extern "C" fn handle_signal(signum: libc::c_int) {
    if signum == libc::SIGHUP {
        PROCESS_STOP.restart();
    } else {
        PROCESS_STOP.stop();
    }
}

/// Installed handlers; the previous ones come back when this is dropped.
pub struct SignalHandlers {
    #[cfg(unix)]
    saved: Vec<(libc::c_int, libc::sigaction)>,
}

impl SignalHandlers {
    #[cfg(unix)]
    pub fn install() -> io::Result<SignalHandlers> {
        let mut handlers = SignalHandlers { saved: Vec::new() };
        for &signum in &[libc::SIGHUP, libc::SIGINT, libc::SIGTERM] {
            // No SA_RESTART: a signal has to break us out of the blocking read.
            let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
            action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as *const () as libc::sighandler_t;
            action.sa_flags = 0;
            let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(signum, &action, &mut previous)
            };
            if rc != 0 {
                // Dropping `handlers` puts back whatever was already replaced.
                return Err(io::Error::last_os_error());
            }
            handlers.saved.push((signum, previous));
        }
        debug!("installed handlers for SIGHUP, SIGINT and SIGTERM");
        Ok(handlers)
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<SignalHandlers> {
        Ok(SignalHandlers {})
    }
}

#[cfg(unix)]
impl Drop for SignalHandlers {
    fn drop(&mut self) {
        for (signum, previous) in self.saved.drain(..) {
            let rc = unsafe { libc::sigaction(signum, &previous, std::ptr::null_mut()) };
            if rc != 0 {
                warn!("failed to restore handler for signal {}: {}", signum, io::Error::last_os_error());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_implies_stop() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopping());
        signal.restart();
        assert!(signal.is_stopping());
        assert!(signal.restart_requested());
        signal.reset();
        assert!(!signal.is_stopping());
        assert!(!signal.restart_requested());
    }

    #[cfg(unix)]
    #[test]
    fn sighup_requests_restart() {
        PROCESS_STOP.reset();
        let handlers = SignalHandlers::install().unwrap();
        assert_eq!(unsafe { libc::raise(libc::SIGHUP) }, 0);
        assert!(PROCESS_STOP.is_stopping());
        assert!(PROCESS_STOP.restart_requested());
        PROCESS_STOP.reset();
        drop(handlers);
    }

    #[test]
    fn stop_is_not_restart() {
        let signal = StopSignal::new();
        signal.stop();
        assert!(signal.is_stopping());
        assert!(!signal.restart_requested());
    }
}
