//! Quit and save requests
//!
//! `ControlFlags` is shared by `Arc` between the orchestrator and whoever
//! raises requests. Signal handlers reach it through the single slot filled
//! by `register_control`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{SimError, SimResult};

#[derive(Debug, Default)]
pub struct ControlFlags {
    quit_request: AtomicBool,
    save_request: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the orchestrator to stop after the phase in flight
    pub fn request_quit(&self) {
        self.quit_request.store(true, Ordering::SeqCst);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_request.load(Ordering::SeqCst)
    }

    pub fn request_save(&self) {
        self.save_request.store(true, Ordering::SeqCst);
    }

    /// Consume a pending save request
    pub fn take_save_request(&self) -> bool {
        self.save_request.swap(false, Ordering::SeqCst)
    }
}

static CONTROL: OnceLock<Arc<ControlFlags>> = OnceLock::new();

/// Make `flags` reachable from signal handlers. Only one registration is
/// allowed per process.
pub fn register_control(flags: Arc<ControlFlags>) -> SimResult<()> {
    CONTROL.set(flags).map_err(|_| SimError::AlreadyRegistered)
}

pub fn registered_control() -> Option<&'static Arc<ControlFlags>> {
    CONTROL.get()
}

#[cfg(unix)]
extern "C" fn on_signal(signal: libc::c_int) {
    // only atomic stores from here
    if let Some(control) = CONTROL.get() {
        match signal {
            libc::SIGUSR1 => control.request_save(),
            _ => control.request_quit(),
        }
    }
}

/// Route SIGINT and SIGTERM to a quit request and SIGUSR1 to a save request
#[cfg(unix)]
pub fn install_signal_handlers() -> SimResult<()> {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signal in [libc::SIGINT, libc::SIGTERM, libc::SIGUSR1] {
        // SAFETY: the handler only performs atomic operations
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            return Err(SimError::Io(std::io::Error::last_os_error()));
        }
    }
    log::debug!("[Control] Signal handlers installed");
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers() -> SimResult<()> {
    log::warn!("[Control] Signal handlers are not available on this platform");
    Ok(())
}
