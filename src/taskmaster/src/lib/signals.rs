use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::WatcherError;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_child_exit(_: c_int) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

extern "C" fn on_shutdown(_: c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_handler(signal: Signal, handler: extern "C" fn(c_int)) -> Result<(), WatcherError> {
    let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty());
    let previous = unsafe { sigaction(signal, &action) };
    previous.map_err(WatcherError::Sigaction)?;
    return Ok(());
}

/// Turns SIGCHLD, SIGTERM and SIGINT into flags the main loop drains. Only one
/// watcher can exist per process, which also makes it the guard against running
/// two supervisors in one process
pub struct SignalWatcher {
    _private: (),
}

impl SignalWatcher {
    pub fn install() -> Result<SignalWatcher, WatcherError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(WatcherError::AlreadyInstalled);
        }

        let installed = install_handler(Signal::SIGCHLD, on_child_exit)
            .and_then(|_| install_handler(Signal::SIGTERM, on_shutdown))
            .and_then(|_| install_handler(Signal::SIGINT, on_shutdown));

        if let Err(err) = installed {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(err);
        }

        return Ok(SignalWatcher { _private: () });
    }

    /// Whether a child changed state since the last call
    pub fn take_child_exited(&self) -> bool {
        return CHILD_EXITED.swap(false, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        return SHUTDOWN.load(Ordering::SeqCst);
    }
}
