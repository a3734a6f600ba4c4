//! Cooperative interrupt flag for SIGINT/SIGTERM.
//!
//! Task loops poll the flag between units of work instead of dying
//! mid-write, so the runner can still mark an open job as failed before
//! the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use nix::sys::signal::{self, SigHandler, Signal};

use crate::error::{ClerkError, Result};

static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_signal: nix::libc::c_int) {
    // Only an atomic store here; anything else is not async-signal-safe.
    if let Some(flag) = FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Install SIGINT/SIGTERM handlers and return the shared stop flag.
///
/// Idempotent: repeated calls return the same flag. Callers hand the flag
/// to [`crate::task::RunContext`] so task loops can poll it.
pub fn install() -> Result<Arc<AtomicBool>> {
    let flag = FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)));
    let handler = SigHandler::Handler(handle_signal);
    unsafe {
        signal::signal(Signal::SIGINT, handler)
            .map_err(|e| ClerkError::Io(std::io::Error::other(e)))?;
        signal::signal(Signal::SIGTERM, handler)
            .map_err(|e| ClerkError::Io(std::io::Error::other(e)))?;
    }
    Ok(Arc::clone(flag))
}
