//! Interrupt/terminate as a pollable flag.

use std::sync::atomic::{AtomicI32, Ordering};

use log::debug;

use super::{install_handler, Signal, WATCHED};
use crate::error_handling::SignalError;

static TERMINATION: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_termination(signum: libc::c_int) {
    let _ = TERMINATION.compare_exchange(0, signum, Ordering::SeqCst, Ordering::SeqCst);
}

/// Installs the process-wide handler for [`WATCHED`] signals.
///
/// The handler only records the first signal; [`termination_requested`]
/// reports it. Install it before opening any [`DeferredSignals`] scope so a
/// deferred signal is replayed into it.
///
/// [`DeferredSignals`]: super::DeferredSignals
pub fn install_termination_handler() -> Result<(), SignalError> {
    for signal in WATCHED {
        install_handler(signal, record_termination)?;
    }
    debug!("Termination handler installed");
    Ok(())
}

/// The first termination signal received since the handler was installed.
pub fn termination_requested() -> Option<Signal> {
    Signal::from_raw(TERMINATION.load(Ordering::SeqCst))
}
