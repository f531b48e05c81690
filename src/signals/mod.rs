//! Process signal handling.
//!
//! - [`DeferredSignals`]: holds interrupt/terminate back for the duration of
//!   a critical section and replays the first one on exit
//! - [`install_termination_handler`]: turns interrupt/terminate into a flag
//!   the dispatch loop polls
//!
//! Unix only. Handlers only touch atomics and async-signal-safe libc calls.

mod deferred;
mod termination;

use std::io;
use std::mem::MaybeUninit;

use crate::error_handling::SignalError;

pub use deferred::{DeferredSignals, ForkPolicy};
pub use termination::{install_termination_handler, termination_requested};

/// The signals the pipeline reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
}

/// Every signal that triggers teardown.
pub const WATCHED: [Signal; 2] = [Signal::Interrupt, Signal::Terminate];

impl Signal {
    pub const fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
        }
    }

    pub fn from_raw(signum: libc::c_int) -> Option<Self> {
        match signum {
            libc::SIGINT => Some(Signal::Interrupt),
            libc::SIGTERM => Some(Signal::Terminate),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Signal::Interrupt => 0,
            Signal::Terminate => 1,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("SIGINT"),
            Signal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Installs `handler` for `signal` and returns the action it replaced.
fn install_handler(
    signal: Signal,
    handler: extern "C" fn(libc::c_int),
) -> Result<libc::sigaction, SignalError> {
    let mut action: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
    action.sa_sigaction = handler as *const () as usize;
    action.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
    }
    let mut previous: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
    let result = unsafe { libc::sigaction(signal.as_raw(), &action, &mut previous) };
    if result != 0 {
        return Err(SignalError::Install {
            signal: signal.as_raw(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(previous)
}

/// Puts back an action returned by [`install_handler`].
fn restore_handler(signal: Signal, previous: &libc::sigaction) -> Result<(), SignalError> {
    let result = unsafe { libc::sigaction(signal.as_raw(), previous, std::ptr::null_mut()) };
    if result != 0 {
        return Err(SignalError::Install {
            signal: signal.as_raw(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        for signal in WATCHED {
            assert_eq!(Signal::from_raw(signal.as_raw()), Some(signal));
        }
        assert_eq!(Signal::from_raw(libc::SIGHUP), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }
}
