//! Scope that holds termination signals back until it exits.

use std::cell::Cell;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};

use log::{debug, error};
use parking_lot::{const_mutex, Mutex, MutexGuard};

use super::{install_handler, restore_handler, Signal, WATCHED};
use crate::error_handling::SignalError;

/// What a deferred handler does when it runs in a forked child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkPolicy {
    /// Reinstall the handler that was active before the scope and re-raise.
    Forward,
    /// Drop the signal and note it on stderr.
    Ignore,
    /// Drop the signal.
    #[default]
    IgnoreSilently,
}

impl ForkPolicy {
    fn to_raw(self) -> u8 {
        match self {
            ForkPolicy::Forward => 0,
            ForkPolicy::Ignore => 1,
            ForkPolicy::IgnoreSilently => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ForkPolicy::Forward,
            1 => ForkPolicy::Ignore,
            _ => ForkPolicy::IgnoreSilently,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerAction {
    Capture,
    Forward,
    Warn,
    Ignore,
}

fn handler_action(owner: libc::pid_t, current: libc::pid_t, policy: ForkPolicy) -> HandlerAction {
    if owner == current {
        return HandlerAction::Capture;
    }
    match policy {
        ForkPolicy::Forward => HandlerAction::Forward,
        ForkPolicy::Ignore => HandlerAction::Warn,
        ForkPolicy::IgnoreSilently => HandlerAction::Ignore,
    }
}

// One scope at a time per process: the handler state below is global.
static SCOPE_LOCK: Mutex<()> = const_mutex(());

static CAPTURED: AtomicI32 = AtomicI32::new(0);
static OWNER_PID: AtomicI32 = AtomicI32::new(0);
static FORK_POLICY: AtomicU8 = AtomicU8::new(2);
static PREVIOUS_HANDLER: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
static PREVIOUS_FLAGS: [AtomicI32; 2] = [AtomicI32::new(0), AtomicI32::new(0)];

thread_local! {
    static IN_SCOPE: Cell<bool> = const { Cell::new(false) };
}

extern "C" fn capture_signal(signum: libc::c_int) {
    let current = unsafe { libc::getpid() };
    let owner = OWNER_PID.load(Ordering::SeqCst);
    let policy = ForkPolicy::from_raw(FORK_POLICY.load(Ordering::SeqCst));
    match handler_action(owner, current, policy) {
        HandlerAction::Capture => {
            // First signal wins
            let _ = CAPTURED.compare_exchange(0, signum, Ordering::SeqCst, Ordering::SeqCst);
        }
        HandlerAction::Forward => forward_to_previous(signum),
        HandlerAction::Warn => {
            let msg = b"deferred signal ignored in forked child\n";
            unsafe {
                libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
            }
        }
        HandlerAction::Ignore => {}
    }
}

fn forward_to_previous(signum: libc::c_int) {
    let Some(signal) = Signal::from_raw(signum) else {
        return;
    };
    let index = signal.index();
    unsafe {
        let mut action: libc::sigaction = std::mem::MaybeUninit::zeroed().assume_init();
        action.sa_sigaction = PREVIOUS_HANDLER[index].load(Ordering::SeqCst);
        action.sa_flags = PREVIOUS_FLAGS[index].load(Ordering::SeqCst);
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signum, &action, std::ptr::null_mut());
        libc::raise(signum);
    }
}

/// Defers interrupt and terminate while it is alive.
///
/// Signals delivered inside the scope are recorded, not acted on. When the
/// scope ends (via [`DeferredSignals::finish`] or drop), the previous
/// handlers are put back and the first recorded signal is raised again, so
/// the previous handler runs before control returns to the caller.
///
/// Scopes are serialized process-wide; opening a second one on the same
/// thread fails with `SignalError::ScopeActive`.
pub struct DeferredSignals {
    previous: Vec<(Signal, libc::sigaction)>,
    finished: bool,
    _lock: MutexGuard<'static, ()>,
}

impl DeferredSignals {
    /// Opens a scope with the default fork policy.
    pub fn enter() -> Result<Self, SignalError> {
        Self::with_policy(ForkPolicy::default())
    }

    pub fn with_policy(policy: ForkPolicy) -> Result<Self, SignalError> {
        if IN_SCOPE.with(Cell::get) {
            return Err(SignalError::ScopeActive);
        }
        let lock = SCOPE_LOCK.lock();
        IN_SCOPE.with(|flag| flag.set(true));

        CAPTURED.store(0, Ordering::SeqCst);
        OWNER_PID.store(unsafe { libc::getpid() }, Ordering::SeqCst);
        FORK_POLICY.store(policy.to_raw(), Ordering::SeqCst);

        let mut scope = DeferredSignals {
            previous: Vec::with_capacity(WATCHED.len()),
            finished: false,
            _lock: lock,
        };
        for signal in WATCHED {
            // On error the partially built scope restores what it installed
            let previous = install_handler(signal, capture_signal)?;
            PREVIOUS_HANDLER[signal.index()].store(previous.sa_sigaction, Ordering::SeqCst);
            PREVIOUS_FLAGS[signal.index()].store(previous.sa_flags, Ordering::SeqCst);
            scope.previous.push((signal, previous));
        }
        Ok(scope)
    }

    /// The signal recorded so far, if any.
    pub fn captured(&self) -> Option<Signal> {
        Signal::from_raw(CAPTURED.load(Ordering::SeqCst))
    }

    /// Ends the scope and returns the signal that was deferred, if any.
    ///
    /// The previous handler has already run for it when this returns.
    pub fn finish(mut self) -> Option<Signal> {
        self.exit()
    }

    fn exit(&mut self) -> Option<Signal> {
        if self.finished {
            return None;
        }
        self.finished = true;

        for (signal, previous) in self.previous.drain(..).rev() {
            if let Err(e) = restore_handler(signal, &previous) {
                error!("Failed to restore handler: {e}");
            }
        }
        IN_SCOPE.with(|flag| flag.set(false));

        let captured = Signal::from_raw(CAPTURED.swap(0, Ordering::SeqCst));
        if let Some(signal) = captured {
            debug!("Replaying deferred {signal}");
            unsafe {
                libc::raise(signal.as_raw());
            }
        }
        captured
    }
}

impl Drop for DeferredSignals {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_process_captures() {
        for policy in [
            ForkPolicy::Forward,
            ForkPolicy::Ignore,
            ForkPolicy::IgnoreSilently,
        ] {
            assert_eq!(handler_action(42, 42, policy), HandlerAction::Capture);
        }
    }

    #[test]
    fn test_forked_child_follows_policy() {
        assert_eq!(
            handler_action(42, 43, ForkPolicy::Forward),
            HandlerAction::Forward
        );
        assert_eq!(handler_action(42, 43, ForkPolicy::Ignore), HandlerAction::Warn);
        assert_eq!(
            handler_action(42, 43, ForkPolicy::IgnoreSilently),
            HandlerAction::Ignore
        );
    }

    #[test]
    fn test_default_policy_is_silent() {
        assert_eq!(ForkPolicy::default(), ForkPolicy::IgnoreSilently);
        for policy in [
            ForkPolicy::Forward,
            ForkPolicy::Ignore,
            ForkPolicy::IgnoreSilently,
        ] {
            assert_eq!(ForkPolicy::from_raw(policy.to_raw()), policy);
        }
    }
}
