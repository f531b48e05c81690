//! One-way, waitable flag.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A flag that goes from unset to set exactly once and is never reset.
///
/// Used as the stream reader's stop flag and as the connection pool's abort
/// flag: any number of threads can observe it, and waiters can sleep on it
/// for a bounded time instead of spinning.
#[derive(Default)]
pub struct Latch {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter. Setting it again is a no-op.
    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        drop(set);
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Waits up to `timeout` for the flag to be set.
    ///
    /// Returns `true` as soon as the flag is set (immediately if it already
    /// was), `false` if the timeout elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if !*set {
            self.cond.wait_while_for(&mut set, |set| !*set, timeout);
        }
        *set
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").field("set", &self.is_set()).finish()
    }
}
