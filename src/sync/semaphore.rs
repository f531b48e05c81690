//! Counting semaphore with timed acquisition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A bounded counting semaphore for OS threads.
///
/// The number of available permits never exceeds the capacity the semaphore
/// was created with. Releasing more permits than were acquired is logged and
/// ignored.
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
    capacity: usize,
}

impl Semaphore {
    /// Creates a semaphore with `capacity` permits, all of them available.
    pub fn new(capacity: usize) -> Self {
        Semaphore {
            permits: Mutex::new(capacity),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Total number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits that can be acquired right now.
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }

    /// Takes one permit, blocking for at most `timeout`.
    ///
    /// Returns `false` if no permit became available in time. A timeout too
    /// large to express as a deadline waits without one.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut permits = self.permits.lock();
        while *permits == 0 {
            let Some(deadline) = deadline else {
                self.available.wait(&mut permits);
                continue;
            };
            if self
                .available
                .wait_until(&mut permits, deadline)
                .timed_out()
                && *permits == 0
            {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    /// Takes one permit without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Returns one permit and wakes a single waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        if *permits >= self.capacity {
            log::error!(
                "Semaphore released more times than acquired (capacity: {})",
                self.capacity
            );
            return;
        }
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    /// Like [`Semaphore::acquire_timeout`], but the permit is handed back as a
    /// guard that releases it when dropped.
    pub fn acquire_owned_timeout(self: &Arc<Self>, timeout: Duration) -> Option<OwnedPermit> {
        if self.acquire_timeout(timeout) {
            Some(OwnedPermit {
                semaphore: Arc::clone(self),
            })
        } else {
            None
        }
    }
}

/// A permit that returns itself to its [`Semaphore`] on drop.
///
/// Dropping is the only way to release it, so each acquisition is released
/// exactly once, including when the holder unwinds.
#[must_use = "the permit is released as soon as it is dropped"]
pub struct OwnedPermit {
    semaphore: Arc<Semaphore>,
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

impl std::fmt::Debug for OwnedPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedPermit")
            .field("available", &self.semaphore.available_permits())
            .finish()
    }
}
