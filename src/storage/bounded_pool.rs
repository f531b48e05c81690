//! Blocking, abortable wrapper around a connection pool.
//!
//! The underlying pool fails hard when every connection is checked out. This
//! wrapper puts a counting permit in front of it so callers block instead,
//! and gives shutdown a way to release every blocked caller at once.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use log::{debug, error};

use crate::error_handling::PoolError;
use crate::sync::{Latch, Semaphore};

/// The operations [`BoundedPool`] needs from the pool it wraps.
pub trait ConnectionPool: Send + Sync {
    type Connection: Send;

    /// Upper bound on connections handed out at once.
    fn max_size(&self) -> usize;

    /// Checks out a connection. Must not block waiting for a free one.
    fn get(&self, key: Option<&str>) -> Result<Self::Connection, PoolError>;

    /// Returns a connection, closing it instead when `discard` is set.
    fn put(
        &self,
        conn: Self::Connection,
        key: Option<&str>,
        discard: bool,
    ) -> Result<(), PoolError>;

    fn close_all(&self) -> Result<(), PoolError>;
}

/// Connection pool whose `acquire` blocks while all connections are in use.
///
/// A permit is taken before every checkout and given back on every return, so
/// at most `inner.max_size()` connections are out at any time. Waiting has
/// no overall deadline: it proceeds in slices of `block_timeout`, and between
/// slices the waiter checks the abort flag. Once [`BoundedPool::abort`] has
/// been called, every waiter fails with `PoolError::Aborted` at its next
/// slice boundary. Callers already holding a connection are not affected.
pub struct BoundedPool<P: ConnectionPool> {
    inner: P,
    permits: Semaphore,
    abort: Latch,
    block_timeout: Duration,
    abort_poll: Duration,
}

impl<P: ConnectionPool> BoundedPool<P> {
    pub fn new(inner: P, block_timeout: Duration) -> Self {
        let permits = Semaphore::new(inner.max_size());
        BoundedPool {
            inner,
            permits,
            abort: Latch::new(),
            block_timeout,
            abort_poll: crate::config::ABORT_POLL_INTERVAL,
        }
    }

    /// How long a waiter listens for `abort` after each timed-out slice.
    pub fn with_abort_poll(mut self, abort_poll: Duration) -> Self {
        self.abort_poll = abort_poll;
        self
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_set()
    }

    /// Checks out a connection, blocking until one is free.
    ///
    /// # Errors
    ///
    /// `PoolError::Aborted` if the pool was aborted while waiting, or any
    /// error from the underlying `get` (the permit is released first).
    pub fn acquire(&self, key: Option<&str>) -> Result<PooledConnection<'_, P>, PoolError> {
        loop {
            if self.permits.acquire_timeout(self.block_timeout) {
                let conn = match self.inner.get(key) {
                    Ok(conn) => conn,
                    Err(e) => {
                        self.permits.release();
                        return Err(e);
                    }
                };
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                    key: key.map(str::to_string),
                });
            }

            if self.abort.wait_timeout(self.abort_poll) {
                debug!("Connection wait aborted (key: {key:?})");
                return Err(PoolError::Aborted);
            }
            debug!("Still waiting for a free connection (key: {key:?})");
        }
    }

    /// Returns `conn` to the underlying pool and releases its permit.
    ///
    /// The permit is released even when the underlying return fails.
    pub fn release(
        &self,
        conn: P::Connection,
        key: Option<&str>,
        discard: bool,
    ) -> Result<(), PoolError> {
        let result = self.inner.put(conn, key, discard);
        self.permits.release();
        result
    }

    /// Makes every current and future waiter fail with `PoolError::Aborted`.
    pub fn abort(&self) {
        debug!("Aborting connection pool waiters");
        self.abort.set();
    }

    pub fn close_all(&self) -> Result<(), PoolError> {
        self.inner.close_all()
    }
}

/// A checked-out connection. Returned to the pool when dropped.
pub struct PooledConnection<'a, P: ConnectionPool> {
    pool: &'a BoundedPool<P>,
    conn: Option<P::Connection>,
    key: Option<String>,
}

impl<P: ConnectionPool> PooledConnection<'_, P> {
    /// Returns the connection now, closing it if `discard` is set.
    pub fn release(mut self, discard: bool) -> Result<(), PoolError> {
        match self.conn.take() {
            Some(conn) => self.pool.release(conn, self.key.as_deref(), discard),
            None => Ok(()),
        }
    }
}

impl<P: ConnectionPool> Deref for PooledConnection<'_, P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `release` and `drop` take the connection, and both consume the guard
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<P: ConnectionPool> DerefMut for PooledConnection<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<P: ConnectionPool> Drop for PooledConnection<'_, P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self.pool.release(conn, self.key.as_deref(), false) {
                error!("Failed to return connection to pool: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    /// Counts calls and hands out numbered fake connections.
    #[derive(Default)]
    struct CountingPool {
        max: usize,
        gets: AtomicUsize,
        puts: AtomicUsize,
        discards: AtomicUsize,
        fail_get: AtomicBool,
        fail_put: AtomicBool,
    }

    impl CountingPool {
        fn new(max: usize) -> Self {
            CountingPool {
                max,
                ..Default::default()
            }
        }
    }

    impl ConnectionPool for CountingPool {
        type Connection = usize;

        fn max_size(&self) -> usize {
            self.max
        }

        fn get(&self, _key: Option<&str>) -> Result<usize, PoolError> {
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(PoolError::Closed);
            }
            Ok(self.gets.fetch_add(1, Ordering::SeqCst))
        }

        fn put(&self, _conn: usize, _key: Option<&str>, discard: bool) -> Result<(), PoolError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if discard {
                self.discards.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail_put.load(Ordering::SeqCst) {
                return Err(PoolError::Closed);
            }
            Ok(())
        }

        fn close_all(&self) -> Result<(), PoolError> {
            Ok(())
        }
    }

    fn pool(max: usize) -> Arc<BoundedPool<CountingPool>> {
        Arc::new(
            BoundedPool::new(CountingPool::new(max), Duration::from_millis(20))
                .with_abort_poll(Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_acquire_blocks_when_all_held() {
        let pool = pool(2);
        let a = pool.acquire(None).unwrap();
        let _b = pool.acquire(None).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let conn = pool.acquire(Some("waiter")).map(|c| *c);
                tx.send(()).unwrap();
                conn
            })
        };

        // Still blocked after several slices
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(a);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(pool.inner().gets.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_release_unblocks_exactly_one_waiter() {
        let pool = pool(1);
        let held = pool.acquire(None).unwrap();
        let proceeded = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let proceeded = Arc::clone(&proceeded);
                thread::spawn(move || match pool.acquire(None) {
                    Ok(conn) => {
                        proceeded.fetch_add(1, Ordering::SeqCst);
                        // Hold on to it until the pool is aborted
                        while !pool.is_aborted() {
                            thread::sleep(Duration::from_millis(5));
                        }
                        drop(conn);
                    }
                    Err(PoolError::Aborted) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        drop(held);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(proceeded.load(Ordering::SeqCst), 1);

        pool.abort();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_abort_unblocks_all_waiters_without_inner_get() {
        let pool = pool(2);
        let _a = pool.acquire(None).unwrap();
        let _b = pool.acquire(None).unwrap();
        assert_eq!(pool.inner().gets.load(Ordering::SeqCst), 2);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.acquire(None).map(|_| ()))
            })
            .collect();
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        pool.abort();
        for waiter in waiters {
            assert!(matches!(waiter.join().unwrap(), Err(PoolError::Aborted)));
        }
        // One slice plus one abort poll, with slack for scheduling
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(pool.inner().gets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_get_releases_permit() {
        let pool = pool(1);
        pool.inner().fail_get.store(true, Ordering::SeqCst);
        assert!(matches!(pool.acquire(None), Err(PoolError::Closed)));
        assert_eq!(pool.available_permits(), 1);
    }

    #[test]
    fn test_failed_put_still_releases_permit() {
        let pool = pool(1);
        let conn = pool.acquire(None).unwrap();
        pool.inner().fail_put.store(true, Ordering::SeqCst);
        assert!(conn.release(true).is_err());
        assert_eq!(pool.available_permits(), 1);
        assert_eq!(pool.inner().discards.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_returns_connection() {
        let pool = pool(1);
        {
            let _conn = pool.acquire(Some("k")).unwrap();
            assert_eq!(pool.available_permits(), 0);
        }
        assert_eq!(pool.available_permits(), 1);
        assert_eq!(pool.inner().puts.load(Ordering::SeqCst), 1);
        assert_eq!(pool.inner().discards.load(Ordering::SeqCst), 0);
    }
}
