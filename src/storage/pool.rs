//! SQLite connection pool.
//!
//! A thread-safe pool of raw sqlx connections with a hard upper bound:
//! - WAL mode and a busy timeout on every connection
//! - `min_size` connections opened up front and kept idle
//! - `get` fails with `PoolError::Exhausted` instead of blocking
//! - automatic database file creation

use std::fs::OpenOptions;
use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use tokio::runtime::Handle;

use super::bounded_pool::ConnectionPool;
use crate::config::SQLITE_BUSY_TIMEOUT;
use crate::error_handling::{DatabaseError, PoolError};

struct PoolState {
    idle: Vec<SqliteConnection>,
    checked_out: usize,
    closed: bool,
}

/// Pool of `SqliteConnection`s driven from OS threads.
///
/// Every async call is run to completion on `runtime`, so the pool can be
/// used from threads that are not part of any async runtime.
pub struct SqliteConnectionPool {
    options: SqliteConnectOptions,
    runtime: Handle,
    state: Mutex<PoolState>,
    min_size: usize,
    max_size: usize,
}

impl SqliteConnectionPool {
    /// Opens the pool against `database_url` (e.g. `sqlite:./site_metrics.db`).
    ///
    /// Creates the database file if it doesn't exist, then opens `min_size`
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::SqlError` for an invalid URL or a failed
    /// connection, `DatabaseError::FileCreationError` if the file can't be
    /// created.
    pub fn connect(
        database_url: &str,
        min_size: usize,
        max_size: usize,
        runtime: Handle,
    ) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                error!("Invalid database URL {database_url}: {e}");
                DatabaseError::SqlError(e)
            })?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(SQLITE_BUSY_TIMEOUT)
            .foreign_keys(true);

        ensure_database_file(options.get_filename())?;

        let pool = SqliteConnectionPool {
            options,
            runtime,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(max_size),
                checked_out: 0,
                closed: false,
            }),
            min_size: min_size.min(max_size),
            max_size,
        };

        for _ in 0..pool.min_size {
            let conn = pool.open().map_err(|e| {
                error!("Failed to connect to database: {e}");
                DatabaseError::SqlError(e)
            })?;
            pool.state.lock().idle.push(conn);
        }
        info!(
            "Opened SQLite pool at {} ({} idle, max {})",
            pool.options.get_filename().display(),
            pool.min_size,
            pool.max_size
        );
        Ok(pool)
    }

    /// Runs `future` to completion on the storage runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Connections currently handed out.
    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out
    }

    fn open(&self) -> Result<SqliteConnection, sqlx::Error> {
        self.block_on(self.options.connect())
    }

    fn close(&self, conn: SqliteConnection) -> Result<(), PoolError> {
        self.block_on(conn.close()).map_err(PoolError::Backend)
    }
}

impl ConnectionPool for SqliteConnectionPool {
    type Connection = SqliteConnection;

    fn max_size(&self) -> usize {
        self.max_size
    }

    fn get(&self, key: Option<&str>) -> Result<SqliteConnection, PoolError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(conn) = state.idle.pop() {
                state.checked_out += 1;
                return Ok(conn);
            }
            if state.checked_out >= self.max_size {
                return Err(PoolError::Exhausted {
                    max: self.max_size,
                });
            }
            // Reserve the slot before opening outside the lock
            state.checked_out += 1;
        }

        debug!("Opening new connection (key: {key:?})");
        self.open().map_err(|e| {
            self.state.lock().checked_out -= 1;
            PoolError::Backend(e)
        })
    }

    fn put(
        &self,
        conn: SqliteConnection,
        key: Option<&str>,
        discard: bool,
    ) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        if !state.closed && !discard && state.idle.len() < self.min_size {
            state.idle.push(conn);
            return Ok(());
        }
        drop(state);

        if discard {
            debug!("Discarding connection (key: {key:?})");
        }
        self.close(conn)
    }

    fn close_all(&self) -> Result<(), PoolError> {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        let mut result = Ok(());
        for conn in idle {
            if let Err(e) = self.close(conn) {
                warn!("Failed to close connection: {e}");
                result = Err(e);
            }
        }
        info!("Closed SQLite connection pool");
        result
    }
}

/// Creates the SQLite file if it doesn't exist yet.
fn ensure_database_file(path: &Path) -> Result<(), DatabaseError> {
    if path.as_os_str() == ":memory:" {
        return Ok(());
    }
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(_) => info!("Database file created successfully."),
        Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
            info!("Database file already exists.")
        }
        Err(e) => {
            error!("Failed to create database file: {e}");
            return Err(DatabaseError::FileCreationError(e.to_string()));
        }
    }
    Ok(())
}
