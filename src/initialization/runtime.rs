//! Runtime that drives database I/O.
//!
//! The pipeline runs on plain OS threads. sqlx is async, so worker threads
//! hand their queries to this runtime with `Handle::block_on`.

use tokio::runtime::{Builder, Runtime};

use crate::error_handling::InitializationError;

/// Builds the multi-threaded runtime used by the SQLite connection pool.
///
/// # Errors
///
/// Returns `InitializationError::RuntimeError` if the runtime threads cannot
/// be spawned.
pub fn init_storage_runtime(worker_threads: usize) -> Result<Runtime, InitializationError> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name("storage-io")
        .enable_all()
        .build()?;
    Ok(runtime)
}
