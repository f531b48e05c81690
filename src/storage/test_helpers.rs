//! Shared test helpers for storage module tests.

use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::runtime::Runtime;

use super::{BoundedPool, MetricsStore, SqliteConnectionPool, BUNDLED_SCHEMA};
use crate::initialization::init_storage_runtime;

/// A schema-initialized database in a temp file, with its own runtime.
///
/// Field order matters: the store is dropped before the runtime and the file.
#[allow(dead_code)] // runtime and file are only held for their lifetime
pub struct TestDatabase {
    pub store: MetricsStore,
    pub runtime: Runtime,
    pub file: NamedTempFile,
}

impl TestDatabase {
    pub fn new(max_connections: usize) -> Self {
        let file = NamedTempFile::new().expect("Failed to create temp database file");
        let runtime = init_storage_runtime(2).expect("Failed to build storage runtime");
        let url = format!("sqlite:{}", file.path().display());
        let inner = SqliteConnectionPool::connect(&url, 1, max_connections, runtime.handle().clone())
            .expect("Failed to open test database");
        let pool = BoundedPool::new(inner, Duration::from_millis(50))
            .with_abort_poll(Duration::from_millis(10));
        let store = MetricsStore::new(Arc::new(pool));
        store
            .initialize_db(BUNDLED_SCHEMA)
            .expect("Failed to initialize schema");
        TestDatabase {
            store,
            runtime,
            file,
        }
    }
}
