// Shared test helpers for pipeline setup and database inspection.
//
// This module provides common utilities used across multiple test files to reduce duplication.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use site_metrics_sink::app::PipelineTimings;
use site_metrics_sink::initialization::init_storage_runtime;
use site_metrics_sink::storage::{BoundedPool, MetricsStore, SqliteConnectionPool, WebsiteRow};
use site_metrics_sink::{Config, Record};

/// SQLite URL for a database file.
#[allow(dead_code)] // Used by other test files
pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}", path.display())
}

/// A config with small pools and short timeouts, suitable for tests.
#[allow(dead_code)]
pub fn test_config(consumer_type: &str, topic: &str, db_path: &Path) -> Config {
    Config {
        stream_consumer_type: consumer_type.to_string(),
        topic_name: topic.to_string(),
        database_url: sqlite_url(db_path),
        db_pool_min_conn: 1,
        db_pool_max_conn: 3,
        db_pool_block_timeout_secs: 1,
        thread_pool_queue_max_size: 100,
        thread_pool_max_workers: 3,
        thread_pool_block_timeout_secs: 2,
        poll_timeout_ms: 20,
        poll_max_records: 50,
        ..Default::default()
    }
}

/// Loop timings short enough to keep tests fast.
#[allow(dead_code)]
pub fn fast_timings() -> PipelineTimings {
    PipelineTimings {
        dispatch_tick: Duration::from_millis(10),
        wait_between_polls: Duration::from_millis(5),
        abort_poll: Duration::from_millis(10),
        progress_interval: Duration::from_secs(60),
    }
}

/// A record for `site{n}.test` with the given status code.
#[allow(dead_code)]
pub fn sample_record(n: usize, error_code: i64) -> Record {
    Record::new(
        format!("https://site{n}.test"),
        "Example Domain",
        error_code,
        0.05 * n as f64,
        if error_code == 200 { "Example Domain" } else { "" },
    )
}

/// Polls `condition` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Counts written by a finished run, read through a fresh pool.
#[allow(dead_code)]
pub fn read_back(db_path: &Path) -> (Vec<WebsiteRow>, i64) {
    let runtime = init_storage_runtime(1).expect("Failed to build runtime");
    let inner = SqliteConnectionPool::connect(&sqlite_url(db_path), 0, 1, runtime.handle().clone())
        .expect("Failed to reopen database");
    let store = MetricsStore::new(Arc::new(BoundedPool::new(inner, Duration::from_secs(1))));
    let websites = store.websites().expect("Failed to list websites");
    let metrics = store.count_metrics().expect("Failed to count metrics");
    store.pool().close_all().expect("Failed to close pool");
    (websites, metrics)
}
