//! Configuration constants.
//!
//! Defaults for every environment option plus the fixed timings of the
//! pipeline stages.

use std::time::Duration;

// Environment defaults
pub const DEFAULT_STREAM_CONSUMER_TYPE: &str = "JsonLinesStreamConsumer";
pub const DEFAULT_STREAM_DIR: &str = "./data/stream";
pub const DEFAULT_CONSUMER_GROUP: &str = "MetricsCG";
pub const DEFAULT_CLIENT_ID: &str = "MetricsConsumer1";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./site_metrics.db";
pub const DEFAULT_DB_POOL_MIN_CONN: usize = 4;
pub const DEFAULT_DB_POOL_MAX_CONN: usize = 15;
pub const DEFAULT_DB_POOL_BLOCK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_THREAD_POOL_QUEUE_MAX_SIZE: usize = 300;
pub const DEFAULT_THREAD_POOL_BLOCK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_POLL_MAX_RECORDS: usize = 500;
/// Worker threads per CPU when `THREAD_POOL_MAX_WORKERS` is not set.
pub const WORKERS_PER_CPU: usize = 5;

/// Seconds between progress lines in the dispatch loop.
pub const LOGGING_INTERVAL: u64 = 5;

/// How long the stream reader waits for the stop flag after each poll.
pub const WAIT_TIME_BETWEEN_POLLS: Duration = Duration::from_secs(1);
/// How long a connection waiter listens for abort after each timed-out slice.
pub const ABORT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Dispatch loop wake-up interval for checking shutdown requests.
pub const DISPATCH_TICK: Duration = Duration::from_millis(200);
/// Sleep between end-of-file checks of a JSON-lines topic.
pub const JSONL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// SQLite busy timeout. Writers queue behind `BEGIN IMMEDIATE`.
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(30);
/// Threads of the runtime that drives sqlx.
pub const STORAGE_RUNTIME_THREADS: usize = 2;

pub const STREAM_READER_THREAD_NAME: &str = "StreamConsumerThread";
pub const WORKER_THREAD_PREFIX: &str = "MetricsWorker";
