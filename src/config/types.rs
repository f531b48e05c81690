//! Configuration types and CLI options.
//!
//! Every option can be given on the command line or through the environment
//! variable named next to it; a `.env` file is loaded before parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use crate::config::constants::*;
use crate::error_handling::ConfigError;
use crate::stream::StreamSettings;

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Where a consumer group without a committed offset starts reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OffsetReset {
    /// From the first message in the topic
    #[default]
    Earliest,
    /// Only messages published after connecting
    Latest,
}

/// Accepts `0`/`1` as well as `true`/`false` (case-insensitive).
fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("expected 0/1 or true/false, got {other:?}")),
    }
}

fn default_max_workers() -> usize {
    num_cpus::get() * WORKERS_PER_CPU
}

/// Pipeline configuration.
///
/// # Examples
///
/// ```no_run
/// use site_metrics_sink::Config;
///
/// let config = Config {
///     topic_name: "website-metrics".to_string(),
///     thread_pool_max_workers: 8,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Parser)]
#[command(
    name = "site_metrics_sink",
    about = "Persist website health metrics from a message stream into SQLite"
)]
pub struct Config {
    /// Registered stream consumer type
    #[arg(long, env = "STREAM_CONSUMER_TYPE", default_value = DEFAULT_STREAM_CONSUMER_TYPE)]
    pub stream_consumer_type: String,

    /// Directory holding JSON-lines topics and committed offsets
    #[arg(long, env = "STREAM_DIR", default_value = DEFAULT_STREAM_DIR)]
    pub stream_dir: PathBuf,

    /// Topic to consume
    #[arg(long, env = "TOPIC_NAME")]
    pub topic_name: String,

    #[arg(long, env = "CONSUMER_GROUP", default_value = DEFAULT_CONSUMER_GROUP)]
    pub consumer_group: String,

    #[arg(long, env = "CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    /// Start position for a consumer group without a committed offset
    #[arg(long, env = "AUTO_OFFSET_RESET", value_enum, default_value_t = OffsetReset::Earliest)]
    pub auto_offset_reset: OffsetReset,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Schema file to run at startup instead of the bundled one
    #[arg(long, env = "SQL_SCHEMA_PATH")]
    pub sql_schema_path: Option<PathBuf>,

    /// Connections opened at startup and kept idle
    #[arg(long, env = "DB_POOL_MIN_CONN", default_value_t = DEFAULT_DB_POOL_MIN_CONN)]
    pub db_pool_min_conn: usize,

    /// Maximum concurrent connections
    #[arg(long, env = "DB_POOL_MAX_CONN", default_value_t = DEFAULT_DB_POOL_MAX_CONN)]
    pub db_pool_max_conn: usize,

    /// Seconds per wait slice when all connections are in use
    #[arg(long, env = "DB_POOL_BLOCK_TIMEOUT_SECS", default_value_t = DEFAULT_DB_POOL_BLOCK_TIMEOUT_SECS)]
    pub db_pool_block_timeout_secs: u64,

    /// Records allowed to wait for a worker
    #[arg(long, env = "THREAD_POOL_QUEUE_MAX_SIZE", default_value_t = DEFAULT_THREAD_POOL_QUEUE_MAX_SIZE)]
    pub thread_pool_queue_max_size: usize,

    /// Worker threads (default: 5 per CPU)
    #[arg(long, env = "THREAD_POOL_MAX_WORKERS", default_value_t = default_max_workers())]
    pub thread_pool_max_workers: usize,

    /// Seconds to wait for a free slot before dropping a record
    #[arg(long, env = "THREAD_POOL_BLOCK_TIMEOUT_SECS", default_value_t = DEFAULT_THREAD_POOL_BLOCK_TIMEOUT_SECS)]
    pub thread_pool_block_timeout_secs: u64,

    /// Stream poll timeout in milliseconds
    #[arg(long, env = "POLL_TIMEOUT_MS", default_value_t = DEFAULT_POLL_TIMEOUT_MS)]
    pub poll_timeout_ms: u64,

    /// Maximum messages returned by one poll
    #[arg(long, env = "POLL_MAX_RECORDS", default_value_t = DEFAULT_POLL_MAX_RECORDS)]
    pub poll_max_records: usize,

    /// Discard queued records on shutdown instead of persisting them
    #[arg(
        long,
        env = "DROP_MESSAGES_IF_ABORT",
        default_value = "false",
        value_parser = parse_flag,
        action = ArgAction::Set
    )]
    pub drop_messages_if_abort: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_consumer_type: DEFAULT_STREAM_CONSUMER_TYPE.to_string(),
            stream_dir: PathBuf::from(DEFAULT_STREAM_DIR),
            topic_name: "website-metrics".to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            sql_schema_path: None,
            db_pool_min_conn: DEFAULT_DB_POOL_MIN_CONN,
            db_pool_max_conn: DEFAULT_DB_POOL_MAX_CONN,
            db_pool_block_timeout_secs: DEFAULT_DB_POOL_BLOCK_TIMEOUT_SECS,
            thread_pool_queue_max_size: DEFAULT_THREAD_POOL_QUEUE_MAX_SIZE,
            thread_pool_max_workers: default_max_workers(),
            thread_pool_block_timeout_secs: DEFAULT_THREAD_POOL_BLOCK_TIMEOUT_SECS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            poll_max_records: DEFAULT_POLL_MAX_RECORDS,
            drop_messages_if_abort: false,
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            log_file: None,
        }
    }
}

impl Config {
    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_name.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if self.db_pool_max_conn == 0 {
            return Err(ConfigError::Zero("DB_POOL_MAX_CONN"));
        }
        if self.db_pool_min_conn > self.db_pool_max_conn {
            return Err(ConfigError::PoolBounds {
                min: self.db_pool_min_conn,
                max: self.db_pool_max_conn,
            });
        }
        if self.thread_pool_max_workers == 0 {
            return Err(ConfigError::Zero("THREAD_POOL_MAX_WORKERS"));
        }
        if self.poll_max_records == 0 {
            return Err(ConfigError::Zero("POLL_MAX_RECORDS"));
        }
        Ok(())
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            stream_dir: self.stream_dir.clone(),
            topic_name: self.topic_name.clone(),
            consumer_group: self.consumer_group.clone(),
            client_id: self.client_id.clone(),
            auto_offset_reset: self.auto_offset_reset,
            max_poll_records: self.poll_max_records,
        }
    }

    pub fn db_pool_block_timeout(&self) -> Duration {
        Duration::from_secs(self.db_pool_block_timeout_secs)
    }

    pub fn thread_pool_block_timeout(&self) -> Duration {
        Duration::from_secs(self.thread_pool_block_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
