//! Logger initialization.
//!
//! This module provides functions to initialize the logger with custom formatting.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::config::LogFormat;
use crate::error_handling::InitializationError;
use colored::*;
use log::LevelFilter;

/// Initializes the logger with the specified level and format.
///
/// Configures `env_logger` with custom formatting. Supports both plain text
/// (with colors and emojis) and JSON formats for structured logging. Both
/// include the name of the thread that logged, since most work happens on
/// the stream reader and worker threads.
///
/// The logger reads from the `RUST_LOG` environment variable by default, but
/// the provided `level` parameter will override it.
///
/// # Errors
///
/// Returns `InitializationError::LoggerError` if logger initialization fails.
///
/// # Examples
///
/// ```bash
/// # Per-module filtering via RUST_LOG
/// RUST_LOG=site_metrics_sink::storage=debug site_metrics_sink --topic-name metrics
/// ```
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitializationError> {
    colored::control::set_override(true);
    let mut builder = configured_builder(level, format);
    builder.try_init().map_err(InitializationError::from)?;
    Ok(())
}

/// Like [`init_logger_with`], but appends to `path` instead of stderr.
///
/// Colors are turned off for file output.
///
/// # Errors
///
/// Returns `InitializationError::LoggerSetupError` if the file can't be opened.
pub fn init_logger_to_file(
    level: LevelFilter,
    format: LogFormat,
    path: &Path,
) -> Result<(), InitializationError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            InitializationError::LoggerSetupError(format!(
                "cannot open log file {}: {e}",
                path.display()
            ))
        })?;
    colored::control::set_override(false);

    let mut builder = configured_builder(level, format);
    builder.target(env_logger::Target::Pipe(Box::new(file)));
    builder.try_init().map_err(InitializationError::from)?;
    Ok(())
}

fn configured_builder(level: LevelFilter, format: LogFormat) -> env_logger::Builder {
    // Read from RUST_LOG environment variable first, then override with CLI arg
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.filter_module("sqlx", LevelFilter::Info);
    builder.filter_module("site_metrics_sink", level);

    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                let thread = std::thread::current();
                writeln!(
                    buf,
                    "{{\"ts\":{},\"level\":\"{}\",\"target\":\"{}\",\"thread\":{},\"msg\":{}}}",
                    chrono::Utc::now().timestamp_millis(),
                    record.level(),
                    record.target(),
                    serde_json::to_string(thread.name().unwrap_or("unnamed"))
                        .unwrap_or_else(|_| "\"\"".into()),
                    serde_json::to_string(&record.args().to_string())
                        .unwrap_or_else(|_| "\"\"".into())
                )
            });
        }
        LogFormat::Plain => {
            builder.format(|buf, record| {
                let (emoji, level) = level_badge(record.level());
                let thread = std::thread::current();
                let origin = format!("{}({})", record.target(), thread.name().unwrap_or("unnamed"));
                writeln!(
                    buf,
                    "{emoji} {} {} [{level}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    origin.cyan(),
                    record.args()
                )
            });
        }
    }
    builder
}

fn level_badge(level: log::Level) -> (&'static str, ColoredString) {
    let name = level.to_string();
    match level {
        log::Level::Error => ("❌", name.red()),
        log::Level::Warn => ("⚠️", name.yellow()),
        log::Level::Info => ("✔️", name.green()),
        log::Level::Debug => ("🔍", name.blue()),
        log::Level::Trace => ("🔬", name.purple()),
    }
}
