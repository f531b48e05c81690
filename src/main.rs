//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `site_metrics_sink` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - User-facing output formatting
//!
//! All core functionality is implemented in the library crate.

use anyhow::{Context, Result};
use clap::Parser;
use std::process;

use site_metrics_sink::initialization::{init_logger_to_file, init_logger_with};
use site_metrics_sink::{run_pipeline, Config};

fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    // Try loading from current directory first, then from the executable's directory
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    // Parse command-line arguments (and environment) into Config
    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("site_metrics_sink error: {e}");
        process::exit(2);
    }

    let log_level = config.log_level.clone();
    let log_format = config.log_format.clone();
    let logger = match &config.log_file {
        Some(path) => init_logger_to_file(log_level.into(), log_format, path),
        None => init_logger_with(log_level.into(), log_format),
    };
    logger.context("Failed to initialize logger")?;

    match run_pipeline(config) {
        Ok(report) => {
            println!(
                "✅ Persisted {} of {} record{} ({} dropped, {} failed, {} aborted) in {:.1}s - stopped: {}",
                report.persisted,
                report.received,
                if report.received == 1 { "" } else { "s" },
                report.dropped + report.discarded,
                report.failed,
                report.aborted,
                report.elapsed_seconds,
                report.reason
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("site_metrics_sink error: {:#}", e);
            process::exit(1);
        }
    }
}
