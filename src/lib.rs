//! site_metrics_sink library: persists website health metrics from a stream
//!
//! Records are read from a message stream on a dedicated thread, handed to a
//! bounded pool of worker threads, and written to SQLite through a bounded
//! connection pool. Interrupts arriving while the pipeline starts up or
//! shuts down are held back until that sequence has finished.
//!
//! # Example
//!
//! ```no_run
//! use site_metrics_sink::{run_pipeline, Config};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config {
//!     topic_name: "website-metrics".to_string(),
//!     database_url: "sqlite:metrics.db".to_string(),
//!     ..Default::default()
//! };
//!
//! let report = run_pipeline(config)?;
//! println!("Persisted {} of {} records", report.persisted, report.received);
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! Unix only: signal deferral is built on `sigaction`. The library starts
//! its own Tokio runtime for database I/O, so callers must not invoke
//! [`run_pipeline`] from inside an async context.

pub mod app;
pub mod config;
pub mod error_handling;
pub mod executor;
pub mod initialization;
pub mod models;
pub mod signals;
pub mod storage;
pub mod stream;
pub mod sync;

// Re-export public API
pub use app::{Orchestrator, PipelineTimings, RunReport, ShutdownReason};
pub use config::{Config, LogFormat, LogLevel, OffsetReset};
pub use models::Record;

/// Runs the pipeline with `config` until interrupted or the stream ends.
///
/// # Errors
///
/// See [`Orchestrator::run`].
pub fn run_pipeline(config: Config) -> anyhow::Result<RunReport> {
    Orchestrator::new(config).run()
}
