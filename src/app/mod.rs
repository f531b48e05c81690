//! Main application modules.
//!
//! This module provides the orchestrator that runs the pipeline plus the
//! logging, shutdown and statistics helpers it uses.

pub mod logging;
pub mod orchestrator;
pub mod shutdown;
pub mod statistics;

// Re-export public API
pub use logging::log_progress;
pub use orchestrator::{Orchestrator, PipelineTimings, RunReport};
pub use shutdown::{shutdown_requested, ShutdownReason};
pub use statistics::{print_pipeline_statistics, print_simple_summary};
