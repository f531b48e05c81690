//! Error handling and pipeline statistics.
//!
//! This module provides:
//! - Error types for each pipeline stage
//! - Atomic counters for pipeline events

mod stats;
mod types;

pub use stats::{PipelineEvent, PipelineStats};
pub use types::{
    ConfigError, DatabaseError, ExecutorError, InitializationError, PoolError, SignalError,
    StreamError,
};
