//! Application initialization and resource setup.
//!
//! This module provides functions to initialize shared resources:
//! - Logger (stderr or file, plain or JSON)
//! - The runtime that drives database I/O

mod logger;
mod runtime;

// Re-export public API
pub use logger::{init_logger_to_file, init_logger_with};
pub use runtime::init_storage_runtime;
