//! Thread-based task execution.
//!
//! - [`WorkerPool`]: a fixed set of named OS threads fed by an unbounded queue
//! - [`BoundedExecutor`]: the admission gate in front of a `WorkerPool`

mod bounded;
mod worker_pool;

pub use bounded::BoundedExecutor;
pub use worker_pool::{TaskHandle, WorkerPool};
