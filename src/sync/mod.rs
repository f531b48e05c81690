//! Blocking synchronization primitives shared by the pipeline stages.
//!
//! - [`Semaphore`]: a counting permit with timed acquisition and RAII release
//! - [`Latch`]: a one-way flag that threads can wait on with a timeout

mod latch;
mod semaphore;

pub use latch::Latch;
pub use semaphore::{OwnedPermit, Semaphore};
