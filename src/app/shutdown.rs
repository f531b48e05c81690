//! Shutdown triggers for the dispatch loop.

use tokio_util::sync::CancellationToken;

use crate::signals::{termination_requested, Signal};

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The caller cancelled the shutdown token.
    Cancelled,
    /// Interrupt or terminate was received.
    Signal(Signal),
    /// The stream reader exited and closed the hand-off queue.
    StreamEnded,
    /// The worker pool refused a task.
    ExecutorRejected,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Cancelled => f.write_str("shutdown requested"),
            ShutdownReason::Signal(signal) => write!(f, "received {signal}"),
            ShutdownReason::StreamEnded => f.write_str("stream reader stopped"),
            ShutdownReason::ExecutorRejected => f.write_str("worker pool rejected a task"),
        }
    }
}

/// Checks the external shutdown triggers.
///
/// Signals are only consulted when `watch_signals` is set, i.e. when the
/// termination handler was installed by this process.
pub fn shutdown_requested(token: &CancellationToken, watch_signals: bool) -> Option<ShutdownReason> {
    if token.is_cancelled() {
        return Some(ShutdownReason::Cancelled);
    }
    if watch_signals {
        if let Some(signal) = termination_requested() {
            return Some(ShutdownReason::Signal(signal));
        }
    }
    None
}
