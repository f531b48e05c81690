//! Pipeline statistics tracking.
//!
//! Thread-safe counters for what happened to each record on its way from the
//! stream to the database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use strum::IntoEnumIterator;
use strum_macros::EnumIter as EnumIterMacro;

/// Events counted by [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum PipelineEvent {
    /// Record decoded by the stream reader and enqueued.
    Received,
    /// Payload the stream reader could not decode.
    DecodeFailed,
    /// Record handed to the worker pool.
    Dispatched,
    /// Record dropped because no admission permit became free in time.
    Dropped,
    /// Record written to the database.
    Persisted,
    /// Persistence failed with a database or connection error.
    PersistFailed,
    /// Worker gave up waiting for a connection because the pool was aborted.
    Aborted,
}

impl PipelineEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEvent::Received => "Records received",
            PipelineEvent::DecodeFailed => "Undecodable messages",
            PipelineEvent::Dispatched => "Records dispatched",
            PipelineEvent::Dropped => "Records dropped (admission timeout)",
            PipelineEvent::Persisted => "Records persisted",
            PipelineEvent::PersistFailed => "Persistence failures",
            PipelineEvent::Aborted => "Records aborted during shutdown",
        }
    }
}

impl std::fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-safe pipeline statistics tracker.
///
/// All event types are initialized to zero on creation; share it with `Arc`.
pub struct PipelineStats {
    counters: HashMap<PipelineEvent, AtomicUsize>,
}

impl PipelineStats {
    pub fn new() -> Self {
        let mut counters = HashMap::new();
        for event in PipelineEvent::iter() {
            counters.insert(event, AtomicUsize::new(0));
        }
        PipelineStats { counters }
    }

    pub fn increment(&self, event: PipelineEvent) {
        if let Some(counter) = self.counters.get(&event) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment counter for {:?} which is not in the map",
                event
            );
        }
    }

    pub fn get(&self, event: PipelineEvent) -> usize {
        self.counters
            .get(&event)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Snapshot of every counter, in declaration order.
    pub fn snapshot(&self) -> Vec<(PipelineEvent, usize)> {
        PipelineEvent::iter().map(|e| (e, self.get(e))).collect()
    }

    /// Records that left the pipeline without being persisted.
    pub fn total_lost(&self) -> usize {
        self.get(PipelineEvent::Dropped)
            + self.get(PipelineEvent::PersistFailed)
            + self.get(PipelineEvent::Aborted)
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
