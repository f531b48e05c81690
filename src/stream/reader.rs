//! Dedicated thread moving records from a stream consumer into the
//! hand-off queue.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

use super::consumer::StreamConsumer;
use crate::config::{STREAM_READER_THREAD_NAME, WAIT_TIME_BETWEEN_POLLS};
use crate::error_handling::{PipelineEvent, PipelineStats, StreamError};
use crate::models::Record;
use crate::sync::Latch;

/// Builds the consumer on the reader thread.
pub type ConsumerProvider =
    Box<dyn FnOnce() -> Result<Box<dyn StreamConsumer>, StreamError> + Send + 'static>;

/// Lifecycle of the reader thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReaderState {
    Connecting = 0,
    Polling = 1,
    Yielding = 2,
    Stopping = 3,
    Stopped = 4,
}

impl ReaderState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ReaderState::Connecting,
            1 => ReaderState::Polling,
            2 => ReaderState::Yielding,
            3 => ReaderState::Stopping,
            _ => ReaderState::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub poll_timeout: Duration,
    /// How long to wait for the stop flag after each poll.
    pub wait_between_polls: Duration,
    /// Discard the rest of the current batch once stop is requested.
    pub drop_on_abort: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            poll_timeout: Duration::from_millis(crate::config::DEFAULT_POLL_TIMEOUT_MS),
            wait_between_polls: WAIT_TIME_BETWEEN_POLLS,
            drop_on_abort: false,
        }
    }
}

/// Disconnects the consumer however the read loop ends.
struct ConnectedConsumer(Box<dyn StreamConsumer>);

impl Drop for ConnectedConsumer {
    fn drop(&mut self) {
        if let Err(e) = self.0.disconnect() {
            warn!("Failed to disconnect stream consumer: {e}");
        }
    }
}

struct ReaderShared {
    stop: Latch,
    state: AtomicU8,
    stats: Arc<PipelineStats>,
}

impl ReaderShared {
    fn set_state(&self, state: ReaderState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Handle to the stream reader thread.
///
/// The thread polls the consumer, decodes every message and pushes the
/// records onto the queue in the order each batch lists them. It checks the
/// stop flag between polls, so stopping takes at most one poll timeout plus
/// the wait between polls.
pub struct StreamReader {
    shared: Arc<ReaderShared>,
    handle: Option<JoinHandle<Result<(), StreamError>>>,
}

impl StreamReader {
    /// Spawns the reader thread and waits until its consumer is connected.
    ///
    /// # Errors
    ///
    /// Returns the consumer's creation or connection error; the thread has
    /// already exited in that case.
    pub fn start(
        provider: ConsumerProvider,
        queue: Sender<Record>,
        options: ReaderOptions,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, StreamError> {
        let shared = Arc::new(ReaderShared {
            stop: Latch::new(),
            state: AtomicU8::new(ReaderState::Connecting as u8),
            stats,
        });
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(STREAM_READER_THREAD_NAME.to_string())
            .spawn(move || {
                let result = run(provider, queue, &options, &thread_shared, ready_tx);
                thread_shared.set_state(ReaderState::Stopped);
                if let Err(e) = &result {
                    error!("Stream reader stopped with error: {e}");
                }
                result
            })?;

        let mut reader = StreamReader {
            shared,
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(()) => Ok(reader),
            // The thread exited before connecting; it has the error
            Err(_) => match reader.join() {
                Err(e) => Err(e),
                Ok(()) => Err(StreamError::NotConnected),
            },
        }
    }

    /// Asks the thread to stop after the current poll cycle.
    pub fn stop(&self) {
        debug!("Stopping stream reader");
        self.shared.stop.set();
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::from_raw(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the thread to exit and returns how its loop ended.
    pub fn join(&mut self) -> Result<(), StreamError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!("Stream reader thread panicked");
                Ok(())
            }
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            let _ = self.join();
        }
    }
}

fn run(
    provider: ConsumerProvider,
    queue: Sender<Record>,
    options: &ReaderOptions,
    shared: &ReaderShared,
    ready: Sender<()>,
) -> Result<(), StreamError> {
    shared.set_state(ReaderState::Connecting);
    let mut consumer = provider()?;
    consumer.connect()?;
    let mut consumer = ConnectedConsumer(consumer);
    let _ = ready.send(());
    info!("Stream reader connected");

    loop {
        shared.set_state(ReaderState::Polling);
        let batch = consumer.0.poll(options.poll_timeout)?;

        shared.set_state(ReaderState::Yielding);
        let mut discarded = 0;
        for message in batch.into_values().flatten() {
            if options.drop_on_abort && shared.stop.is_set() {
                discarded += 1;
                continue;
            }
            match message.value() {
                Ok(record) => {
                    shared.stats.increment(PipelineEvent::Received);
                    if queue.send(record).is_err() {
                        info!("Hand-off queue closed, stopping stream reader");
                        shared.set_state(ReaderState::Stopping);
                        return Ok(());
                    }
                }
                Err(e) => {
                    shared.stats.increment(PipelineEvent::DecodeFailed);
                    warn!(
                        "Skipping undecodable message (partition {}, offset {}): {e}",
                        message.partition, message.offset
                    );
                }
            }
        }
        if discarded > 0 {
            info!("Stop requested, discarded {discarded} messages from the current batch");
        }

        if shared.stop.wait_timeout(options.wait_between_polls) {
            break;
        }
    }

    shared.set_state(ReaderState::Stopping);
    debug!("Stream reader leaving poll loop");
    Ok(())
}
