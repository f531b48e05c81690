//! Stream consumer capability.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use super::codec;
use crate::error_handling::StreamError;
use crate::models::Record;

pub type PartitionId = i32;

/// A raw message as returned by `poll`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub partition: PartitionId,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl StreamMessage {
    pub fn new(partition: PartitionId, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        StreamMessage {
            partition,
            offset,
            payload: payload.into(),
        }
    }

    /// Decodes the payload.
    pub fn value(&self) -> Result<Record, StreamError> {
        codec::decode(&self.payload)
    }
}

/// Messages from one poll, grouped by partition, each batch in offset order.
pub type PollBatch = BTreeMap<PartitionId, Vec<StreamMessage>>;

/// A client that reads messages from a topic.
pub trait StreamConsumer: Send {
    fn connect(&mut self) -> Result<(), StreamError>;

    fn disconnect(&mut self) -> Result<(), StreamError>;

    fn is_connected(&self) -> bool;

    /// Fetches the next batch, waiting up to `timeout` for messages.
    ///
    /// An empty batch means nothing arrived in time.
    fn poll(&mut self, timeout: Duration) -> Result<PollBatch, StreamError>;

    /// Lazy record-at-a-time view over this consumer.
    fn records(&mut self, poll_timeout: Duration) -> Records<'_>
    where
        Self: Sized,
    {
        Records::new(self, poll_timeout)
    }
}

/// Iterator that pulls one decoded record at a time from a consumer.
///
/// Polls only when its buffer is empty and ends at the first empty poll. Once
/// the consumer is disconnected it yields a single `StreamError::NotConnected`
/// and then ends.
pub struct Records<'a> {
    consumer: &'a mut dyn StreamConsumer,
    poll_timeout: Duration,
    buffer: VecDeque<StreamMessage>,
    done: bool,
}

impl<'a> Records<'a> {
    pub fn new(consumer: &'a mut dyn StreamConsumer, poll_timeout: Duration) -> Self {
        Records {
            consumer,
            poll_timeout,
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.buffer.is_empty() {
            if !self.consumer.is_connected() {
                self.done = true;
                return Some(Err(StreamError::NotConnected));
            }
            match self.consumer.poll(self.poll_timeout) {
                Ok(batch) => self.buffer.extend(batch.into_values().flatten()),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        match self.buffer.pop_front() {
            Some(message) => Some(message.value()),
            None => {
                self.done = true;
                None
            }
        }
    }
}
