//! In-process topic for tests and embedding callers.
//!
//! Topics are looked up by name in a process-wide registry, so a producer
//! and a consumer created separately (for instance through the factories)
//! share the same messages.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::codec;
use super::consumer::{PartitionId, PollBatch, StreamConsumer, StreamMessage};
use super::producer::StreamProducer;
use crate::error_handling::StreamError;
use crate::models::Record;

#[derive(Default)]
struct TopicState {
    partitions: BTreeMap<PartitionId, Vec<Vec<u8>>>,
    // (consumer group, partition) -> next offset
    cursors: HashMap<(String, PartitionId), usize>,
}

impl TopicState {
    fn has_unread(&self, group: &str) -> bool {
        self.partitions.iter().any(|(partition, messages)| {
            let cursor = self
                .cursors
                .get(&(group.to_string(), *partition))
                .copied()
                .unwrap_or(0);
            cursor < messages.len()
        })
    }
}

/// A named, partitioned, in-memory topic.
pub struct MemoryTopic {
    name: String,
    state: Mutex<TopicState>,
    arrived: Condvar,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

static TOPICS: OnceLock<Mutex<HashMap<String, Arc<MemoryTopic>>>> = OnceLock::new();

impl MemoryTopic {
    /// Returns the topic called `name`, creating it on first use.
    pub fn named(name: &str) -> Arc<MemoryTopic> {
        let topics = TOPICS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut topics = topics.lock();
        Arc::clone(topics.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryTopic {
                name: name.to_string(),
                state: Mutex::new(TopicState::default()),
                arrived: Condvar::new(),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            })
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a record to `partition`.
    pub fn publish(&self, partition: PartitionId, record: &Record) -> Result<(), StreamError> {
        self.publish_raw(partition, codec::encode(record)?);
        Ok(())
    }

    /// Appends an arbitrary payload to `partition`.
    pub fn publish_raw(&self, partition: PartitionId, payload: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state
            .partitions
            .entry(partition)
            .or_default()
            .push(payload.into());
        drop(state);
        self.arrived.notify_all();
    }

    /// Total messages ever published.
    pub fn len(&self) -> usize {
        self.state.lock().partitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a consumer connected to this topic.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// How many times a consumer disconnected from this topic.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn poll(&self, group: &str, max_records: usize, timeout: Duration) -> PollBatch {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while !state.has_unread(group) {
            let Some(deadline) = deadline else {
                self.arrived.wait(&mut state);
                continue;
            };
            if self.arrived.wait_until(&mut state, deadline).timed_out() {
                if !state.has_unread(group) {
                    return PollBatch::new();
                }
                break;
            }
        }

        let mut batch = PollBatch::new();
        let mut remaining = max_records;
        let partitions: Vec<PartitionId> = state.partitions.keys().copied().collect();
        for partition in partitions {
            if remaining == 0 {
                break;
            }
            let key = (group.to_string(), partition);
            let start = state.cursors.get(&key).copied().unwrap_or(0);
            let messages = &state.partitions[&partition];
            let end = messages.len().min(start + remaining);
            if start >= end {
                continue;
            }
            let taken: Vec<StreamMessage> = messages[start..end]
                .iter()
                .enumerate()
                .map(|(i, payload)| {
                    StreamMessage::new(partition, (start + i) as i64, payload.clone())
                })
                .collect();
            remaining -= taken.len();
            batch.insert(partition, taken);
            state.cursors.insert(key, end);
        }
        batch
    }
}

/// Consumer reading a [`MemoryTopic`] as one consumer group.
pub struct MemoryStreamConsumer {
    topic: Arc<MemoryTopic>,
    group: String,
    max_poll_records: usize,
    connected: bool,
}

impl MemoryStreamConsumer {
    pub fn new(topic: Arc<MemoryTopic>, group: impl Into<String>, max_poll_records: usize) -> Self {
        MemoryStreamConsumer {
            topic,
            group: group.into(),
            max_poll_records: max_poll_records.max(1),
            connected: false,
        }
    }
}

impl StreamConsumer for MemoryStreamConsumer {
    fn connect(&mut self) -> Result<(), StreamError> {
        self.connected = true;
        self.topic.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), StreamError> {
        if self.connected {
            self.connected = false;
            self.topic.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollBatch, StreamError> {
        if !self.connected {
            return Err(StreamError::NotConnected);
        }
        Ok(self.topic.poll(&self.group, self.max_poll_records, timeout))
    }
}

/// Producer appending to one partition of a [`MemoryTopic`].
pub struct MemoryStreamProducer {
    topic: Arc<MemoryTopic>,
    partition: PartitionId,
    connected: bool,
}

impl MemoryStreamProducer {
    pub fn new(topic: Arc<MemoryTopic>) -> Self {
        Self::for_partition(topic, 0)
    }

    pub fn for_partition(topic: Arc<MemoryTopic>, partition: PartitionId) -> Self {
        MemoryStreamProducer {
            topic,
            partition,
            connected: false,
        }
    }
}

impl StreamProducer for MemoryStreamProducer {
    fn connect(&mut self) -> Result<(), StreamError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), StreamError> {
        if !self.connected {
            return Err(StreamError::NotConnected);
        }
        self.connected = false;
        Ok(())
    }

    fn persist_data(&mut self, record: &Record) -> Result<(), StreamError> {
        if !self.connected {
            return Err(StreamError::NotConnected);
        }
        self.topic.publish(self.partition, record)
    }
}
