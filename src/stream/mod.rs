//! Message-stream adapters and the stream reader thread.
//!
//! This module provides:
//! - `StreamConsumer` / `StreamProducer` capability traits
//! - String-keyed factories choosing an adapter at runtime
//! - A JSON-lines file-backed topic and an in-memory topic
//! - `StreamReader`, the thread feeding the hand-off queue

pub mod codec;
mod consumer;
mod factory;
mod json_lines;
mod memory;
mod producer;
mod reader;

pub use consumer::{PartitionId, PollBatch, Records, StreamConsumer, StreamMessage};
pub use factory::{
    ConsumerConstructor, ProducerConstructor, StreamConsumerFactory, StreamProducerFactory,
    StreamSettings, JSON_LINES_CONSUMER, JSON_LINES_PRODUCER, MEMORY_CONSUMER, MEMORY_PRODUCER,
};
pub use json_lines::{JsonLinesStreamConsumer, JsonLinesStreamProducer};
pub use memory::{MemoryStreamConsumer, MemoryStreamProducer, MemoryTopic};
pub use producer::StreamProducer;
pub use reader::{ConsumerProvider, ReaderOptions, ReaderState, StreamReader};
