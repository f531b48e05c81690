//! String-keyed registries of stream adapters.
//!
//! The consumer and producer implementations are chosen at runtime by type
//! name (`STREAM_CONSUMER_TYPE`), so each factory maps a name to a
//! constructor taking the shared [`StreamSettings`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::consumer::StreamConsumer;
use super::json_lines::{JsonLinesStreamConsumer, JsonLinesStreamProducer};
use super::memory::{MemoryStreamConsumer, MemoryStreamProducer, MemoryTopic};
use super::producer::StreamProducer;
use crate::config::OffsetReset;
use crate::error_handling::StreamError;

/// Connection settings shared by every adapter.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub stream_dir: PathBuf,
    pub topic_name: String,
    pub consumer_group: String,
    pub client_id: String,
    pub auto_offset_reset: OffsetReset,
    pub max_poll_records: usize,
}

pub type ConsumerConstructor = fn(&StreamSettings) -> Result<Box<dyn StreamConsumer>, StreamError>;
pub type ProducerConstructor = fn(&StreamSettings) -> Result<Box<dyn StreamProducer>, StreamError>;

pub const JSON_LINES_CONSUMER: &str = "JsonLinesStreamConsumer";
pub const MEMORY_CONSUMER: &str = "MemoryStreamConsumer";
pub const JSON_LINES_PRODUCER: &str = "JsonLinesStreamProducer";
pub const MEMORY_PRODUCER: &str = "MemoryStreamProducer";

/// Creates stream consumers by type name.
#[derive(Clone)]
pub struct StreamConsumerFactory {
    constructors: BTreeMap<String, ConsumerConstructor>,
}

impl StreamConsumerFactory {
    /// A factory with no registered types.
    pub fn empty() -> Self {
        StreamConsumerFactory {
            constructors: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the constructor for `name`.
    pub fn register(&mut self, name: impl Into<String>, constructor: ConsumerConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Builds an unconnected consumer of type `name`.
    ///
    /// # Errors
    ///
    /// `StreamError::UnknownConsumerType` if nothing is registered as `name`.
    pub fn create(
        &self,
        name: &str,
        settings: &StreamSettings,
    ) -> Result<Box<dyn StreamConsumer>, StreamError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| StreamError::UnknownConsumerType(name.to_string()))?;
        constructor(settings)
    }
}

impl Default for StreamConsumerFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register(JSON_LINES_CONSUMER, |s| {
            Ok(Box::new(JsonLinesStreamConsumer::new(
                &s.stream_dir,
                &s.topic_name,
                &s.consumer_group,
                s.auto_offset_reset,
                s.max_poll_records,
            )))
        });
        factory.register(MEMORY_CONSUMER, |s| {
            Ok(Box::new(MemoryStreamConsumer::new(
                MemoryTopic::named(&s.topic_name),
                s.consumer_group.clone(),
                s.max_poll_records,
            )))
        });
        factory
    }
}

/// Creates stream producers by type name.
#[derive(Clone)]
pub struct StreamProducerFactory {
    constructors: BTreeMap<String, ProducerConstructor>,
}

impl StreamProducerFactory {
    pub fn empty() -> Self {
        StreamProducerFactory {
            constructors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: ProducerConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Builds an unconnected producer of type `name`.
    ///
    /// # Errors
    ///
    /// `StreamError::UnknownProducerType` if nothing is registered as `name`.
    pub fn create(
        &self,
        name: &str,
        settings: &StreamSettings,
    ) -> Result<Box<dyn StreamProducer>, StreamError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| StreamError::UnknownProducerType(name.to_string()))?;
        constructor(settings)
    }
}

impl Default for StreamProducerFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register(JSON_LINES_PRODUCER, |s| {
            Ok(Box::new(JsonLinesStreamProducer::new(
                &s.stream_dir,
                &s.topic_name,
            )))
        });
        factory.register(MEMORY_PRODUCER, |s| {
            Ok(Box::new(MemoryStreamProducer::new(MemoryTopic::named(
                &s.topic_name,
            ))))
        });
        factory
    }
}
