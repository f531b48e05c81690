//! Stream producer capability.

use crate::error_handling::StreamError;
use crate::models::Record;

/// A client that publishes records to a topic.
///
/// Not used by the pipeline itself; upstream crawlers and tests use it to
/// feed the topic the pipeline reads.
pub trait StreamProducer: Send {
    fn connect(&mut self) -> Result<(), StreamError>;

    /// Fails with `StreamError::NotConnected` if `connect` never succeeded.
    fn disconnect(&mut self) -> Result<(), StreamError>;

    /// Serializes `record` to JSON and publishes it.
    fn persist_data(&mut self, record: &Record) -> Result<(), StreamError>;
}
