//! JSON wire format for records.

use crate::error_handling::StreamError;
use crate::models::Record;

/// Serializes a record as a UTF-8 JSON object.
pub fn encode(record: &Record) -> Result<Vec<u8>, StreamError> {
    Ok(serde_json::to_vec(record)?)
}

/// Parses a UTF-8 JSON payload into a record.
pub fn decode(payload: &[u8]) -> Result<Record, StreamError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text.trim())?)
}
