//! File-backed topic: one JSON object per line.
//!
//! The topic `<dir>/<topic>.jsonl` has a single partition 0; a message's
//! offset is its line number. Each consumer group commits the next line to
//! read to `<dir>/<topic>.<group>.offset`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::codec;
use super::consumer::{PollBatch, StreamConsumer, StreamMessage};
use super::producer::StreamProducer;
use crate::config::{OffsetReset, JSONL_POLL_INTERVAL};
use crate::error_handling::StreamError;
use crate::models::Record;

const PARTITION: i32 = 0;

fn topic_path(dir: &Path, topic: &str) -> PathBuf {
    dir.join(format!("{topic}.jsonl"))
}

fn offset_path(dir: &Path, topic: &str, group: &str) -> PathBuf {
    dir.join(format!("{topic}.{group}.offset"))
}

/// Creates the topic file (and its directory) if missing.
fn ensure_topic(path: &Path) -> Result<(), StreamError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

/// Consumer tailing a JSON-lines topic file.
pub struct JsonLinesStreamConsumer {
    topic_path: PathBuf,
    offset_path: PathBuf,
    reset: OffsetReset,
    max_poll_records: usize,
    reader: Option<BufReader<File>>,
    // Next line to hand out
    position: u64,
    // Bytes read past the last complete line
    partial: Vec<u8>,
}

impl JsonLinesStreamConsumer {
    pub fn new(
        dir: &Path,
        topic: &str,
        group: &str,
        reset: OffsetReset,
        max_poll_records: usize,
    ) -> Self {
        JsonLinesStreamConsumer {
            topic_path: topic_path(dir, topic),
            offset_path: offset_path(dir, topic, group),
            reset,
            max_poll_records: max_poll_records.max(1),
            reader: None,
            position: 0,
            partial: Vec::new(),
        }
    }

    /// Next line this consumer will read.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn committed_offset(&self) -> Result<Option<u64>, StreamError> {
        match fs::read_to_string(&self.offset_path) {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn commit(&self) -> Result<(), StreamError> {
        fs::write(&self.offset_path, self.position.to_string())?;
        Ok(())
    }

    /// Reads the next complete line, or `None` at the current end of file.
    ///
    /// Lines are raw bytes; invalid UTF-8 is left for the decoder to reject.
    fn next_line(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        let reader = self.reader.as_mut().ok_or(StreamError::NotConnected)?;
        let read = reader.read_until(b'\n', &mut self.partial)?;
        if read == 0 || self.partial.last() != Some(&b'\n') {
            // Keep the partial line until the writer finishes it
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.partial)))
    }

    fn read_available(&mut self) -> Result<Vec<StreamMessage>, StreamError> {
        let mut messages = Vec::new();
        while messages.len() < self.max_poll_records {
            let Some(line) = self.next_line()? else {
                break;
            };
            let offset = self.position;
            self.position += 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            messages.push(StreamMessage::new(PARTITION, offset as i64, line));
        }
        Ok(messages)
    }
}

impl StreamConsumer for JsonLinesStreamConsumer {
    fn connect(&mut self) -> Result<(), StreamError> {
        ensure_topic(&self.topic_path)?;
        let mut reader = BufReader::new(File::open(&self.topic_path)?);

        let start = match self.committed_offset()? {
            Some(offset) => offset,
            None => match self.reset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest => u64::MAX,
            },
        };

        // Skip to the start line; a partial last line is never skipped
        let mut position = 0;
        let mut line = Vec::new();
        while position < start {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                self.partial = std::mem::take(&mut line);
                break;
            }
            position += 1;
        }

        self.position = position;
        self.reader = Some(reader);
        info!(
            "Connected to topic {} at line {}",
            self.topic_path.display(),
            self.position
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), StreamError> {
        if self.reader.take().is_some() {
            self.partial.clear();
            self.commit()?;
            debug!("Disconnected from topic {}", self.topic_path.display());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollBatch, StreamError> {
        if self.reader.is_none() {
            return Err(StreamError::NotConnected);
        }
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let messages = self.read_available()?;
            if !messages.is_empty() {
                self.commit()?;
                return Ok(PollBatch::from([(PARTITION, messages)]));
            }
            let mut nap = JSONL_POLL_INTERVAL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(PollBatch::new());
                }
                nap = nap.min(deadline - now);
            }
            thread::sleep(nap);
        }
    }
}

/// Producer appending records to a JSON-lines topic file.
pub struct JsonLinesStreamProducer {
    topic_path: PathBuf,
    file: Option<File>,
}

impl JsonLinesStreamProducer {
    pub fn new(dir: &Path, topic: &str) -> Self {
        JsonLinesStreamProducer {
            topic_path: topic_path(dir, topic),
            file: None,
        }
    }
}

impl StreamProducer for JsonLinesStreamProducer {
    fn connect(&mut self) -> Result<(), StreamError> {
        ensure_topic(&self.topic_path)?;
        self.file = Some(OpenOptions::new().append(true).open(&self.topic_path)?);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), StreamError> {
        let mut file = self.file.take().ok_or(StreamError::NotConnected)?;
        file.flush()?;
        Ok(())
    }

    fn persist_data(&mut self, record: &Record) -> Result<(), StreamError> {
        let file = self.file.as_mut().ok_or(StreamError::NotConnected)?;
        let mut line = codec::encode(record)?;
        line.push(b'\n');
        // One write per line so concurrent appenders don't interleave
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}
