use async_stream::try_stream;
use futures::{Stream, StreamExt};
use log::{debug, warn};
use std::pin::Pin;

use crate::core::ChatError;
use crate::protocol::StreamEvent;

const LINE_DELIMITER: char = '\n';

/// Events decoded from one read of the byte stream.
pub type EventBatch = Vec<StreamEvent>;

pub type BatchStream = Pin<Box<dyn Stream<Item = Result<EventBatch, ChatError>> + Send>>;

/// Splits an arbitrary byte stream into complete newline-delimited records.
///
/// UTF-8 is decoded incrementally: a multi-byte sequence cut by a read
/// boundary is held back until the rest arrives, and the trailing fragment
/// after the last `\n` is carried over to the next call.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending_bytes: Vec<u8>,
    buffer: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self {
            pending_bytes: Vec::new(),
            buffer: String::with_capacity(1024),
        }
    }

    /// Feeds one chunk and returns every line it completed, trimmed, blank
    /// lines dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode_utf8(chunk);

        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.find(LINE_DELIMITER) {
            let line = self.buffer[..line_end].trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
            self.buffer.drain(..=line_end);
        }
        lines
    }

    /// The incomplete fragment currently held back.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// Ends the stream, returning the held fragment if it is not blank.
    pub fn finish(mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.buffer.push_str(&tail);
        }
        let line = self.buffer.trim();
        (!line.is_empty()).then(|| line.to_string())
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);

        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending_bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + invalid);
                        }
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => {
                            self.pending_bytes.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Parses one record. Malformed records are logged and dropped.
pub fn decode_event(line: &str) -> Option<StreamEvent> {
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("[NDJSON] skipping malformed record: {e}");
            None
        }
    }
}

/// Converts a byte stream into a stream of decoded event batches, one batch
/// per read. A read error ends the stream with `ChatError::Transport`.
pub fn event_batches<S, B, E>(mut stream: S) -> BatchStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    Box::pin(try_stream! {
        let mut splitter = LineSplitter::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ChatError::Transport(e.to_string()))?;
            let batch = splitter
                .push(chunk.as_ref())
                .iter()
                .filter_map(|line| decode_event(line))
                .collect::<EventBatch>();
            yield batch;
        }

        // Process any remaining data in the buffer
        if let Some(line) = splitter.finish() {
            match serde_json::from_str::<StreamEvent>(&line) {
                Ok(event) => yield vec![event],
                Err(e) => warn!("[NDJSON] final buffer could not be parsed: {e}"),
            }
        }
    })
}

/// Extension trait for turning a streaming HTTP response into event batches.
pub trait NdjsonExt {
    fn event_batches(self) -> BatchStream;
}

impl NdjsonExt for reqwest::Response {
    fn event_batches(self) -> BatchStream {
        event_batches(Box::pin(self.bytes_stream()))
    }
}
