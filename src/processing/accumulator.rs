use std::collections::HashMap;

use crate::protocol::Message;

use super::merge::merge_message_chunk;

/// Collects the chunks of one in-flight response, grouped by message id and
/// kept in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ChunkAccumulator {
    request_id: String,
    order: Vec<String>,
    chunks: HashMap<String, Vec<Message>>,
}

impl ChunkAccumulator {
    /// Starts an accumulator seeded with the `init` message. The seed is keyed
    /// by its own id when it has one, otherwise by the request id.
    pub fn new(request_id: impl Into<String>, initial: Option<Message>) -> Self {
        let request_id = request_id.into();
        let mut accumulator = Self {
            request_id,
            order: Vec::new(),
            chunks: HashMap::new(),
        };
        if let Some(msg) = initial {
            let key = msg
                .id()
                .map_or_else(|| accumulator.request_id.clone(), String::from);
            accumulator.push(key, msg);
        }
        accumulator
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Appends a chunk to the list of its message. Chunks without an id are
    /// ignored; returns whether the chunk was kept.
    pub fn append(&mut self, chunk: Message) -> bool {
        let Some(id) = chunk.id().map(String::from) else {
            return false;
        };
        self.push(id, chunk);
        true
    }

    fn push(&mut self, key: String, chunk: Message) {
        match self.chunks.get_mut(&key) {
            Some(list) => list.push(chunk),
            None => {
                self.order.push(key.clone());
                self.chunks.insert(key, vec![chunk]);
            }
        }
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.chunks.contains_key(message_id)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Merges every message seen so far, in first-seen order.
    pub fn merged(&self) -> Vec<Message> {
        self.order
            .iter()
            .filter_map(|key| self.chunks.get(key))
            .filter_map(|chunks| merge_message_chunk(chunks))
            .collect()
    }
}

/// The accumulators of all requests currently streaming. Requests never share
/// state; events without a request id go to the most recently started one.
#[derive(Debug, Default)]
pub struct InFlight {
    requests: Vec<ChunkAccumulator>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any accumulator for `request_id` with a fresh one.
    pub fn start(&mut self, request_id: &str, initial: Option<Message>) {
        self.requests.retain(|acc| acc.request_id() != request_id);
        self.requests.push(ChunkAccumulator::new(request_id, initial));
    }

    /// Resolves the request an event applies to: the named one, or the
    /// latest when the event carries no id.
    pub fn resolve(&self, request_id: Option<&str>) -> Option<&str> {
        match request_id {
            Some(id) => self
                .requests
                .iter()
                .find(|acc| acc.request_id() == id)
                .map(ChunkAccumulator::request_id),
            None => self.requests.last().map(ChunkAccumulator::request_id),
        }
    }

    pub fn get_mut(&mut self, request_id: &str) -> Option<&mut ChunkAccumulator> {
        self.requests
            .iter_mut()
            .find(|acc| acc.request_id() == request_id)
    }

    pub fn remove(&mut self, request_id: &str) -> Option<ChunkAccumulator> {
        let pos = self
            .requests
            .iter()
            .position(|acc| acc.request_id() == request_id)?;
        Some(self.requests.remove(pos))
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Merged messages of every request, oldest request first.
    pub fn merged(&self) -> Vec<Message> {
        self.requests
            .iter()
            .flat_map(ChunkAccumulator::merged)
            .collect()
    }
}
