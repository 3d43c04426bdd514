use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use futures::{Stream, StreamExt};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::client::HistorySource;
use crate::core::error::{ChatError, ErrorSink, Operation};
use crate::ndjson::{event_batches, BatchStream, NdjsonExt};
use crate::processing::{convert_server_history_to_messages, InFlight};
use crate::protocol::{ConversationUnit, Message, StreamEvent, StreamStatus, UnitStatus};

/// How a call to [`ConversationEngine::process_stream`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The body ended normally.
    Completed,
    /// The cancellation token fired; the reader was released.
    Cancelled,
    /// The transport failed or the backend reported an error.
    Failed,
}

/// Rebuilds conversation units from the agent's NDJSON stream.
///
/// Owns the live message log. The log presented to the renderer is the
/// reconciled history, followed by locally submitted prompts, followed by
/// the merged in-flight messages. It is linked and segmented on every
/// update; the renderer only ever receives a shared slice.
pub struct ConversationEngine {
    history: Vec<Message>,
    prompts: Vec<Message>,
    in_flight: InFlight,
    /// Ids of ai messages that closed a unit; later chunks for them are stale.
    closed: HashSet<String>,
    /// Terminal statuses forced onto units, keyed by the unit's prompt.
    overrides: HashMap<String, UnitStatus>,
    units: Vec<ConversationUnit>,
    history_source: Option<Box<dyn HistorySource>>,
    error_sink: Box<dyn ErrorSink>,
    cancel: CancellationToken,
    next_prompt: usize,
}

impl ConversationEngine {
    /// Creates an engine. Without a history source, `finished` keeps the
    /// provisional log instead of reconciling.
    pub fn new(
        history_source: Option<Box<dyn HistorySource>>,
        error_sink: Box<dyn ErrorSink>,
    ) -> Self {
        Self {
            history: Vec::new(),
            prompts: Vec::new(),
            in_flight: InFlight::new(),
            closed: HashSet::new(),
            overrides: HashMap::new(),
            units: Vec::new(),
            history_source,
            error_sink,
            cancel: CancellationToken::new(),
            next_prompt: 0,
        }
    }

    pub fn units(&self) -> &[ConversationUnit] {
        &self.units
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Token that aborts a running `process_stream` when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replaces the log with an already fetched history.
    pub fn set_history(&mut self, history: Vec<Message>) {
        self.history = history;
        self.prompts.clear();
        self.rebuild();
    }

    /// Fetches the authoritative history. Failures go to the error sink.
    pub async fn load_history(&mut self) -> bool {
        let Some(source) = self.history_source.as_ref() else {
            return false;
        };
        let fetched = source.fetch_history().await;
        match fetched {
            Ok(history) => {
                self.set_history(history);
                true
            }
            Err(e) => {
                self.error_sink.report(&e, Operation::Load);
                false
            }
        }
    }

    /// Adds the locally typed prompt so the response has a unit to land in
    /// before the server echoes it.
    pub fn push_prompt(&mut self, content: impl Into<String>) -> &[ConversationUnit] {
        self.next_prompt += 1;
        let prompt = Message::human(content).with_id(format!("local-{}", self.next_prompt));
        self.prompts.push(prompt);
        self.rebuild();
        &self.units
    }

    /// Drops every in-flight response and marks open units `Cancelled`, so
    /// nothing is left spinning after navigation away or an explicit stop.
    pub fn abort(&mut self) -> &[ConversationUnit] {
        self.in_flight.clear();
        self.terminate_open_units(UnitStatus::Cancelled);
        &self.units
    }

    /// Reports `error` and marks the open unit `Failed`, e.g. when the
    /// request carrying the prompt could not be sent.
    pub fn fail(&mut self, error: &ChatError, operation: Operation) -> &[ConversationUnit] {
        self.error_sink.report(error, operation);
        self.terminate_open_units(UnitStatus::Failed);
        &self.units
    }

    /// Drives a streaming HTTP response through the engine.
    pub async fn process_response<U, C>(
        &mut self,
        response: reqwest::Response,
        on_update: U,
        on_scroll: C,
    ) -> StreamOutcome
    where
        U: FnMut(&[ConversationUnit]),
        C: FnMut(),
    {
        self.process_batches(response.event_batches(), on_update, on_scroll)
            .await
    }

    /// Reads the byte stream to the end, applying events strictly in arrival
    /// order. After every read the renderer gets the updated units and the
    /// scroll hook runs.
    pub async fn process_stream<S, B, E, U, C>(
        &mut self,
        stream: S,
        on_update: U,
        on_scroll: C,
    ) -> StreamOutcome
    where
        S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
        B: AsRef<[u8]> + Send,
        E: Display + Send,
        U: FnMut(&[ConversationUnit]),
        C: FnMut(),
    {
        self.process_batches(event_batches(stream), on_update, on_scroll)
            .await
    }

    async fn process_batches<U, C>(
        &mut self,
        mut batches: BatchStream,
        mut on_update: U,
        mut on_scroll: C,
    ) -> StreamOutcome
    where
        U: FnMut(&[ConversationUnit]),
        C: FnMut(),
    {
        let token = self.cancel.clone();
        let mut outcome = StreamOutcome::Completed;

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => None,
                next = batches.next() => Some(next),
            };

            match next {
                // Cancelled: dropping `batches` releases the reader.
                None => {
                    debug!("[Stream] cancelled");
                    self.cancel = CancellationToken::new();
                    on_update(self.abort());
                    return StreamOutcome::Cancelled;
                }
                Some(None) => break,
                Some(Some(Ok(batch))) => {
                    let changed = !batch.is_empty();
                    for event in batch {
                        if self.apply(event).await {
                            outcome = StreamOutcome::Failed;
                        }
                    }
                    if changed {
                        self.rebuild();
                        on_update(&self.units);
                    }
                    on_scroll();
                }
                Some(Some(Err(e))) => {
                    self.in_flight.clear();
                    on_update(self.fail(&e, Operation::Stream));
                    return StreamOutcome::Failed;
                }
            }
        }

        outcome
    }

    /// Applies one event. Returns true when the backend reported an error.
    async fn apply(&mut self, event: StreamEvent) -> bool {
        match event.status {
            StreamStatus::Init => {
                let Some(request_id) = event.request_id else {
                    warn!("[Stream] init event without request_id, dropping");
                    return false;
                };
                debug!("[Stream] init {request_id}");
                // The backend echoed the prompt; the local copy is redundant.
                if matches!(event.msg, Some(Message::Human(_))) {
                    self.prompts.pop();
                }
                self.in_flight.start(&request_id, event.msg);
            }
            StreamStatus::Loading => {
                let Some(request_id) = self.resolve_request(event.request_id.as_deref()) else {
                    return false;
                };
                let Some(msg) = event.msg else {
                    debug!("[Stream] loading event without msg");
                    return false;
                };
                if msg.id().is_some_and(|id| self.closed.contains(id)) {
                    warn!("[Stream] stale chunk for closed message {:?}, dropping", msg.id());
                    return false;
                }
                let terminal_id = msg.is_terminal().then(|| msg.id().map(String::from)).flatten();
                if let Some(accumulator) = self.in_flight.get_mut(&request_id) {
                    if !accumulator.append(msg) {
                        debug!("[Stream] chunk without id ignored");
                    }
                }
                if let Some(id) = terminal_id {
                    self.closed.insert(id);
                }
            }
            StreamStatus::Finished => {
                if let Some(request_id) = event.request_id.as_deref() {
                    if self.in_flight.resolve(Some(request_id)).is_none() {
                        warn!("[Stream] finished for unknown request {request_id}, dropping");
                        return false;
                    }
                }
                let request_id = self.in_flight.resolve(event.request_id.as_deref()).map(String::from);
                if let Some(accumulator) = request_id.and_then(|id| self.in_flight.remove(&id)) {
                    // Flush: the streamed messages stay visible until reconciled.
                    // Every pending prompt moves with them; prompts are not
                    // keyed by request, so this assumes one turn in flight.
                    self.history.append(&mut self.prompts);
                    self.history.extend(accumulator.merged());
                }
                self.reconcile().await;
            }
            StreamStatus::Error => {
                let message = event
                    .message
                    .unwrap_or_else(|| "Unknown streaming error".to_string());
                match self.resolve_request(event.request_id.as_deref()) {
                    Some(request_id) => {
                        self.in_flight.remove(&request_id);
                    }
                    // An error for another request must not fail this turn.
                    None if event.request_id.is_some() => return false,
                    // Failed before `init`: still the open turn's error.
                    None => {}
                }
                self.fail(&ChatError::Backend(message), Operation::Stream);
                return true;
            }
            StreamStatus::Unknown => warn!("[Stream] unknown response status, dropping"),
        }
        false
    }

    fn resolve_request(&self, request_id: Option<&str>) -> Option<String> {
        let resolved = self.in_flight.resolve(request_id).map(String::from);
        if resolved.is_none() {
            match request_id {
                Some(id) => warn!("[Stream] event for unknown request {id}, dropping"),
                None => warn!("[Stream] event with no request in flight, dropping"),
            }
        }
        resolved
    }

    async fn reconcile(&mut self) {
        let Some(source) = self.history_source.as_ref() else {
            return;
        };
        let fetched = source.fetch_history().await;
        match fetched {
            Ok(history) => {
                self.history = history;
                if self.in_flight.is_empty() {
                    self.prompts.clear();
                }
            }
            Err(e) => self.error_sink.report(&e, Operation::Load),
        }
    }

    fn terminate_open_units(&mut self, status: UnitStatus) {
        self.rebuild();
        for (index, unit) in self.units.iter().enumerate() {
            if unit.is_open() {
                self.overrides.insert(unit_key(index, unit), status);
            }
        }
        self.rebuild();
    }

    fn live_log(&self) -> Vec<Message> {
        let mut log = Vec::with_capacity(self.history.len() + self.prompts.len());
        log.extend(self.history.iter().cloned());
        log.extend(self.prompts.iter().cloned());
        log.extend(self.in_flight.merged());
        log
    }

    fn rebuild(&mut self) {
        let mut units = convert_server_history_to_messages(&self.live_log());

        for (index, unit) in units.iter_mut().enumerate() {
            // A later prompt marks the unit abandoned; a forced status wins.
            if matches!(unit.status, UnitStatus::Loading | UnitStatus::Abandoned) {
                if let Some(status) = self.overrides.get(&unit_key(index, unit)) {
                    unit.status = *status;
                }
            }
            if unit.status == UnitStatus::Finished {
                self.closed.extend(
                    unit.messages
                        .iter()
                        .filter(|msg| msg.is_terminal())
                        .filter_map(|msg| msg.id().map(String::from)),
                );
            }
        }

        self.units = units;
    }
}

fn unit_key(index: usize, unit: &ConversationUnit) -> String {
    unit.prompt()
        .and_then(Message::id)
        .map_or_else(|| format!("#{index}"), String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StaticHistory;
    use crate::protocol::FinishReason;
    use futures::stream;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingSink(Arc<Mutex<Vec<(String, Operation)>>>);

    impl ErrorSink for RecordingSink {
        fn report(&self, error: &ChatError, operation: Operation) {
            self.0
                .lock()
                .expect("sink lock")
                .push((error.to_string(), operation));
        }
    }

    fn body(lines: &[&str]) -> Vec<Result<Vec<u8>, std::io::Error>> {
        lines.iter().map(|line| Ok(format!("{line}\n").into_bytes())).collect()
    }

    fn engine(history: Option<Vec<Message>>) -> (ConversationEngine, RecordingSink) {
        let sink = RecordingSink::default();
        let source = history.map(|log| Box::new(StaticHistory(log)) as Box<dyn HistorySource>);
        (ConversationEngine::new(source, Box::new(sink.clone())), sink)
    }

    #[tokio::test]
    async fn test_streamed_reply_lands_in_prompt_unit() {
        let (mut engine, sink) = engine(None);
        engine.push_prompt("Say hello");

        let chunks = body(&[
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":""}}"#,
            r#"{"status":"loading","msg":{"id":"m1","content":"Hel"}}"#,
            r#"{"status":"loading","msg":{"id":"m1","content":"lo","response_metadata":{"finish_reason":"stop"}}}"#,
        ]);
        let mut updates = 0;
        let mut scrolls = 0;
        let outcome = engine
            .process_stream(stream::iter(chunks), |_| updates += 1, || scrolls += 1)
            .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(updates, 3);
        assert_eq!(scrolls, 3);
        let units = engine.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].status, UnitStatus::Finished);
        assert_eq!(units[0].messages[1].content(), "Hello");
        assert!(sink.0.lock().expect("sink lock").is_empty());
    }

    #[tokio::test]
    async fn test_stale_chunk_after_stop_is_dropped() {
        let (mut engine, _) = engine(None);
        engine.push_prompt("q");

        let chunks = body(&[
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":"done"}}"#,
            r#"{"status":"loading","msg":{"id":"m1","content":"?","finish_reason":"stop"}}"#,
            r#"{"status":"loading","msg":{"id":"m1","content":" late"}}"#,
        ]);
        engine
            .process_stream(stream::iter(chunks), |_| {}, || {})
            .await;

        assert_eq!(engine.units()[0].messages[1].content(), "done?");
    }

    #[tokio::test]
    async fn test_finished_reconciles_with_history() {
        let authoritative = vec![
            Message::human("Say hello").with_id("h1"),
            Message::Ai(crate::protocol::AiMessage {
                id: Some("m1".to_string()),
                content: "Hello".to_string(),
                finish_reason: Some(FinishReason::Stop),
                ..Default::default()
            }),
        ];
        let (mut engine, _) = engine(Some(authoritative.clone()));
        engine.push_prompt("Say hello");

        let chunks = body(&[
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":""}}"#,
            r#"{"status":"loading","msg":{"id":"m1","content":"Hel"}}"#,
            r#"{"status":"finished"}"#,
        ]);
        engine
            .process_stream(stream::iter(chunks), |_| {}, || {})
            .await;

        assert_eq!(engine.history(), authoritative.as_slice());
        assert_eq!(engine.units().len(), 1);
        assert_eq!(engine.units()[0].status, UnitStatus::Finished);
    }

    #[tokio::test]
    async fn test_backend_error_fails_open_unit() {
        let (mut engine, sink) = engine(None);
        engine.push_prompt("q");

        let chunks = body(&[
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":""}}"#,
            r#"{"status":"loading","msg":{"id":"m1","content":"partial"}}"#,
            r#"{"status":"error","message":"model overloaded"}"#,
        ]);
        let outcome = engine
            .process_stream(stream::iter(chunks), |_| {}, || {})
            .await;

        assert_eq!(outcome, StreamOutcome::Failed);
        let unit = &engine.units()[0];
        assert_eq!(unit.status, UnitStatus::Failed);
        assert_eq!(unit.messages.len(), 1, "in-flight response discarded");

        let reports = sink.0.lock().expect("sink lock");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].0.contains("model overloaded"));
        assert_eq!(reports[0].1, Operation::Stream);
    }

    #[tokio::test]
    async fn test_unknown_request_and_orphan_events_are_dropped() {
        let (mut engine, sink) = engine(None);

        let chunks = body(&[
            r#"{"status":"loading","msg":{"id":"m0","content":"nobody asked"}}"#,
            r#"{"status":"init","msg":{"id":"m1","type":"ai","content":""}}"#,
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":""}}"#,
            r#"{"status":"loading","request_id":"r2","msg":{"id":"m1","content":"wrong request"}}"#,
            r#"{"status":"loading","request_id":"r1","msg":{"id":"m1","content":"ok"}}"#,
        ]);
        let outcome = engine
            .process_stream(stream::iter(chunks), |_| {}, || {})
            .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        // No prompt: the ai message has no unit to land in.
        assert!(engine.units().is_empty());
        assert!(sink.0.lock().expect("sink lock").is_empty());
        assert_eq!(engine.live_log()[0].content(), "ok");
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_closed_units() {
        let (mut engine, sink) = engine(None);
        engine.set_history(vec![
            Message::human("earlier"),
            Message::Ai(crate::protocol::AiMessage {
                content: "answer".to_string(),
                finish_reason: Some(FinishReason::Stop),
                ..Default::default()
            }),
        ]);
        engine.push_prompt("now");

        let mut chunks = body(&[
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":""}}"#,
        ]);
        chunks.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )));
        let outcome = engine
            .process_stream(stream::iter(chunks), |_| {}, || {})
            .await;

        assert_eq!(outcome, StreamOutcome::Failed);
        assert_eq!(engine.units()[0].status, UnitStatus::Finished);
        assert_eq!(engine.units()[1].status, UnitStatus::Failed);
        assert_eq!(sink.0.lock().expect("sink lock")[0].1, Operation::Stream);
    }

    #[tokio::test]
    async fn test_cancellation_releases_stream() {
        let (mut engine, _) = engine(None);
        engine.push_prompt("long task");
        let token = engine.cancellation_token();
        token.cancel();

        let outcome = engine
            .process_stream(stream::pending::<Result<Vec<u8>, std::io::Error>>(), |_| {}, || {})
            .await;

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(engine.units()[0].status, UnitStatus::Cancelled);
        assert!(!engine.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_error_for_other_request_is_dropped() {
        let (mut engine, sink) = engine(None);
        engine.push_prompt("q");

        let chunks = body(&[
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":""}}"#,
            r#"{"status":"error","request_id":"r9","message":"other request"}"#,
            r#"{"status":"loading","request_id":"r1","msg":{"id":"m1","content":"still here"}}"#,
        ]);
        let outcome = engine
            .process_stream(stream::iter(chunks), |_| {}, || {})
            .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(engine.units()[0].status, UnitStatus::Loading);
        assert_eq!(engine.units()[0].messages[1].content(), "still here");
        assert!(sink.0.lock().expect("sink lock").is_empty());
    }

    #[tokio::test]
    async fn test_failed_unit_stays_failed_after_next_prompt() {
        let (mut engine, _) = engine(None);
        engine.push_prompt("q");

        let chunks = body(&[
            r#"{"status":"init","request_id":"r1","msg":{"id":"m1","type":"ai","content":""}}"#,
            r#"{"status":"error","request_id":"r1","message":"boom"}"#,
        ]);
        engine
            .process_stream(stream::iter(chunks), |_| {}, || {})
            .await;
        assert_eq!(engine.units()[0].status, UnitStatus::Failed);

        let units = engine.push_prompt("retry");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].status, UnitStatus::Failed);
        assert_eq!(units[1].status, UnitStatus::Loading);
    }

    #[test]
    fn test_cancelled_unit_stays_cancelled_after_next_prompt() {
        let (mut engine, _) = engine(None);
        engine.push_prompt("q");
        engine.abort();

        let units = engine.push_prompt("again");
        assert_eq!(units[0].status, UnitStatus::Cancelled);
        assert_eq!(units[1].status, UnitStatus::Loading);
    }

    #[test]
    fn test_send_failure_fails_open_unit() {
        let (mut engine, sink) = engine(None);
        engine.push_prompt("q");

        let units = engine.fail(
            &ChatError::ServerError("502 Bad Gateway".to_string()),
            Operation::Send,
        );
        assert_eq!(units[0].status, UnitStatus::Failed);

        let reports = sink.0.lock().expect("sink lock");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, Operation::Send);
    }

    #[test]
    fn test_abort_never_overrides_finished() {
        let (mut engine, _) = engine(None);
        engine.set_history(vec![
            Message::human("a"),
            Message::Ai(crate::protocol::AiMessage {
                content: "b".to_string(),
                finish_reason: Some(FinishReason::Stop),
                ..Default::default()
            }),
        ]);
        let units = engine.abort();
        assert_eq!(units[0].status, UnitStatus::Finished);
    }
}
