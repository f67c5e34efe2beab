//! Mock implementations for testing
//!
//! These mocks enable end-to-end turn testing without real engines or media
//! backends.

use crate::llm::{
    ChatRequest, EngineError, LocalEngine, LocalTokenStream, ProgressFn, RawStream, RemoteEngine,
};
use crate::media::{MediaError, MediaGenerator, MediaRequest};
use crate::stream::{LocalToken, RawChunk};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Scripted streams
// ============================================================================

enum Script<T> {
    Stream {
        items: Vec<T>,
        delay: Duration,
        /// Stay open after the last item instead of ending
        hang: bool,
    },
    OpenError(EngineError),
}

fn scripted<T: Send + 'static>(items: Vec<T>, delay: Duration, hang: bool) -> BoxStream<'static, T> {
    let items = futures::stream::iter(items).then(move |item| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        item
    });
    if hang {
        items.chain(futures::stream::pending()).boxed()
    } else {
        items.boxed()
    }
}

// ============================================================================
// Mock Local Engine
// ============================================================================

/// Local engine whose load outcome and token streams are scripted
pub struct MockLocalEngine {
    load_error: Option<EngineError>,
    load_delay: Duration,
    progress: Vec<f32>,
    loads: AtomicUsize,
    scripts: Mutex<VecDeque<Script<LocalToken>>>,
    requests: Mutex<Vec<ChatRequest>>,
    /// Notified when a stream is requested
    pub request_started: Arc<Notify>,
}

impl MockLocalEngine {
    pub fn new() -> Self {
        Self {
            load_error: None,
            load_delay: Duration::ZERO,
            progress: Vec::new(),
            loads: AtomicUsize::new(0),
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            request_started: Arc::new(Notify::new()),
        }
    }

    /// An engine whose hardware capability is absent
    pub fn unavailable() -> Self {
        Self {
            load_error: Some(EngineError::unavailable("No compatible accelerator")),
            ..Self::new()
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Progress fractions reported during load
    pub fn with_progress(mut self, progress: Vec<f32>) -> Self {
        self.progress = progress;
        self
    }

    /// Queue a stream of text tokens followed by the end marker
    pub fn queue_tokens(&self, tokens: &[&str]) {
        let mut items: Vec<LocalToken> = tokens.iter().map(|t| LocalToken::Token((*t).to_string())).collect();
        items.push(LocalToken::End);
        self.queue_script(items);
    }

    pub fn queue_script(&self, items: Vec<LocalToken>) {
        self.push(Script::Stream {
            items,
            delay: Duration::ZERO,
            hang: false,
        });
    }

    /// Queue tokens that are delivered and then the stream stays open
    pub fn queue_hanging(&self, tokens: &[&str]) {
        self.push(Script::Stream {
            items: tokens.iter().map(|t| LocalToken::Token((*t).to_string())).collect(),
            delay: Duration::ZERO,
            hang: true,
        });
    }

    pub fn queue_open_error(&self, error: EngineError) {
        self.push(Script::OpenError(error));
    }

    fn push(&self, script: Script<LocalToken>) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockLocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalEngine for MockLocalEngine {
    async fn load(&self, progress: ProgressFn) -> Result<(), EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        for fraction in &self.progress {
            progress(*fraction);
        }
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        match &self.load_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<LocalTokenStream, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_waiters();
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Stream { items, delay, hang }) => Ok(scripted(items, delay, hang)),
            Some(Script::OpenError(e)) => Err(e),
            None => Err(EngineError::unavailable("No mock local stream queued")),
        }
    }

    fn model_id(&self) -> &str {
        "mock-local"
    }
}

// ============================================================================
// Mock Remote Engine
// ============================================================================

/// Remote engine returning queued raw streams
pub struct MockRemoteEngine {
    scripts: Mutex<VecDeque<Script<RawChunk>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockRemoteEngine {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a stream of text chunks followed by the completion signal
    pub fn queue_text(&self, chunks: &[&str]) {
        let mut items: Vec<RawChunk> = chunks.iter().map(|c| RawChunk::Text((*c).to_string())).collect();
        items.push(RawChunk::Finished);
        self.queue_chunks(items);
    }

    pub fn queue_chunks(&self, items: Vec<RawChunk>) {
        self.push(Script::Stream {
            items,
            delay: Duration::ZERO,
            hang: false,
        });
    }

    pub fn queue_delayed(&self, items: Vec<RawChunk>, delay: Duration) {
        self.push(Script::Stream {
            items,
            delay,
            hang: false,
        });
    }

    pub fn queue_hanging(&self, items: Vec<RawChunk>) {
        self.push(Script::Stream {
            items,
            delay: Duration::ZERO,
            hang: true,
        });
    }

    pub fn queue_open_error(&self, error: EngineError) {
        self.push(Script::OpenError(error));
    }

    fn push(&self, script: Script<RawChunk>) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockRemoteEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteEngine for MockRemoteEngine {
    async fn complete(&self, request: &ChatRequest) -> Result<RawStream, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Stream { items, delay, hang }) => Ok(scripted(items, delay, hang)),
            Some(Script::OpenError(e)) => Err(e),
            None => Err(EngineError::network("No mock remote stream queued")),
        }
    }

    fn model_id(&self) -> &str {
        "mock-remote"
    }
}

// ============================================================================
// Mock Media Generator
// ============================================================================

/// Media generator with per-prompt responses and delays
pub struct MockMediaGenerator {
    responses: Mutex<HashMap<String, (Duration, Result<String, MediaError>)>>,
    calls: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

impl MockMediaGenerator {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, prompt: &str, response: Result<String, MediaError>) {
        self.respond_after(prompt, Duration::ZERO, response);
    }

    pub fn respond_after(&self, prompt: &str, delay: Duration, response: Result<String, MediaError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(prompt.to_string(), (delay, response));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts in the order their generation finished
    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

impl Default for MockMediaGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaGenerator for MockMediaGenerator {
    async fn generate(&self, request: &MediaRequest) -> Result<String, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.responses.lock().unwrap().get(&request.prompt).cloned();
        let (delay, response) = scripted.unwrap_or_else(|| {
            (
                Duration::ZERO,
                Ok(format!("https://media.test/{}", request.prompt.replace(' ', "-"))),
            )
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.completed.lock().unwrap().push(request.prompt.clone());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineState;
    use crate::llm::{ConversationMessage, ErrorKind, Role, StreamEvent, ToolName};
    use crate::session::{ConverseError, Orchestrator, TurnStream};
    use crate::stream::ToolFragment;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        local: Arc<MockLocalEngine>,
        remote: Arc<MockRemoteEngine>,
        media: Arc<MockMediaGenerator>,
        orchestrator: Arc<Orchestrator>,
    }

    fn harness(local: Option<MockLocalEngine>, with_remote: bool) -> Harness {
        harness_with_rounds(local, with_remote, 4)
    }

    fn harness_with_rounds(local: Option<MockLocalEngine>, with_remote: bool, rounds: u32) -> Harness {
        let has_local = local.is_some();
        let local = Arc::new(local.unwrap_or_default());
        let remote = Arc::new(MockRemoteEngine::new());
        let media = Arc::new(MockMediaGenerator::new());

        let mut builder = Orchestrator::builder(media.clone()).max_tool_rounds(rounds);
        if has_local {
            builder = builder.local(local.clone());
        }
        if with_remote {
            builder = builder.remote(remote.clone());
        }
        Harness {
            local,
            remote,
            media,
            orchestrator: Arc::new(builder.build()),
        }
    }

    fn user(text: &str) -> Vec<ConversationMessage> {
        vec![ConversationMessage::user(text)]
    }

    fn tool_fragment(index: usize, id: &str, prompt: &str) -> RawChunk {
        RawChunk::ToolFragment(ToolFragment {
            index,
            id: Some(id.to_string()),
            name: Some("generate_image".to_string()),
            arguments: Some(format!("{{\"prompt\": \"{prompt}\"}}")),
        })
    }

    async fn collect(stream: TurnStream) -> Vec<StreamEvent> {
        tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .expect("turn did not finish")
    }

    async fn next(stream: &mut TurnStream) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no event within timeout")
            .expect("stream ended early")
    }

    fn text_of(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn assert_single_terminal(events: &[StreamEvent]) {
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1, "events: {events:?}");
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_local_turn_streams_to_done() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_tokens(&["Hello", " there"]);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;

        assert_eq!(
            events,
            vec![StreamEvent::text("Hello"), StreamEvent::text(" there"), StreamEvent::Done]
        );
        assert_eq!(h.orchestrator.engine_state().await, EngineState::LocalReady);
        assert_eq!(h.remote.request_count(), 0);
    }

    #[tokio::test]
    async fn test_local_failure_mid_stream_falls_back_to_remote() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_script(vec![
            LocalToken::Token("Hel".into()),
            LocalToken::Token("lo".into()),
            LocalToken::Failed(EngineError::unavailable("device lost")),
        ]);
        h.remote.queue_text(&["Hello from the cloud"]);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;

        assert_eq!(events[0], StreamEvent::text("Hel"));
        assert_eq!(events[1], StreamEvent::text("lo"));
        assert!(matches!(events[2], StreamEvent::Reset { .. }));
        assert_eq!(events[3], StreamEvent::text("Hello from the cloud"));
        assert_eq!(events[4], StreamEvent::Done);
        assert_single_terminal(&events);

        assert_eq!(h.orchestrator.engine_state().await, EngineState::RemoteActive);
        assert_eq!(h.local.request_count(), 1);
        assert_eq!(h.remote.request_count(), 1);

        // The downgrade sticks for later turns
        h.remote.queue_text(&["again"]);
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert_eq!(text_of(&events), "again");
        assert_eq!(h.local.request_count(), 1);
    }

    #[tokio::test]
    async fn test_local_open_failure_falls_back_without_reset() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_open_error(EngineError::unavailable("context lost"));
        h.remote.queue_text(&["remote answer"]);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert_eq!(events, vec![StreamEvent::text("remote answer"), StreamEvent::Done]);
        assert_eq!(h.orchestrator.engine_state().await, EngineState::RemoteActive);
    }

    #[tokio::test]
    async fn test_unavailable_local_is_never_asked_to_stream() {
        let h = harness(Some(MockLocalEngine::unavailable()), true);
        h.remote.queue_text(&["cloud"]);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert_eq!(text_of(&events), "cloud");
        assert_eq!(h.local.load_count(), 1);
        assert_eq!(h.local.request_count(), 0);
        assert_eq!(h.orchestrator.engine_state().await, EngineState::RemoteActive);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let h = harness(None, true);
        h.remote.queue_chunks(vec![
            RawChunk::Text("Generating".into()),
            tool_fragment(0, "call_1", "neon cat"),
            RawChunk::Finished,
        ]);
        h.remote.queue_text(&["Here is your neon cat."]);
        h.media.respond("neon cat", Ok("https://cdn.test/neon-cat.png".into()));

        let session = h.orchestrator.session();
        let events =
            collect(session.converse(user("generate a neon cat"), CancellationToken::new()).unwrap()).await;

        assert_eq!(events[0], StreamEvent::text("Generating"));
        assert!(matches!(&events[1], StreamEvent::ToolCall { call } if call.id == "call_1"));
        match &events[2] {
            StreamEvent::ToolResult { result } => {
                assert_eq!(result.media_url, "https://cdn.test/neon-cat.png");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        assert_eq!(events[3], StreamEvent::text("Here is your neon cat."));
        assert_eq!(events[4], StreamEvent::Done);
        assert_single_terminal(&events);

        let second = &h.remote.recorded_requests()[1];
        let assistant = &second.messages[1];
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content, "Generating");
        assert_eq!(assistant.tool_calls.len(), 1);
        let tool = &second.messages[2];
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert!(tool.content.contains("https://cdn.test/neon-cat.png"));
    }

    #[tokio::test]
    async fn test_tool_results_follow_request_order() {
        let h = harness(None, true);
        h.remote.queue_chunks(vec![
            tool_fragment(0, "A", "slow"),
            tool_fragment(1, "B", "fast"),
            RawChunk::Finished,
        ]);
        h.remote.queue_text(&["both done"]);
        h.media
            .respond_after("slow", Duration::from_millis(50), Ok("https://cdn.test/slow.png".into()));
        h.media
            .respond_after("fast", Duration::from_millis(1), Ok("https://cdn.test/fast.png".into()));

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("two please"), CancellationToken::new()).unwrap()).await;

        let result_ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult { result } => Some(result.request.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["A", "B"]);
        assert_eq!(h.media.completion_order(), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_failed_tool_is_reported_to_model() {
        let h = harness(None, true);
        h.remote.queue_chunks(vec![tool_fragment(0, "c", "cat"), RawChunk::Finished]);
        h.remote.queue_text(&["Sorry, that failed."]);
        h.media.respond("cat", Err(MediaError::MissingCredential("FAL_KEY")));

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("cat"), CancellationToken::new()).unwrap()).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolResult { result } if result.is_error())));
        let tool = &h.remote.recorded_requests()[1].messages[2];
        assert_eq!(tool.content, "media generation failed: FAL_KEY not set");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let h = harness_with_rounds(None, true, 1);
        h.remote.queue_chunks(vec![tool_fragment(0, "c", "cat"), RawChunk::Finished]);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("cat"), CancellationToken::new()).unwrap()).await;
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(h.remote.request_count(), 1);
        assert_eq!(h.media.call_count(), 1);
    }

    #[tokio::test]
    async fn test_local_inline_tool_call_reopens_local() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_tokens(&[
            "<tool_call>{\"name\": \"generate_image\", ",
            "\"arguments\": {\"prompt\": \"neon cat\"}}</tool_call>",
        ]);
        h.local.queue_tokens(&["Done!"]);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("neon cat"), CancellationToken::new()).unwrap()).await;

        assert!(matches!(&events[0], StreamEvent::ToolCall { .. }));
        assert!(matches!(&events[1], StreamEvent::ToolResult { .. }));
        assert_eq!(events[2], StreamEvent::text("Done!"));
        assert_eq!(events[3], StreamEvent::Done);
        assert_eq!(h.local.request_count(), 2);
        assert_eq!(h.remote.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_keeps_engine_state() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_hanging(&["Hel", "lo"]);

        let session = h.orchestrator.session();
        let cancel = CancellationToken::new();
        let mut stream = session.converse(user("hi"), cancel.clone()).unwrap();

        assert_eq!(next(&mut stream).await, StreamEvent::text("Hel"));
        assert_eq!(next(&mut stream).await, StreamEvent::text("lo"));
        cancel.cancel();

        assert!(matches!(
            next(&mut stream).await,
            StreamEvent::Error { kind: ErrorKind::Cancelled, .. }
        ));
        assert!(stream.next().await.is_none());
        assert_eq!(h.orchestrator.engine_state().await, EngineState::LocalReady);
        assert_eq!(h.remote.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_with_full_buffer_still_ends_with_terminal() {
        let h = harness(None, true);
        let backlog: Vec<RawChunk> = (0..100).map(|i| RawChunk::Text(format!("t{i} "))).collect();
        h.remote.queue_hanging(backlog);

        let session = h.orchestrator.session();
        let cancel = CancellationToken::new();
        let stream = session.converse(user("hi"), cancel.clone()).unwrap();

        // Nothing is read until the executor is blocked on a full channel
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = collect(stream).await;
        assert_single_terminal(&events);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { kind: ErrorKind::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_tool_dispatch() {
        let h = harness(None, true);
        h.remote.queue_chunks(vec![tool_fragment(0, "c", "slow"), RawChunk::Finished]);
        h.media
            .respond_after("slow", Duration::from_secs(30), Ok("https://cdn.test/slow.png".into()));

        let session = h.orchestrator.session();
        let cancel = CancellationToken::new();
        let mut stream = session.converse(user("slow"), cancel.clone()).unwrap();
        assert!(matches!(next(&mut stream).await, StreamEvent::ToolCall { .. }));
        cancel.cancel();

        assert!(matches!(
            next(&mut stream).await,
            StreamEvent::Error { kind: ErrorKind::Cancelled, .. }
        ));
        assert_eq!(h.remote.request_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_is_terminal() {
        let h = harness(None, true);
        h.remote.queue_open_error(EngineError::server_error("HTTP 503"));

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { kind: ErrorKind::TerminalFailure, message } if message.contains("HTTP 503")
        ));
    }

    #[tokio::test]
    async fn test_remote_truncation_is_terminal() {
        let h = harness(None, true);
        h.remote.queue_chunks(vec![RawChunk::Text("partial".into())]);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert_eq!(events[0], StreamEvent::text("partial"));
        assert!(matches!(
            &events[1],
            StreamEvent::Error { kind: ErrorKind::TerminalFailure, .. }
        ));
        assert_single_terminal(&events);
    }

    #[tokio::test]
    async fn test_local_then_remote_failure_is_terminal() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_open_error(EngineError::unavailable("lost"));
        h.remote.queue_open_error(EngineError::network("offline"));

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { kind: ErrorKind::TerminalFailure, .. }
        ));
    }

    #[tokio::test]
    async fn test_degraded_fails_immediately() {
        let h = harness(Some(MockLocalEngine::unavailable()), false);

        let session = h.orchestrator.session();
        let events = collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert!(matches!(
            &events[..],
            [StreamEvent::Error { kind: ErrorKind::TerminalFailure, .. }]
        ));
        assert_eq!(h.orchestrator.engine_state().await, EngineState::Degraded);
    }

    #[tokio::test]
    async fn test_second_turn_rejected_while_first_in_flight() {
        let h = harness(None, true);
        h.remote.queue_hanging(vec![RawChunk::Text("thinking".into())]);
        h.remote.queue_text(&["second"]);

        let session = h.orchestrator.session();
        let cancel = CancellationToken::new();
        let mut first = session.converse(user("one"), cancel.clone()).unwrap();
        assert_eq!(next(&mut first).await, StreamEvent::text("thinking"));
        assert!(session.is_busy());

        assert!(matches!(
            session.converse(user("two"), CancellationToken::new()),
            Err(ConverseError::TurnInProgress)
        ));

        cancel.cancel();
        assert!(next(&mut first).await.is_terminal());

        // The lock is released before the terminal event is delivered
        let events = collect(session.converse(user("two"), CancellationToken::new()).unwrap()).await;
        assert_eq!(text_of(&events), "second");
    }

    #[tokio::test]
    async fn test_session_cancel_targets_latest_turn() {
        let h = harness(None, true);
        h.remote.queue_hanging(vec![RawChunk::Text("first".into())]);
        h.remote.queue_hanging(vec![RawChunk::Text("second".into())]);
        let session = h.orchestrator.session();

        let mut first = session.converse(user("one"), CancellationToken::new()).unwrap();
        assert_eq!(next(&mut first).await, StreamEvent::text("first"));
        assert!(session.cancel());
        assert!(next(&mut first).await.is_terminal());

        let mut second = session.converse(user("two"), CancellationToken::new()).unwrap();
        assert_eq!(next(&mut second).await, StreamEvent::text("second"));
        assert!(session.cancel());
        assert!(matches!(
            next(&mut second).await,
            StreamEvent::Error { kind: ErrorKind::Cancelled, .. }
        ));

        session.wait_idle().await;
        assert!(!session.cancel());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let h = harness(None, true);
        h.remote.queue_hanging(vec![RawChunk::Text("a".into())]);
        h.remote.queue_text(&["b"]);

        let first = h.orchestrator.session();
        let second = h.orchestrator.session();
        let mut a = first.converse(user("a"), CancellationToken::new()).unwrap();
        assert_eq!(next(&mut a).await, StreamEvent::text("a"));

        let events = collect(second.converse(user("b"), CancellationToken::new()).unwrap()).await;
        assert_eq!(text_of(&events), "b");
    }

    #[tokio::test]
    async fn test_invalid_conversation_rejected_before_any_engine_call() {
        let h = harness(Some(MockLocalEngine::new()), true);
        let session = h.orchestrator.session();

        let result = session.converse(
            vec![ConversationMessage::user("hi"), ConversationMessage::assistant("hello")],
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(ConverseError::InvalidConversation(_))));
        assert_eq!(h.local.load_count(), 0);
        assert_eq!(h.orchestrator.engine_state().await, EngineState::Unprobed);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_turn() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_hanging(&["Hel"]);

        let session = h.orchestrator.session();
        let mut stream = session.converse(user("hi"), CancellationToken::new()).unwrap();
        assert_eq!(next(&mut stream).await, StreamEvent::text("Hel"));
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.is_busy() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn lock not released");
        assert_eq!(h.orchestrator.engine_state().await, EngineState::LocalReady);
    }

    #[tokio::test]
    async fn test_reprobe_restores_local_after_downgrade() {
        let h = harness(Some(MockLocalEngine::new()), true);
        h.local.queue_open_error(EngineError::unavailable("lost"));
        h.remote.queue_text(&["cloud"]);

        let session = h.orchestrator.session();
        collect(session.converse(user("hi"), CancellationToken::new()).unwrap()).await;
        assert_eq!(h.orchestrator.engine_state().await, EngineState::RemoteActive);

        assert_eq!(h.orchestrator.reprobe().await, EngineState::LocalReady);
        assert_eq!(h.orchestrator.engine_state().await, EngineState::LocalReady);
        assert_eq!(h.local.load_count(), 2);
        assert_eq!(h.orchestrator.enabled_tools(), &ToolName::ALL);
    }
}
