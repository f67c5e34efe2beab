//! Orchestrator and conversation sessions
//!
//! The `Orchestrator` owns everything shared across conversations: the
//! capability prober, the engine state cell, the engine selector and the tool
//! dispatcher. A `Session` serves one conversation and allows a single turn
//! in flight at a time.

mod executor;

#[cfg(test)]
pub mod testing;

use crate::config::Config;
use crate::dispatch::ToolDispatcher;
use crate::engine::{EngineCell, EngineSelector, EngineState};
use crate::llm::{
    ConversationMessage, DecodingConfig, EngineError, LocalEngine, LocalServerEngine,
    LoggingEngine, OpenAiEngine, PromptGatewayEngine, RemoteEngine, Role, StreamEvent, ToolName,
};
use crate::media::{FalMediaGenerator, MediaError, MediaGenerator, MediaRequest};
use crate::probe::{CapabilityProber, DEFAULT_PROBE_TIMEOUT};
use crate::state_machine::TurnContext;
use executor::TurnExecutor;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConverseError {
    #[error("invalid conversation: {0}")]
    InvalidConversation(String),
    #[error("a turn is already in progress for this conversation")]
    TurnInProgress,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("engine setup failed: {0}")]
    Engine(#[from] EngineError),
    #[error("media setup failed: {0}")]
    Media(#[from] MediaError),
}

pub struct Orchestrator {
    prober: CapabilityProber,
    engine: EngineCell,
    selector: EngineSelector,
    dispatcher: ToolDispatcher,
    media: Arc<dyn MediaGenerator>,
    context: TurnContext,
}

impl Orchestrator {
    pub fn builder(media: Arc<dyn MediaGenerator>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(media)
    }

    /// Wire production backends from configuration
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        let remote: Option<Arc<dyn RemoteEngine>> = if let Some(api_key) = &config.remote.api_key {
            Some(Arc::new(OpenAiEngine::new(
                api_key.clone(),
                config.remote.base_url.clone(),
                config.remote.model.clone(),
                config.remote.stream,
            )?))
        } else if let Some(url) = &config.gateway_url {
            Some(Arc::new(PromptGatewayEngine::new(url.clone())?))
        } else {
            None
        };

        let local: Option<Arc<dyn LocalEngine>> = match &config.local {
            Some(local) => Some(Arc::new(LocalServerEngine::new(&local.base_url, local.model.clone())?)),
            None => None,
        };

        let media = FalMediaGenerator::new(config.media.fal_key.clone())?
            .with_image_model(config.media.image_model.clone())
            .with_video_model(config.media.video_model.clone());

        let mut builder = Orchestrator::builder(Arc::new(media))
            .decoding(config.decoding)
            .tools(config.enabled_tools.clone())
            .probe_timeout(config.probe_timeout)
            .max_tool_rounds(config.max_tool_rounds);
        if let Some(local) = local {
            builder = builder.local(local);
        }
        if let Some(remote) = remote {
            builder = builder.remote(remote);
        }
        Ok(builder.build())
    }

    /// Current engine state; does not trigger a probe
    pub async fn engine_state(&self) -> EngineState {
        self.engine.get().await
    }

    /// Probe again and overwrite the engine state
    pub async fn reprobe(&self) -> EngineState {
        let state = self.prober.reprobe().await;
        self.engine.set_probed(state).await;
        state
    }

    pub fn progress(&self) -> watch::Receiver<f32> {
        self.prober.progress()
    }

    pub fn enabled_tools(&self) -> &[ToolName] {
        self.selector.enabled_tools()
    }

    /// Generate media directly, outside of any conversation turn
    pub async fn generate_media(&self, request: &MediaRequest) -> Result<String, MediaError> {
        self.media.generate(request).await
    }

    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            orchestrator: Arc::clone(self),
            turn_lock: Arc::new(Mutex::new(())),
            current_turn: std::sync::Mutex::new(None),
        }
    }

    /// Engine state for a new turn, probing on first use
    pub async fn ensure_probed(&self) -> EngineState {
        let current = self.engine.get().await;
        if current != EngineState::Unprobed {
            return current;
        }
        let probed = self.prober.probe().await;
        self.engine.settle(probed).await
    }
}

pub struct OrchestratorBuilder {
    local: Option<Arc<dyn LocalEngine>>,
    remote: Option<Arc<dyn RemoteEngine>>,
    media: Arc<dyn MediaGenerator>,
    decoding: DecodingConfig,
    tools: Vec<ToolName>,
    probe_timeout: Duration,
    max_tool_rounds: u32,
}

impl OrchestratorBuilder {
    fn new(media: Arc<dyn MediaGenerator>) -> Self {
        Self {
            local: None,
            remote: None,
            media,
            decoding: DecodingConfig::default(),
            tools: ToolName::ALL.to_vec(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_tool_rounds: TurnContext::default().max_tool_rounds,
        }
    }

    #[must_use]
    pub fn local(mut self, engine: Arc<dyn LocalEngine>) -> Self {
        self.local = Some(engine);
        self
    }

    #[must_use]
    pub fn remote(mut self, engine: Arc<dyn RemoteEngine>) -> Self {
        self.remote = Some(engine);
        self
    }

    #[must_use]
    pub fn decoding(mut self, decoding: DecodingConfig) -> Self {
        self.decoding = decoding;
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolName>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn build(self) -> Orchestrator {
        let remote = self
            .remote
            .map(|engine| Arc::new(LoggingEngine::new(engine)) as Arc<dyn RemoteEngine>);
        Orchestrator {
            prober: CapabilityProber::new(self.local.clone(), remote.is_some(), self.probe_timeout),
            engine: EngineCell::new(),
            selector: EngineSelector::new(self.local, remote, self.decoding, self.tools.clone()),
            dispatcher: ToolDispatcher::new(Arc::clone(&self.media), self.tools),
            media: self.media,
            context: TurnContext {
                max_tool_rounds: self.max_tool_rounds,
            },
        }
    }
}

/// One conversation; at most one turn in flight
pub struct Session {
    orchestrator: Arc<Orchestrator>,
    turn_lock: Arc<Mutex<()>>,
    /// Token of the most recently started turn, replaced under `turn_lock`
    current_turn: std::sync::Mutex<Option<CancellationToken>>,
}

impl Session {
    /// Start a turn for `conversation`.
    ///
    /// Events arrive on the returned stream and end with exactly one `done`
    /// or `error`. Cancelling `cancel` or dropping the stream ends the turn.
    pub fn converse(
        &self,
        conversation: Vec<ConversationMessage>,
        cancel: CancellationToken,
    ) -> Result<TurnStream, ConverseError> {
        validate_conversation(&conversation)?;
        let mut current_turn = self.current_turn();
        let guard = Arc::clone(&self.turn_lock)
            .try_lock_owned()
            .map_err(|_| ConverseError::TurnInProgress)?;

        let turn_cancel = cancel.child_token();
        *current_turn = Some(turn_cancel.clone());
        drop(current_turn);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let executor = TurnExecutor::new(
            Arc::clone(&self.orchestrator),
            conversation,
            tx,
            turn_cancel.clone(),
            guard,
        );
        tokio::spawn(executor.run());

        Ok(TurnStream {
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: turn_cancel.drop_guard(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    /// Cancel the in-flight turn; returns whether one was running
    pub fn cancel(&self) -> bool {
        let current_turn = self.current_turn();
        let running = self.is_busy();
        if running {
            if let Some(token) = current_turn.as_ref() {
                token.cancel();
            }
        }
        running
    }

    /// Wait until no turn is in flight
    pub async fn wait_idle(&self) {
        drop(self.turn_lock.lock().await);
    }

    fn current_turn(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current_turn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Normalized events of one turn
pub struct TurnStream {
    inner: ReceiverStream<StreamEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for TurnStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

fn validate_conversation(conversation: &[ConversationMessage]) -> Result<(), ConverseError> {
    let invalid = |reason: &str| Err(ConverseError::InvalidConversation(reason.to_string()));

    let Some(last) = conversation.last() else {
        return invalid("conversation is empty");
    };
    if !conversation.iter().any(|m| m.role == Role::User) {
        return invalid("conversation has no user message");
    }
    if !matches!(last.role, Role::User | Role::Tool) {
        return invalid("last message must be from the user or a tool");
    }
    if conversation
        .iter()
        .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref().map_or(true, str::is_empty))
    {
        return invalid("tool message without tool_call_id");
    }
    Ok(())
}
