//! Engine selection
//!
//! `EngineState` is the single source of truth for which engine serves new
//! requests. Only the capability probe and the fallback controller write it.

use crate::llm::{
    ChatRequest, ConversationMessage, DecodingConfig, EngineError, LocalEngine, RemoteEngine,
    ToolName,
};
use crate::stream::{normalize, normalize_local, EventStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which engine serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Local,
    Remote,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Local => "local",
            Engine::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide engine availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Unprobed,
    LocalReady,
    RemoteActive,
    /// Neither a local capability nor a remote engine is available
    Degraded,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Unprobed => "unprobed",
            EngineState::LocalReady => "local_ready",
            EngineState::RemoteActive => "remote_active",
            EngineState::Degraded => "degraded",
        }
    }

    /// Engine that serves new requests in this state
    pub fn engine(self) -> Option<Engine> {
        match self {
            EngineState::LocalReady => Some(Engine::Local),
            EngineState::RemoteActive => Some(Engine::Remote),
            EngineState::Unprobed | EngineState::Degraded => None,
        }
    }
}

/// Shared, single-writer holder of the current `EngineState`
#[derive(Debug, Default)]
pub struct EngineCell {
    state: RwLock<EngineState>,
}

impl EngineCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> EngineState {
        *self.state.read().await
    }

    /// Record a probe result
    pub async fn set_probed(&self, state: EngineState) {
        let mut current = self.state.write().await;
        if *current != state {
            tracing::info!(from = current.as_str(), to = state.as_str(), "Engine state updated by probe");
        }
        *current = state;
    }

    /// Adopt a probe result only if nothing has been recorded yet.
    ///
    /// Returns the state in effect afterwards, so a downgrade made by a
    /// concurrent turn is never overwritten by a stale probe result.
    pub async fn settle(&self, probed: EngineState) -> EngineState {
        let mut current = self.state.write().await;
        if *current == EngineState::Unprobed {
            tracing::info!(to = probed.as_str(), "Engine state settled by probe");
            *current = probed;
        }
        *current
    }

    /// Permanently move from local to remote.
    ///
    /// Returns whether a transition happened; any state other than
    /// `LocalReady` is left untouched.
    pub async fn downgrade(&self, reason: &str) -> bool {
        let mut current = self.state.write().await;
        if *current == EngineState::LocalReady {
            *current = EngineState::RemoteActive;
            tracing::warn!(reason, "Local engine abandoned, switching to remote");
            true
        } else {
            false
        }
    }
}

/// Routes a conversation to the engine chosen by `EngineState`
pub struct EngineSelector {
    local: Option<Arc<dyn LocalEngine>>,
    remote: Option<Arc<dyn RemoteEngine>>,
    decoding: DecodingConfig,
    tools: Vec<ToolName>,
}

impl EngineSelector {
    pub fn new(
        local: Option<Arc<dyn LocalEngine>>,
        remote: Option<Arc<dyn RemoteEngine>>,
        decoding: DecodingConfig,
        tools: Vec<ToolName>,
    ) -> Self {
        Self {
            local,
            remote,
            decoding,
            tools,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn enabled_tools(&self) -> &[ToolName] {
        &self.tools
    }

    /// Open a normalized stream on the given engine
    pub async fn open(
        &self,
        engine: Engine,
        conversation: &[ConversationMessage],
    ) -> Result<EventStream, EngineError> {
        let request = ChatRequest::new(conversation.to_vec(), &self.tools, self.decoding);
        match engine {
            Engine::Local => {
                let local = self
                    .local
                    .as_ref()
                    .ok_or_else(|| EngineError::unavailable("No local engine configured"))?;
                let tokens = local.complete(&request).await?;
                tracing::debug!(model = local.model_id(), "Local stream opened");
                Ok(normalize_local(tokens, &self.tools))
            }
            Engine::Remote => {
                let remote = self
                    .remote
                    .as_ref()
                    .ok_or_else(|| EngineError::unavailable("No remote engine configured"))?;
                let raw = remote.complete(&request).await?;
                Ok(normalize(raw, &self.tools))
            }
        }
    }

    /// Open a stream on whichever engine `state` selects
    pub async fn converse(
        &self,
        state: EngineState,
        conversation: &[ConversationMessage],
    ) -> Result<EventStream, EngineError> {
        let engine = state.engine().ok_or_else(|| {
            EngineError::unavailable(format!("No engine available (state: {})", state.as_str()))
        })?;
        self.open(engine, conversation).await
    }
}
