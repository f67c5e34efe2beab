//! Effects produced by turn transitions

use crate::engine::Engine;
use crate::llm::{ErrorKind, StreamEvent, ToolCallRequest, ToolCallResult};

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run (or reuse) the capability probe
    Probe,

    /// Open a stream on the engine
    Open(Engine),

    /// Abandon the local engine for the rest of the process
    Downgrade { reason: String },

    /// Deliver an event to the caller
    Emit(StreamEvent),

    /// Append the finished assistant message to the working conversation
    AppendAssistant {
        text: String,
        tool_calls: Vec<ToolCallRequest>,
    },

    /// Execute tool calls concurrently
    Dispatch(Vec<ToolCallRequest>),

    /// Append one `tool` message per result to the working conversation
    AppendToolResults(Vec<ToolCallResult>),
}

impl Effect {
    pub fn emit_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Effect::Emit(StreamEvent::error(kind, message))
    }
}
