//! Inputs that drive a turn

use crate::engine::EngineState;
use crate::llm::{EngineError, StreamEvent, ToolCallResult};

#[derive(Debug, Clone)]
pub enum TurnInput {
    /// The caller submitted a conversation
    Begin,

    /// The capability probe finished (or was already cached)
    Probed(EngineState),

    /// The engine accepted the request
    Opened,
    OpenFailed(EngineError),

    /// Normalized event from the open stream
    Stream(StreamEvent),

    /// Every dispatched tool call produced a result, in request order
    ToolsResolved(Vec<ToolCallResult>),

    Cancel,
}

impl TurnInput {
    pub fn name(&self) -> &'static str {
        match self {
            TurnInput::Begin => "begin",
            TurnInput::Probed(_) => "probed",
            TurnInput::Opened => "opened",
            TurnInput::OpenFailed(_) => "open_failed",
            TurnInput::Stream(event) => event.event_type(),
            TurnInput::ToolsResolved(_) => "tools_resolved",
            TurnInput::Cancel => "cancel",
        }
    }
}
