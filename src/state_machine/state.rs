//! Turn state types

use crate::engine::Engine;
use crate::llm::ToolCallRequest;

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 4;

/// Immutable parameters of one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnContext {
    /// Tool rounds after which the turn ends without re-invoking the model
    pub max_tool_rounds: u32,
}

impl Default for TurnContext {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// State of the turn currently in flight
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Init,

    /// Waiting for the capability probe
    Probing,

    /// Request issued, waiting for the stream to open
    Opening { engine: Engine, tool_rounds: u32 },

    /// Relaying normalized events from `engine`
    Streaming {
        engine: Engine,
        tool_rounds: u32,
        /// Text of the in-progress assistant message
        text: String,
        tool_calls: Vec<ToolCallRequest>,
    },

    /// Tool calls dispatched, waiting for every result
    AwaitingTools {
        engine: Engine,
        tool_rounds: u32,
        pending: Vec<ToolCallRequest>,
    },

    Completed,

    TerminalError { message: String },

    Cancelled,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::TerminalError { .. } | TurnState::Cancelled
        )
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Init => "init",
            TurnState::Probing => "probing",
            TurnState::Opening { .. } => "opening",
            TurnState::Streaming { .. } => "streaming",
            TurnState::AwaitingTools { .. } => "awaiting_tools",
            TurnState::Completed => "completed",
            TurnState::TerminalError { .. } => "terminal_error",
            TurnState::Cancelled => "cancelled",
        }
    }
}
