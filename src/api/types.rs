//! API request and response types

use crate::engine::EngineState;
use crate::llm::{ConversationMessage, MediaStyle, ToolName};
use serde::{Deserialize, Serialize};

/// Request to run one conversation turn
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Sessions are keyed by this id; a fresh one is minted when absent
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub messages: Vec<ConversationMessage>,
}

/// Engine status
#[derive(Debug, Serialize)]
pub struct EngineResponse {
    pub state: EngineState,
    /// Local load progress in [0, 1]
    pub progress: f32,
    pub tools: Vec<ToolName>,
}

/// Request to generate a single image outside a conversation
#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub style: MediaStyle,
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub image_url: String,
    pub prompt: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
