//! Common types for conversations and engine streams

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message in a conversation.
///
/// Messages are append-only; the only message that changes after creation is
/// the in-progress assistant message while its turn is streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Links a `tool` message to the request it answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

// ============================================================================
// Tool calls
// ============================================================================

/// Tools the model may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GenerateImage,
    GenerateVideo,
}

impl ToolName {
    pub const ALL: [ToolName; 2] = [ToolName::GenerateImage, ToolName::GenerateVideo];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GenerateImage => "generate_image",
            ToolName::GenerateVideo => "generate_video",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "generate_image" => Some(ToolName::GenerateImage),
            "generate_video" => Some(ToolName::GenerateVideo),
            _ => None,
        }
    }

    /// Noun used when describing the produced media
    pub fn media_label(self) -> &'static str {
        match self {
            ToolName::GenerateImage => "image",
            ToolName::GenerateVideo => "video",
        }
    }

    /// JSON-schema definition advertised to the model
    pub fn definition(self) -> ToolDefinition {
        match self {
            ToolName::GenerateImage => ToolDefinition {
                name: self.as_str().to_string(),
                description: "Generate cyberpunk/neon/glitch/smoke style images from a prompt."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "prompt": {
                            "type": "string",
                            "description": "Detailed image prompt."
                        },
                        "style": {
                            "type": "string",
                            "enum": MediaStyle::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                            "description": "Art style (default: cyberpunk)"
                        }
                    },
                    "required": ["prompt"]
                }),
            },
            ToolName::GenerateVideo => ToolDefinition {
                name: self.as_str().to_string(),
                description: "Generate short glitchy cyberpunk videos (8s max).".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "prompt": { "type": "string", "description": "Video prompt" }
                    },
                    "required": ["prompt"]
                }),
            },
        }
    }
}

/// Art style for generated media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStyle {
    Neon,
    Glitch,
    #[default]
    Cyberpunk,
    Smoke,
    Fire,
}

impl MediaStyle {
    pub const ALL: [MediaStyle; 5] = [
        MediaStyle::Neon,
        MediaStyle::Glitch,
        MediaStyle::Cyberpunk,
        MediaStyle::Smoke,
        MediaStyle::Fire,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaStyle::Neon => "neon",
            MediaStyle::Glitch => "glitch",
            MediaStyle::Cyberpunk => "cyberpunk",
            MediaStyle::Smoke => "smoke",
            MediaStyle::Fire => "fire",
        }
    }
}

/// Arguments of a media tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolArguments {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<MediaStyle>,
}

/// A fully assembled, validated tool invocation from the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: ToolName,
    pub arguments: ToolArguments,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: ToolName, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name,
            arguments: ToolArguments {
                prompt: prompt.into(),
                style: None,
            },
        }
    }

    #[must_use]
    pub fn with_style(mut self, style: MediaStyle) -> Self {
        self.arguments.style = Some(style);
        self
    }
}

/// Outcome of dispatching one tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub request: ToolCallRequest,
    /// Empty when generation failed
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn success(request: ToolCallRequest, media_url: impl Into<String>) -> Self {
        Self {
            request,
            media_url: media_url.into(),
            error: None,
        }
    }

    pub fn failure(request: ToolCallRequest, error: impl Into<String>) -> Self {
        Self {
            request,
            media_url: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Text the model (and the user) sees for this result
    pub fn content(&self) -> String {
        match &self.error {
            Some(reason) => format!("media generation failed: {reason}"),
            None => format!(
                "{} generated: {}",
                self.request.name.media_label(),
                self.media_url
            ),
        }
    }

    /// The `tool` role message appended to the conversation
    pub fn to_message(&self) -> ConversationMessage {
        ConversationMessage::tool(self.request.id.clone(), self.content())
    }
}

// ============================================================================
// Stream events
// ============================================================================

/// Why a turn ended with an error event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The engine serving the stream could not be reached or was lost
    EngineUnavailable,
    /// The raw stream ended without a completion signal
    StreamTruncated,
    /// Local and remote paths are both exhausted
    TerminalFailure,
    /// The caller cancelled the turn
    Cancelled,
}

/// Normalized event delivered to the caller.
///
/// Exactly one terminal event (`Done` or `Error`) ends every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta { text: String },
    ToolCall { call: ToolCallRequest },
    /// A tool result was appended to the conversation
    ToolResult { result: ToolCallResult },
    /// Text streamed so far for the in-progress assistant message is void
    Reset { reason: String },
    Done,
    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        StreamEvent::TextDelta { text: text.into() }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    /// Event name used on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta { .. } => "text-delta",
            StreamEvent::ToolCall { .. } => "tool-call",
            StreamEvent::ToolResult { .. } => "tool-result",
            StreamEvent::Reset { .. } => "reset",
            StreamEvent::Done => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Decoding parameters forwarded to the engines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.9,
            max_tokens: Some(1024),
        }
    }
}

/// Tool definition
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Request handed to an engine
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolDefinition>,
    pub decoding: DecodingConfig,
}

impl ChatRequest {
    pub fn new(messages: Vec<ConversationMessage>, enabled: &[ToolName], decoding: DecodingConfig) -> Self {
        Self {
            messages,
            tools: enabled.iter().map(|t| t.definition()).collect(),
            decoding,
        }
    }

    /// Content of the most recent user message
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}
