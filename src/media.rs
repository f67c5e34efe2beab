//! Media generation collaborator
//!
//! Tool calls are fulfilled by an external media service. The dispatcher only
//! sees the `MediaGenerator` trait; `FalMediaGenerator` is the production
//! implementation.

mod fal;

pub use fal::{enhance_prompt, FalMediaGenerator, DEFAULT_IMAGE_MODEL};

use crate::llm::{MediaStyle, ToolCallRequest, ToolName};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl From<ToolName> for MediaKind {
    fn from(tool: ToolName) -> Self {
        match tool {
            ToolName::GenerateImage => MediaKind::Image,
            ToolName::GenerateVideo => MediaKind::Video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub kind: MediaKind,
    pub prompt: String,
    pub style: MediaStyle,
}

impl MediaRequest {
    pub fn image(prompt: impl Into<String>, style: MediaStyle) -> Self {
        Self {
            kind: MediaKind::Image,
            prompt: prompt.into(),
            style,
        }
    }
}

impl From<&ToolCallRequest> for MediaRequest {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            kind: call.name.into(),
            prompt: call.arguments.prompt.clone(),
            style: call.arguments.style.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("{0} not set")]
    MissingCredential(&'static str),
    #[error("{} generation is not configured", .0.as_str())]
    Unsupported(MediaKind),
    #[error("media backend error: {0}")]
    Backend(String),
    #[error("unexpected media response: {0}")]
    InvalidResponse(String),
    #[error("media request failed: {0}")]
    Network(String),
}

/// Produces a media URL for a prompt
#[async_trait]
pub trait MediaGenerator: Send + Sync {
    async fn generate(&self, request: &MediaRequest) -> Result<String, MediaError>;
}
