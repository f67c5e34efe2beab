//! Local inference server engine
//!
//! Drives an `OpenAI`-compatible server running on this machine (llama.cpp,
//! ollama, ...). Such servers rarely support native tool calling, so tools
//! are described in a system message and the model answers with inline
//! `<tool_call>` tags, which the multiplexer extracts.

use super::openai::OpenAiEngine;
use super::types::{ChatRequest, ConversationMessage, Role};
use super::{EngineError, LocalEngine, LocalTokenStream, ProgressFn, RemoteEngine};
use crate::stream::{LocalToken, RawChunk};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_LOCAL_BASE_URL: &str = "http://127.0.0.1:8080/v1";

pub struct LocalServerEngine {
    client: Client,
    models_url: String,
    chat: OpenAiEngine,
    model: String,
}

impl LocalServerEngine {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, EngineError> {
        let base_url = base_url.trim_end_matches('/');
        let model = model.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::unknown(format!("Failed to create HTTP client: {e}")))?;
        let chat = OpenAiEngine::new("", format!("{base_url}/chat/completions"), model.clone(), true)?;

        Ok(Self {
            client,
            models_url: format!("{base_url}/models"),
            chat,
            model,
        })
    }
}

#[async_trait]
impl LocalEngine for LocalServerEngine {
    async fn load(&self, progress: ProgressFn) -> Result<(), EngineError> {
        progress(0.0);
        let response = self
            .client
            .get(&self.models_url)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("Local server unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::unavailable(format!(
                "Local server answered HTTP {}",
                response.status()
            )));
        }
        progress(0.5);

        let models: ModelList = response
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("Unexpected model list: {e}")))?;
        if !models.data.iter().any(|m| m.id == self.model) {
            return Err(EngineError::unavailable(format!(
                "Model {} is not served locally",
                self.model
            )));
        }

        progress(1.0);
        Ok(())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<LocalTokenStream, EngineError> {
        let raw = self.chat.complete(&inline_tools(request)).await?;
        let tokens = raw.filter_map(|chunk| {
            futures::future::ready(match chunk {
                RawChunk::Text(text) => Some(LocalToken::Token(text)),
                RawChunk::Finished => Some(LocalToken::End),
                RawChunk::Failed(e) => Some(LocalToken::Failed(e)),
                RawChunk::ToolFragment(_) => None,
            })
        });
        Ok(tokens.boxed())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Rewrite a request for a model that only speaks plain chat
fn inline_tools(request: &ChatRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if !request.tools.is_empty() {
        let mut prompt = String::from(
            "You can call these tools. To call one, reply with \
             <tool_call>{\"name\": \"<tool name>\", \"arguments\": {...}}</tool_call>\n",
        );
        for tool in &request.tools {
            let schema = json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            });
            prompt.push_str(&schema.to_string());
            prompt.push('\n');
        }
        messages.push(ConversationMessage::system(prompt));
    }

    for message in &request.messages {
        match message.role {
            Role::Assistant if !message.tool_calls.is_empty() => {
                let mut content = message.content.clone();
                for call in &message.tool_calls {
                    let tag = json!({"name": call.name.as_str(), "arguments": call.arguments});
                    content.push_str(&format!("<tool_call>{tag}</tool_call>"));
                }
                messages.push(ConversationMessage::assistant(content));
            }
            Role::Tool => {
                messages.push(ConversationMessage::user(format!(
                    "Tool result: {}",
                    message.content
                )));
            }
            _ => messages.push(message.clone()),
        }
    }

    ChatRequest {
        messages,
        tools: Vec::new(),
        decoding: request.decoding,
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
