//! `OpenAI`-compatible remote engine (Groq, `OpenAI`, Fireworks, ...)

use super::types::{ChatRequest, ConversationMessage};
use super::{EngineError, RawStream, RemoteEngine};
use crate::stream::{RawChunk, ToolFragment};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3-groq-70b-versatile-tool-use-preview";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Whole-response deadline; streamed responses have none
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Remote engine speaking the chat/completions protocol
pub struct OpenAiEngine {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    stream: bool,
}

impl OpenAiEngine {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        stream: bool,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EngineError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            stream,
        })
    }

    /// Deadline for a whole request, if any
    fn request_timeout(&self) -> Option<Duration> {
        (!self.stream).then_some(RESPONSE_TIMEOUT)
    }

    fn translate_request(&self, request: &ChatRequest) -> OpenAIRequest {
        let messages = request.messages.iter().map(translate_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };
        let tool_choice = tools.as_ref().map(|_| "auto".to_string());

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            tools,
            tool_choice,
            max_tokens: request.decoding.max_tokens,
            temperature: Some(request.decoding.temperature),
            top_p: Some(request.decoding.top_p),
            stream: self.stream,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, EngineError> {
        let openai_request = self.translate_request(request);

        let mut http_request = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request);
        if let Some(timeout) = self.request_timeout() {
            http_request = http_request.timeout(timeout);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    EngineError::unavailable(format!("Connection failed: {e}"))
                } else {
                    EngineError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .map_err(|e| EngineError::network(format!("Failed to read response: {e}")))?;
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl RemoteEngine for OpenAiEngine {
    async fn complete(&self, request: &ChatRequest) -> Result<RawStream, EngineError> {
        let response = self.send(request).await?;

        if self.stream {
            let chunks = response
                .bytes_stream()
                .eventsource()
                .flat_map(|event| {
                    let chunks = match event {
                        Ok(event) => parse_sse_data(&event.data),
                        Err(e) => vec![RawChunk::Failed(EngineError::network(format!(
                            "SSE stream error: {e}"
                        )))],
                    };
                    futures::stream::iter(chunks)
                });
            return Ok(chunks.boxed());
        }

        let body = response
            .text()
            .await
            .map_err(|e| EngineError::network(format!("Failed to read response: {e}")))?;
        let parsed: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            EngineError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;
        Ok(futures::stream::iter(normalize_response(parsed)?).boxed())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn translate_message(msg: &ConversationMessage) -> OpenAIMessage {
    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(
            msg.tool_calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    r#type: "function".to_string(),
                    function: OpenAIFunctionCall {
                        name: call.name.as_str().to_string(),
                        arguments: serde_json::to_string(&call.arguments)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                })
                .collect(),
        )
    };

    // Assistant messages that only carry tool calls have null content
    let content = if msg.content.is_empty() && tool_calls.is_some() {
        None
    } else {
        Some(msg.content.clone())
    };

    OpenAIMessage {
        role: msg.role.as_str().to_string(),
        content,
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn classify_status(status: StatusCode, body: &str) -> EngineError {
    let Ok(error_resp) = serde_json::from_str::<OpenAIErrorResponse>(body) else {
        return match status.as_u16() {
            500..=599 => EngineError::server_error(format!("HTTP {status} error: {body}")),
            _ => EngineError::unknown(format!("HTTP {status} error: {body}")),
        };
    };
    let message = error_resp.error.message;
    match status.as_u16() {
        401 | 403 => EngineError::auth(format!("Authentication failed: {message}")),
        429 => EngineError::rate_limit(format!("Rate limit exceeded: {message}")),
        400 => EngineError::invalid_request(format!("Invalid request: {message}")),
        500..=599 => EngineError::server_error(format!("Server error: {message}")),
        _ => EngineError::unknown(format!("HTTP {status}: {message}")),
    }
}

/// Translate one SSE `data:` payload into raw chunks
fn parse_sse_data(data: &str) -> Vec<RawChunk> {
    let data = data.trim();
    if data == "[DONE]" {
        return vec![RawChunk::Finished];
    }
    if data.is_empty() {
        return Vec::new();
    }

    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            return vec![RawChunk::Failed(EngineError::unknown(format!(
                "SSE parsing error: {e}, data: {data}"
            )))]
        }
    };

    if let Some(error) = event.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming");
        return vec![RawChunk::Failed(EngineError::server_error(message))];
    }

    let chunk: OpenAIStreamChunk = match serde_json::from_value(event) {
        Ok(chunk) => chunk,
        Err(e) => {
            return vec![RawChunk::Failed(EngineError::unknown(format!(
                "SSE data schema error: {e}, data: {data}"
            )))]
        }
    };

    let Some(choice) = chunk.choices.into_iter().next() else {
        // Keepalive or usage-only chunk
        return Vec::new();
    };

    let mut out = Vec::new();
    if let Some(text) = choice.delta.content {
        if !text.is_empty() {
            out.push(RawChunk::Text(text));
        }
    }
    for call in choice.delta.tool_calls.unwrap_or_default() {
        let (name, arguments) = match call.function {
            Some(f) => (f.name, f.arguments),
            None => (None, None),
        };
        out.push(RawChunk::ToolFragment(ToolFragment {
            index: call.index,
            id: call.id,
            name,
            arguments,
        }));
    }
    if choice.finish_reason.is_some() {
        out.push(RawChunk::Finished);
    }
    out
}

fn normalize_response(resp: OpenAIResponse) -> Result<Vec<RawChunk>, EngineError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::unknown("No choices in response"))?;

    let mut chunks = Vec::new();
    if let Some(text) = choice.message.content {
        if !text.is_empty() {
            chunks.push(RawChunk::Text(text));
        }
    }
    for (index, tc) in choice.message.tool_calls.unwrap_or_default().into_iter().enumerate() {
        chunks.push(RawChunk::ToolFragment(ToolFragment {
            index,
            id: Some(tc.id),
            name: Some(tc.function.name),
            arguments: Some(tc.function.arguments),
        }));
    }
    chunks.push(RawChunk::Finished);
    Ok(chunks)
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
