//! Prompt gateway engine
//!
//! A thin HTTP bridge that accepts `{"prompt": ...}` and answers with a single
//! JSON object, either `{"result": ...}` or `{"error": ..., "details": ...}`.
//! Tool calls are not supported by this backend.

use super::types::ChatRequest;
use super::{EngineError, RawStream, RemoteEngine};
use crate::stream::RawChunk;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct PromptGatewayEngine {
    client: Client,
    url: String,
}

impl PromptGatewayEngine {
    pub fn new(url: impl Into<String>) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EngineError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RemoteEngine for PromptGatewayEngine {
    async fn complete(&self, request: &ChatRequest) -> Result<RawStream, EngineError> {
        let prompt = request
            .last_user_text()
            .ok_or_else(|| EngineError::invalid_request("Conversation has no user message"))?;

        let response = self
            .client
            .post(&self.url)
            .json(&GatewayRequest { prompt })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    EngineError::unavailable(format!("Gateway unreachable: {e}"))
                } else {
                    EngineError::network(format!("Gateway request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::network(format!("Failed to read response: {e}")))?;

        let chunks = parse_gateway_body(status.is_success(), status.as_u16(), &body)?;
        Ok(futures::stream::iter(chunks).boxed())
    }

    fn model_id(&self) -> &str {
        "prompt-gateway"
    }
}

fn parse_gateway_body(ok: bool, status: u16, body: &str) -> Result<Vec<RawChunk>, EngineError> {
    let parsed: GatewayResponse = serde_json::from_str(body)
        .map_err(|e| EngineError::unknown(format!("Failed to parse gateway response: {e}")))?;

    if !ok || parsed.error.is_some() {
        let message = match (parsed.error, parsed.details) {
            (Some(error), Some(details)) => format!("{error}: {details}"),
            (Some(error), None) => error,
            (None, _) => format!("HTTP {status}"),
        };
        return Err(match status {
            500..=599 => EngineError::server_error(message),
            _ => EngineError::unknown(message),
        });
    }

    let text = parsed.result.unwrap_or_default();
    let mut chunks = Vec::with_capacity(2);
    if !text.is_empty() {
        chunks.push(RawChunk::Text(text));
    }
    chunks.push(RawChunk::Finished);
    Ok(chunks)
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    result: Option<String>,
    error: Option<String>,
    details: Option<String>,
}
