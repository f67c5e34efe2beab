//! Inference engine abstraction
//!
//! Two kinds of backend serve a conversation: a local engine on this machine and
//! an out-of-process remote endpoint. Each produces its own raw stream shape;
//! the multiplexer in [`crate::stream`] normalizes both.

mod error;
mod gateway;
mod local;
mod openai;
mod types;

pub use error::{EngineError, EngineErrorKind};
pub use gateway::PromptGatewayEngine;
pub use local::{LocalServerEngine, DEFAULT_LOCAL_BASE_URL};
pub use openai::{OpenAiEngine, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use types::*;

use crate::stream::{LocalToken, RawChunk};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Raw chunk stream produced by a remote engine
pub type RawStream = BoxStream<'static, RawChunk>;

/// Token stream produced by a local engine
pub type LocalTokenStream = BoxStream<'static, LocalToken>;

/// Load progress callback, invoked with a completion fraction in [0, 1]
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Out-of-process inference endpoint
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    /// Issue a request; the returned stream ends with `Finished` or `Failed`
    async fn complete(&self, request: &ChatRequest) -> Result<RawStream, EngineError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Inference engine running on this machine
#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Acquire the accelerator and load model resources.
    ///
    /// Returns `Unavailable` when the hardware capability is absent.
    async fn load(&self, progress: ProgressFn) -> Result<(), EngineError>;

    /// Start producing tokens for the conversation
    async fn complete(&self, request: &ChatRequest) -> Result<LocalTokenStream, EngineError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for remote engines
pub struct LoggingEngine {
    inner: Arc<dyn RemoteEngine>,
    model_id: String,
}

impl LoggingEngine {
    pub fn new(inner: Arc<dyn RemoteEngine>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl RemoteEngine for LoggingEngine {
    async fn complete(&self, request: &ChatRequest) -> Result<RawStream, EngineError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    "Remote stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "Remote request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
