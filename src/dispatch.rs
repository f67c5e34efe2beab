//! Tool call dispatcher
//!
//! Executes validated tool calls against the media collaborator. Dispatch
//! never fails: every request yields exactly one result, in request order.

use crate::llm::{ToolCallRequest, ToolCallResult, ToolName};
use crate::media::{MediaGenerator, MediaRequest};
use futures::future::join_all;
use std::sync::Arc;

pub struct ToolDispatcher {
    generator: Arc<dyn MediaGenerator>,
    enabled: Vec<ToolName>,
}

impl ToolDispatcher {
    pub fn new(generator: Arc<dyn MediaGenerator>, enabled: Vec<ToolName>) -> Self {
        Self { generator, enabled }
    }

    pub async fn dispatch(&self, call: &ToolCallRequest) -> ToolCallResult {
        if !self.enabled.contains(&call.name) {
            tracing::warn!(tool = call.name.as_str(), id = %call.id, "Tool not enabled");
            return ToolCallResult::failure(
                call.clone(),
                format!("tool {} is not enabled", call.name.as_str()),
            );
        }

        let start = std::time::Instant::now();
        match self.generator.generate(&MediaRequest::from(call)).await {
            Ok(url) => {
                tracing::info!(
                    tool = call.name.as_str(),
                    id = %call.id,
                    duration_ms = %start.elapsed().as_millis(),
                    "Tool call succeeded"
                );
                ToolCallResult::success(call.clone(), url)
            }
            Err(e) => {
                tracing::warn!(
                    tool = call.name.as_str(),
                    id = %call.id,
                    error = %e,
                    "Tool call failed"
                );
                ToolCallResult::failure(call.clone(), e.to_string())
            }
        }
    }

    /// Run all calls concurrently; results keep request order
    pub async fn dispatch_all(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        join_all(calls.iter().map(|call| self.dispatch(call))).await
    }
}
