//! Tool call assembly
//!
//! Remote backends deliver a tool invocation as a sequence of fragments
//! sharing an index. A call is complete when a fragment for a higher index
//! arrives or when the backend signals completion. Completed calls are
//! validated against the enabled tool set before they leave this module.

use crate::llm::{MediaStyle, ToolArguments, ToolCallRequest, ToolName};
use crate::stream::ToolFragment;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why an assembled call was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedToolCall {
    #[error("tool call has no name")]
    MissingName,
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool not enabled: {}", .0.as_str())]
    DisabledTool(ToolName),
    #[error("arguments are not a JSON object: {0}")]
    InvalidArguments(String),
    #[error("prompt is missing or empty")]
    EmptyPrompt,
    #[error("unknown style: {0}")]
    InvalidStyle(String),
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

pub struct ToolCallAssembler {
    enabled: Vec<ToolName>,
    partial: BTreeMap<usize, PartialCall>,
    /// Indices below this have already been emitted or dropped
    floor: usize,
}

impl ToolCallAssembler {
    pub fn new(enabled: &[ToolName]) -> Self {
        Self {
            enabled: enabled.to_vec(),
            partial: BTreeMap::new(),
            floor: 0,
        }
    }

    /// Number of calls still being assembled
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Add a fragment, returning any calls it completes
    pub fn push(&mut self, fragment: ToolFragment) -> Vec<ToolCallRequest> {
        if fragment.index < self.floor {
            tracing::warn!(
                index = fragment.index,
                "Fragment for an already completed tool call, ignoring"
            );
            return Vec::new();
        }

        let entry = self.partial.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            entry.id.get_or_insert(id);
        }
        if let Some(name) = fragment.name {
            entry.name.push_str(&name);
        }
        if let Some(arguments) = fragment.arguments {
            entry.arguments.push_str(&arguments);
        }

        let ready: Vec<usize> = self
            .partial
            .range(..fragment.index)
            .map(|(index, _)| *index)
            .collect();
        self.floor = fragment.index;
        self.complete(ready)
    }

    /// The backend signalled completion; every pending call is final
    pub fn finish(&mut self) -> Vec<ToolCallRequest> {
        let ready: Vec<usize> = self.partial.keys().copied().collect();
        if let Some(last) = ready.last() {
            self.floor = last + 1;
        }
        self.complete(ready)
    }

    /// Drop all partial calls, returning how many were pending
    pub fn discard(&mut self) -> usize {
        let pending = self.partial.len();
        self.partial.clear();
        pending
    }

    fn complete(&mut self, indices: Vec<usize>) -> Vec<ToolCallRequest> {
        let mut calls = Vec::with_capacity(indices.len());
        for index in indices {
            let Some(partial) = self.partial.remove(&index) else {
                continue;
            };
            match validate(partial, &self.enabled) {
                Ok(call) => calls.push(call),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Dropping malformed tool call");
                }
            }
        }
        calls
    }
}

fn validate(partial: PartialCall, enabled: &[ToolName]) -> Result<ToolCallRequest, MalformedToolCall> {
    let name = partial.name.trim();
    if name.is_empty() {
        return Err(MalformedToolCall::MissingName);
    }
    let tool = ToolName::from_wire(name).ok_or_else(|| MalformedToolCall::UnknownTool(name.to_string()))?;
    if !enabled.contains(&tool) {
        return Err(MalformedToolCall::DisabledTool(tool));
    }

    let arguments = parse_arguments(&partial.arguments)?;
    let id = partial
        .id
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

    Ok(ToolCallRequest {
        id,
        name: tool,
        arguments,
    })
}

fn parse_arguments(raw: &str) -> Result<ToolArguments, MalformedToolCall> {
    let mut value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| MalformedToolCall::InvalidArguments(e.to_string()))?;

    // Some backends double-encode the arguments object as a JSON string
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner)
            .map_err(|e| MalformedToolCall::InvalidArguments(e.to_string()))?;
    }

    let Value::Object(map) = value else {
        return Err(MalformedToolCall::InvalidArguments(format!(
            "expected object, got {value}"
        )));
    };

    let prompt = map
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(MalformedToolCall::EmptyPrompt)?
        .to_string();

    let style = match map.get("style") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            MediaStyle::ALL
                .into_iter()
                .find(|style| style.as_str() == s)
                .ok_or_else(|| MalformedToolCall::InvalidStyle(s.clone()))?,
        ),
        Some(other) => return Err(MalformedToolCall::InvalidStyle(other.to_string())),
    };

    Ok(ToolArguments { prompt, style })
}
