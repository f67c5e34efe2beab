//! Stream multiplexer
//!
//! Consumes a raw backend stream and produces the normalized event
//! vocabulary: `text-delta`, `tool-call`, `done`, `error`. Every normalized
//! stream ends with exactly one terminal event and yields nothing after it.

mod assembler;
mod tagged;

#[cfg(test)]
mod proptests;

pub use assembler::{MalformedToolCall, ToolCallAssembler};
pub use tagged::TaggedToolScanner;

use crate::llm::{EngineError, ErrorKind, LocalTokenStream, RawStream, StreamEvent, ToolName};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;

/// Normalized event stream handed upward by the engine selector
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Incremental piece of a tool invocation, keyed by call index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Raw chunk from a remote backend
#[derive(Debug, Clone)]
pub enum RawChunk {
    Text(String),
    ToolFragment(ToolFragment),
    /// Completion signal
    Finished,
    Failed(EngineError),
}

/// Raw token from a local backend
#[derive(Debug, Clone)]
pub enum LocalToken {
    Token(String),
    /// Generation finished
    End,
    Failed(EngineError),
}

/// Stateful normalizer for one raw stream
pub struct Multiplexer {
    assembler: ToolCallAssembler,
    terminated: bool,
}

impl Multiplexer {
    pub fn new(enabled: &[ToolName]) -> Self {
        Self {
            assembler: ToolCallAssembler::new(enabled),
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed one raw chunk, returning the events it completes
    pub fn push(&mut self, chunk: RawChunk) -> Vec<StreamEvent> {
        if self.terminated {
            tracing::debug!("Ignoring raw chunk after terminal event");
            return Vec::new();
        }

        match chunk {
            RawChunk::Text(text) => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![StreamEvent::TextDelta { text }]
                }
            }
            RawChunk::ToolFragment(fragment) => self
                .assembler
                .push(fragment)
                .into_iter()
                .map(|call| StreamEvent::ToolCall { call })
                .collect(),
            RawChunk::Finished => {
                self.terminated = true;
                let mut events: Vec<StreamEvent> = self
                    .assembler
                    .finish()
                    .into_iter()
                    .map(|call| StreamEvent::ToolCall { call })
                    .collect();
                events.push(StreamEvent::Done);
                events
            }
            RawChunk::Failed(error) => {
                self.terminated = true;
                self.assembler.discard();
                vec![StreamEvent::error(
                    ErrorKind::EngineUnavailable,
                    format!("{} ({})", error.message, error.kind.as_str()),
                )]
            }
        }
    }

    /// The raw stream ended without a completion signal
    pub fn end_of_input(&mut self) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;
        let pending = self.assembler.discard();
        if pending > 0 {
            tracing::warn!(pending, "Stream truncated during tool call assembly");
        }
        vec![StreamEvent::error(
            ErrorKind::StreamTruncated,
            "Stream ended before the completion signal",
        )]
    }
}

struct NormalizeState {
    raw: RawStream,
    mux: Multiplexer,
    pending: VecDeque<StreamEvent>,
}

/// Normalize a remote raw stream
pub fn normalize(raw: RawStream, enabled: &[ToolName]) -> EventStream {
    let state = NormalizeState {
        raw,
        mux: Multiplexer::new(enabled),
        pending: VecDeque::new(),
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((event, st));
            }
            if st.mux.is_terminated() {
                return None;
            }
            let events = match st.raw.next().await {
                Some(chunk) => st.mux.push(chunk),
                None => st.mux.end_of_input(),
            };
            st.pending.extend(events);
        }
    })
    .boxed()
}

/// Normalize a local token stream, extracting inline tool calls
pub fn normalize_local(tokens: LocalTokenStream, enabled: &[ToolName]) -> EventStream {
    let mut scanner = TaggedToolScanner::new();
    let raw = tokens
        .flat_map(move |token| futures::stream::iter(scanner.push(token)))
        .boxed();
    normalize(raw, enabled)
}
