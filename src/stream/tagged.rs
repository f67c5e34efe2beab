//! Inline tool call extraction for local engines
//!
//! Local models emit tool invocations inside their text as
//! `<tool_call>{"name": ..., "arguments": {...}}</tool_call>`. The scanner
//! splits a token stream into plain text and tool fragments, holding back any
//! trailing text that could be the start of an opening tag.

use crate::stream::{LocalToken, RawChunk, ToolFragment};
use serde_json::Value;

const OPEN: &str = "<tool_call>";
const CLOSE: &str = "</tool_call>";

#[derive(Debug, Default)]
pub struct TaggedToolScanner {
    pending: String,
    in_tag: bool,
    next_index: usize,
    finished: bool,
}

impl TaggedToolScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: LocalToken) -> Vec<RawChunk> {
        if self.finished {
            return Vec::new();
        }

        let mut out = Vec::new();
        match token {
            LocalToken::Token(text) => {
                self.pending.push_str(&text);
                self.scan(&mut out);
            }
            LocalToken::End => {
                self.finished = true;
                if self.in_tag {
                    tracing::warn!(
                        len = self.pending.len(),
                        "Local stream ended inside a tool call tag, dropping it"
                    );
                } else if !self.pending.is_empty() {
                    out.push(RawChunk::Text(std::mem::take(&mut self.pending)));
                }
                self.pending.clear();
                out.push(RawChunk::Finished);
            }
            LocalToken::Failed(error) => {
                self.finished = true;
                self.pending.clear();
                out.push(RawChunk::Failed(error));
            }
        }
        out
    }

    fn scan(&mut self, out: &mut Vec<RawChunk>) {
        loop {
            if self.in_tag {
                let Some(pos) = self.pending.find(CLOSE) else {
                    return;
                };
                let body: String = self.pending.drain(..pos).collect();
                self.pending.drain(..CLOSE.len());
                self.in_tag = false;
                out.push(RawChunk::ToolFragment(self.fragment(&body)));
            } else if let Some(pos) = self.pending.find(OPEN) {
                if pos > 0 {
                    out.push(RawChunk::Text(self.pending.drain(..pos).collect()));
                }
                self.pending.drain(..OPEN.len());
                self.in_tag = true;
            } else {
                let emit = self.pending.len() - held_back(&self.pending);
                if emit > 0 {
                    out.push(RawChunk::Text(self.pending.drain(..emit).collect()));
                }
                return;
            }
        }
    }

    fn fragment(&mut self, body: &str) -> ToolFragment {
        let index = self.next_index;
        self.next_index += 1;

        match serde_json::from_str::<Value>(body.trim()) {
            Ok(Value::Object(map)) => ToolFragment {
                index,
                id: None,
                name: map.get("name").and_then(Value::as_str).map(str::to_string),
                arguments: map.get("arguments").map(Value::to_string),
            },
            // Unparseable bodies carry no name, so the assembler rejects them
            _ => ToolFragment {
                index,
                id: None,
                name: None,
                arguments: Some(body.to_string()),
            },
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `OPEN`
fn held_back(text: &str) -> usize {
    let bytes = text.as_bytes();
    let open = OPEN.as_bytes();
    (1..open.len())
        .rev()
        .find(|&k| bytes.ends_with(&open[..k]))
        .unwrap_or(0)
}
