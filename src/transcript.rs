//! Caller-side conversation bookkeeping
//!
//! Applies a turn's normalized events to a conversation so the next turn can
//! be submitted with the full history.

use crate::llm::{ConversationMessage, StreamEvent, ToolCallRequest};

#[derive(Debug, Default)]
struct PartialMessage {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ConversationMessage>,
    /// Assistant message still being streamed
    partial: Option<PartialMessage>,
}

impl Transcript {
    pub fn new(messages: Vec<ConversationMessage>) -> Self {
        Self {
            messages,
            partial: None,
        }
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.commit();
        self.messages.push(message);
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => {
                self.partial.get_or_insert_with(PartialMessage::default).text.push_str(text);
            }
            StreamEvent::ToolCall { call } => {
                self.partial
                    .get_or_insert_with(PartialMessage::default)
                    .tool_calls
                    .push(call.clone());
            }
            StreamEvent::ToolResult { result } => {
                self.commit();
                self.messages.push(result.to_message());
            }
            StreamEvent::Reset { .. } => self.partial = None,
            StreamEvent::Done => self.commit(),
            StreamEvent::Error { .. } => {
                if let Some(partial) = self.partial.take() {
                    tracing::debug!(chars = partial.text.len(), "Discarding partial assistant message");
                }
            }
        }
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ConversationMessage> {
        self.messages
    }

    fn commit(&mut self) {
        if let Some(partial) = self.partial.take() {
            if !partial.text.is_empty() || !partial.tool_calls.is_empty() {
                self.messages.push(ConversationMessage::assistant_with_tools(
                    partial.text,
                    partial.tool_calls,
                ));
            }
        }
    }
}
