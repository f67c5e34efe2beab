//! Pure state transition function
//!
//! Given the same state, context and input, `transition` always produces the
//! same new state and effects. It performs no I/O.

use super::{Effect, TurnContext, TurnInput, TurnState};
use crate::engine::Engine;
use crate::llm::{ErrorKind, StreamEvent, ToolCallRequest};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Turn already terminated")]
    AlreadyTerminated,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(
    state: &TurnState,
    context: &TurnContext,
    input: TurnInput,
) -> Result<TransitionResult, TransitionError> {
    if state.is_terminal() {
        return Err(TransitionError::AlreadyTerminated);
    }

    match (state, input) {
        // ============================================================
        // Cancellation: any live state
        // ============================================================
        (_, TurnInput::Cancel) => Ok(TransitionResult::new(TurnState::Cancelled)
            .with_effect(Effect::emit_error(ErrorKind::Cancelled, "Turn cancelled"))),

        // ============================================================
        // Probe and open
        // ============================================================
        (TurnState::Init, TurnInput::Begin) => {
            Ok(TransitionResult::new(TurnState::Probing).with_effect(Effect::Probe))
        }

        (TurnState::Probing, TurnInput::Probed(engine_state)) => match engine_state.engine() {
            Some(engine) => Ok(TransitionResult::new(TurnState::Opening {
                engine,
                tool_rounds: 0,
            })
            .with_effect(Effect::Open(engine))),
            None => {
                let message = format!(
                    "No inference engine available (state: {})",
                    engine_state.as_str()
                );
                Ok(terminal_failure(message))
            }
        },

        (TurnState::Opening { engine, tool_rounds }, TurnInput::Opened) => {
            Ok(TransitionResult::new(TurnState::Streaming {
                engine: *engine,
                tool_rounds: *tool_rounds,
                text: String::new(),
                tool_calls: Vec::new(),
            }))
        }

        (TurnState::Opening { engine, tool_rounds }, TurnInput::OpenFailed(error)) => {
            let reason = format!("{} ({})", error.message, error.kind.as_str());
            Ok(engine_failed(*engine, *tool_rounds, reason, false))
        }

        // ============================================================
        // Streaming
        // ============================================================
        (
            TurnState::Streaming {
                engine,
                tool_rounds,
                text,
                tool_calls,
            },
            TurnInput::Stream(event),
        ) => streaming(*engine, *tool_rounds, text, tool_calls, event),

        // ============================================================
        // Tool results
        // ============================================================
        (
            TurnState::AwaitingTools {
                engine,
                tool_rounds,
                pending,
            },
            TurnInput::ToolsResolved(results),
        ) => {
            let matches_pending = results.len() == pending.len()
                && results
                    .iter()
                    .zip(pending)
                    .all(|(result, call)| result.request.id == call.id);
            if !matches_pending {
                return Err(TransitionError::InvalidTransition(format!(
                    "{} tool results do not answer {} pending calls",
                    results.len(),
                    pending.len()
                )));
            }

            let emits: Vec<Effect> = results
                .iter()
                .map(|result| {
                    Effect::Emit(StreamEvent::ToolResult {
                        result: result.clone(),
                    })
                })
                .collect();
            let base = TransitionResult::new(TurnState::Completed)
                .with_effect(Effect::AppendToolResults(results))
                .with_effects(emits);

            if *tool_rounds >= context.max_tool_rounds {
                return Ok(base.with_effect(Effect::Emit(StreamEvent::Done)));
            }

            let mut result = base.with_effect(Effect::Open(*engine));
            result.new_state = TurnState::Opening {
                engine: *engine,
                tool_rounds: *tool_rounds,
            };
            Ok(result)
        }

        (state, input) => Err(TransitionError::InvalidTransition(format!(
            "{} in state {}",
            input.name(),
            state.name()
        ))),
    }
}

fn streaming(
    engine: Engine,
    tool_rounds: u32,
    text: &str,
    tool_calls: &[ToolCallRequest],
    event: StreamEvent,
) -> Result<TransitionResult, TransitionError> {
    match event {
        StreamEvent::TextDelta { text: delta } => {
            let mut new_text = text.to_string();
            new_text.push_str(&delta);
            Ok(TransitionResult::new(TurnState::Streaming {
                engine,
                tool_rounds,
                text: new_text,
                tool_calls: tool_calls.to_vec(),
            })
            .with_effect(Effect::Emit(StreamEvent::TextDelta { text: delta })))
        }

        StreamEvent::ToolCall { call } => {
            let mut calls = tool_calls.to_vec();
            calls.push(call.clone());
            Ok(TransitionResult::new(TurnState::Streaming {
                engine,
                tool_rounds,
                text: text.to_string(),
                tool_calls: calls,
            })
            .with_effect(Effect::Emit(StreamEvent::ToolCall { call })))
        }

        StreamEvent::Done if tool_calls.is_empty() => {
            Ok(TransitionResult::new(TurnState::Completed).with_effect(Effect::Emit(StreamEvent::Done)))
        }

        // The inner `done` is swallowed; the turn continues with tool results
        StreamEvent::Done => Ok(TransitionResult::new(TurnState::AwaitingTools {
            engine,
            tool_rounds: tool_rounds + 1,
            pending: tool_calls.to_vec(),
        })
        .with_effect(Effect::AppendAssistant {
            text: text.to_string(),
            tool_calls: tool_calls.to_vec(),
        })
        .with_effect(Effect::Dispatch(tool_calls.to_vec()))),

        StreamEvent::Error { kind, message } => {
            let reason = format!("{message} ({kind:?})");
            let streamed = !text.is_empty() || !tool_calls.is_empty();
            Ok(engine_failed(engine, tool_rounds, reason, streamed))
        }

        other @ (StreamEvent::ToolResult { .. } | StreamEvent::Reset { .. }) => {
            Err(TransitionError::InvalidTransition(format!(
                "{} from engine stream",
                other.event_type()
            )))
        }
    }
}

/// The serving engine failed: fall back once from local, otherwise give up
fn engine_failed(engine: Engine, tool_rounds: u32, reason: String, streamed: bool) -> TransitionResult {
    match engine {
        Engine::Local => {
            let mut effects = Vec::with_capacity(3);
            if streamed {
                effects.push(Effect::Emit(StreamEvent::Reset {
                    reason: reason.clone(),
                }));
            }
            effects.push(Effect::Downgrade { reason });
            effects.push(Effect::Open(Engine::Remote));
            TransitionResult::new(TurnState::Opening {
                engine: Engine::Remote,
                tool_rounds,
            })
            .with_effects(effects)
        }
        Engine::Remote => terminal_failure(format!("Remote engine failed: {reason}")),
    }
}

fn terminal_failure(message: String) -> TransitionResult {
    TransitionResult::new(TurnState::TerminalError {
        message: message.clone(),
    })
    .with_effect(Effect::emit_error(ErrorKind::TerminalFailure, message))
}
