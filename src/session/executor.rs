//! Turn executor
//!
//! Drives the turn state machine: feeds it inputs, carries out its effects and
//! forwards emitted events to the caller.

use super::Orchestrator;
use crate::engine::{Engine, EngineState};
use crate::llm::{ConversationMessage, EngineError, ErrorKind, StreamEvent};
use crate::state_machine::{transition, Effect, TransitionError, TurnInput, TurnState};
use crate::stream::EventStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

pub(super) struct TurnExecutor {
    orchestrator: Arc<Orchestrator>,
    turn_id: String,
    state: TurnState,
    /// Caller's conversation plus messages produced during this turn
    conversation: Vec<ConversationMessage>,
    events_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    /// Held until the turn reaches a terminal state
    turn_guard: Option<OwnedMutexGuard<()>>,
    active: Option<EventStream>,
}

impl TurnExecutor {
    pub(super) fn new(
        orchestrator: Arc<Orchestrator>,
        conversation: Vec<ConversationMessage>,
        events_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
        turn_guard: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            orchestrator,
            turn_id: uuid::Uuid::new_v4().to_string(),
            state: TurnState::Init,
            conversation,
            events_tx,
            cancel,
            turn_guard: Some(turn_guard),
            active: None,
        }
    }

    pub(super) async fn run(mut self) {
        tracing::debug!(turn_id = %self.turn_id, messages = self.conversation.len(), "Starting turn");
        let mut queue = VecDeque::from([TurnInput::Begin]);

        loop {
            let input = match queue.pop_front() {
                Some(input) => input,
                None if self.state.is_terminal() => break,
                None => self.next_input().await,
            };

            let input_name = input.name();
            let result = match transition(&self.state, &self.orchestrator.context, input) {
                Ok(result) => result,
                Err(TransitionError::AlreadyTerminated) => break,
                Err(e) => {
                    tracing::error!(
                        turn_id = %self.turn_id,
                        state = self.state.name(),
                        input = input_name,
                        error = %e,
                        "Unexpected turn input"
                    );
                    self.state = TurnState::TerminalError {
                        message: e.to_string(),
                    };
                    self.turn_guard = None;
                    let event = StreamEvent::error(ErrorKind::TerminalFailure, e.to_string());
                    deliver(&self.events_tx, &self.cancel, &self.turn_id, event).await;
                    break;
                }
            };

            self.state = result.new_state;
            if !matches!(self.state, TurnState::Streaming { .. }) {
                self.active = None;
            }
            if self.state.is_terminal() {
                self.finish_turn();
            }

            for effect in result.effects {
                if let Some(next) = self.execute_effect(effect).await {
                    queue.push_back(next);
                }
            }
        }
    }

    fn finish_turn(&mut self) {
        self.turn_guard = None;
        match &self.state {
            TurnState::TerminalError { message } => {
                tracing::error!(turn_id = %self.turn_id, error = %message, "Turn failed");
            }
            TurnState::Cancelled => {
                tracing::info!(turn_id = %self.turn_id, "Turn cancelled");
            }
            _ => {
                tracing::info!(turn_id = %self.turn_id, "Turn completed");
            }
        }
    }

    /// Wait for the next event from the open stream, or cancellation
    async fn next_input(&mut self) -> TurnInput {
        let Some(stream) = self.active.as_mut() else {
            return TurnInput::Stream(StreamEvent::error(
                ErrorKind::StreamTruncated,
                "No engine stream is open",
            ));
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => TurnInput::Cancel,
            event = stream.next() => match event {
                Some(event) => TurnInput::Stream(event),
                None => TurnInput::Stream(StreamEvent::error(
                    ErrorKind::StreamTruncated,
                    "Engine stream closed without a terminal event",
                )),
            },
        }
    }

    async fn execute_effect(&mut self, effect: Effect) -> Option<TurnInput> {
        match effect {
            Effect::Probe => {
                let orchestrator = Arc::clone(&self.orchestrator);
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Some(TurnInput::Cancel),
                    state = orchestrator.ensure_probed() => Some(TurnInput::Probed(state)),
                }
            }

            Effect::Open(engine) => self.open(engine).await,

            Effect::Downgrade { reason } => {
                self.orchestrator.engine.downgrade(&reason).await;
                None
            }

            Effect::Emit(event) => {
                deliver(&self.events_tx, &self.cancel, &self.turn_id, event).await;
                None
            }

            Effect::AppendAssistant { text, tool_calls } => {
                self.conversation
                    .push(ConversationMessage::assistant_with_tools(text, tool_calls));
                None
            }

            Effect::Dispatch(calls) => {
                tracing::info!(turn_id = %self.turn_id, count = calls.len(), "Dispatching tool calls");
                let orchestrator = Arc::clone(&self.orchestrator);
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Some(TurnInput::Cancel),
                    results = orchestrator.dispatcher.dispatch_all(&calls) => {
                        Some(TurnInput::ToolsResolved(results))
                    }
                }
            }

            Effect::AppendToolResults(results) => {
                self.conversation
                    .extend(results.iter().map(crate::llm::ToolCallResult::to_message));
                None
            }
        }
    }

    async fn open(&mut self, engine: Engine) -> Option<TurnInput> {
        // Another turn may have abandoned the local engine since this one started
        if engine == Engine::Local
            && self.orchestrator.engine.get().await != EngineState::LocalReady
        {
            return Some(TurnInput::OpenFailed(EngineError::unavailable(
                "Local engine was abandoned",
            )));
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Some(TurnInput::Cancel),
            opened = orchestrator.selector.open(engine, &self.conversation) => opened,
        };

        match opened {
            Ok(stream) => {
                tracing::info!(turn_id = %self.turn_id, engine = %engine, "Engine stream opened");
                self.active = Some(stream);
                Some(TurnInput::Opened)
            }
            Err(e) => {
                tracing::warn!(
                    turn_id = %self.turn_id,
                    engine = %engine,
                    error = %e,
                    kind = e.kind.as_str(),
                    "Failed to open engine stream"
                );
                Some(TurnInput::OpenFailed(e))
            }
        }
    }
}

/// Send an event to the caller.
///
/// Terminal events are always delivered while the receiver exists. Other
/// events are dropped once the turn is cancelled, so a caller that stopped
/// reading cannot stall cancellation.
async fn deliver(
    events_tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    turn_id: &str,
    event: StreamEvent,
) {
    if event.is_terminal() {
        if events_tx.send(event).await.is_err() {
            tracing::debug!(turn_id, "Caller went away before the terminal event");
        }
        return;
    }

    tokio::select! {
        biased;
        sent = events_tx.send(event) => {
            if sent.is_err() {
                tracing::debug!(turn_id, "Caller went away, cancelling turn");
                cancel.cancel();
            }
        }
        () = cancel.cancelled() => {
            tracing::debug!(turn_id, "Dropping event for cancelled turn");
        }
    }
}
