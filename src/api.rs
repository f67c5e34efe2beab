//! HTTP API
//!
//! Conversation turns are streamed as Server-Sent Events; engine status and
//! direct media generation are plain JSON.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::llm::StreamEvent;
use crate::session::{Orchestrator, Session, TurnStream};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::RwLock;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Sessions with a turn in flight or about to start; idle ones are evicted
    conversations: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Session for `id`, created on first use
    async fn conversation(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.existing_conversation(id).await {
            return session;
        }
        let mut conversations = self.conversations.write().await;
        Arc::clone(conversations.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!(conversation_id = %id, "New conversation session");
            Arc::new(self.orchestrator.session())
        }))
    }

    async fn existing_conversation(&self, id: &str) -> Option<Arc<Session>> {
        self.conversations.read().await.get(id).cloned()
    }

    /// Drop `id` from the map once its session is idle and nobody else holds it
    fn release_when_idle(&self, id: String, session: Arc<Session>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = self.clone();
        runtime.spawn(async move {
            session.wait_idle().await;
            drop(session);

            let mut conversations = state.conversations.write().await;
            let idle = conversations
                .get(&id)
                .is_some_and(|s| Arc::strong_count(s) == 1 && !s.is_busy());
            if idle {
                conversations.remove(&id);
                tracing::debug!(conversation_id = %id, "Evicted idle conversation session");
            }
        });
    }

    #[cfg(test)]
    async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

/// A turn's event stream that gives its session back to `AppState` when dropped
struct LeasedTurn {
    turn: TurnStream,
    state: AppState,
    conversation_id: String,
    session: Option<Arc<Session>>,
}

impl Stream for LeasedTurn {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.turn).poll_next(cx)
    }
}

impl Drop for LeasedTurn {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.state
                .release_when_idle(std::mem::take(&mut self.conversation_id), session);
        }
    }
}
