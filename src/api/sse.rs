//! Server-Sent Events support

use crate::llm::StreamEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;

/// Stream a turn's events to the client.
///
/// Axum drops the body stream when the client disconnects, which drops the
/// turn stream and cancels the turn.
pub fn sse_stream(
    conversation_id: String,
    turn: impl Stream<Item = StreamEvent> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = turn.map(move |event| Ok(stream_event_to_axum(&conversation_id, &event)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn stream_event_to_axum(conversation_id: &str, event: &StreamEvent) -> Event {
    let (event_type, data) = event_payload(conversation_id, event);
    Event::default().event(event_type).data(data)
}

/// SSE event name and JSON data for one stream event
fn event_payload(conversation_id: &str, event: &StreamEvent) -> (&'static str, String) {
    let event_type = event.event_type();
    let mut data = serde_json::to_value(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize stream event");
        serde_json::json!({ "type": event_type })
    });
    if let Some(fields) = data.as_object_mut() {
        fields.insert("conversation_id".to_string(), conversation_id.into());
    }
    (event_type, data.to_string())
}
