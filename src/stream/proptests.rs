//! Property-based tests for the stream multiplexer
//!
//! Arbitrary chunk boundaries must never change what the caller sees.

use super::*;
use crate::llm::MediaStyle;
use proptest::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

/// Split `text` at the given fractional cut points (on char boundaries)
fn split_at_cuts(text: &str, cuts: &[usize]) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (chars.len() + 1)).collect();
    points.push(0);
    points.push(chars.len());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| chars[w[0]..w[1]].iter().collect())
        .collect()
}

fn run_remote(chunks: Vec<RawChunk>) -> Vec<StreamEvent> {
    futures::executor::block_on(normalize(futures::stream::iter(chunks).boxed(), &ToolName::ALL).collect())
}

fn run_local(tokens: Vec<LocalToken>) -> Vec<StreamEvent> {
    futures::executor::block_on(normalize_local(futures::stream::iter(tokens).boxed(), &ToolName::ALL).collect())
}

fn text_of(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

// ============================================================================
// Generators
// ============================================================================

fn arb_text() -> impl Strategy<Value = String> {
    // No '<' so the scanner cannot see a tag in the free text
    "[a-zA-Z0-9 .,!é]{0,60}"
}

fn arb_prompt() -> impl Strategy<Value = String> {
    "[a-z][a-z ]{0,20}[a-z]"
}

fn arb_cuts() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(any::<usize>(), 0..8)
}

fn arb_style() -> impl Strategy<Value = Option<MediaStyle>> {
    prop_oneof![Just(None), prop::sample::select(MediaStyle::ALL.to_vec()).prop_map(Some)]
}

fn arguments_json(prompt: &str, style: Option<MediaStyle>) -> String {
    match style {
        Some(style) => serde_json::json!({"prompt": prompt, "style": style.as_str()}).to_string(),
        None => serde_json::json!({"prompt": prompt}).to_string(),
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn remote_text_survives_any_chunking(text in arb_text(), cuts in arb_cuts()) {
        let mut chunks: Vec<RawChunk> = split_at_cuts(&text, &cuts)
            .into_iter()
            .map(RawChunk::Text)
            .collect();
        chunks.push(RawChunk::Finished);

        let events = run_remote(chunks);
        prop_assert_eq!(text_of(&events), text);
        prop_assert_eq!(terminal_count(&events), 1);
        prop_assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn remote_tool_call_survives_any_fragmentation(
        prompt in arb_prompt(),
        style in arb_style(),
        cuts in arb_cuts(),
    ) {
        let args = arguments_json(&prompt, style);
        let mut chunks = Vec::new();
        for (i, piece) in split_at_cuts(&args, &cuts).into_iter().enumerate() {
            chunks.push(RawChunk::ToolFragment(ToolFragment {
                index: 0,
                id: (i == 0).then(|| "call_p".to_string()),
                name: (i == 0).then(|| "generate_image".to_string()),
                arguments: Some(piece),
            }));
        }
        chunks.push(RawChunk::Finished);

        let events = run_remote(chunks);
        let calls: Vec<&crate::llm::ToolCallRequest> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall { call } => Some(call),
                _ => None,
            })
            .collect();
        prop_assert_eq!(calls.len(), 1);
        prop_assert_eq!(&calls[0].arguments.prompt, &prompt);
        prop_assert_eq!(calls[0].arguments.style, style);
        prop_assert_eq!(terminal_count(&events), 1);
    }

    #[test]
    fn stream_ends_with_exactly_one_terminal(
        text in arb_text(),
        cuts in arb_cuts(),
        ending in 0u8..3,
        trailing in prop::collection::vec(arb_text(), 0..3),
    ) {
        let mut chunks: Vec<RawChunk> = split_at_cuts(&text, &cuts)
            .into_iter()
            .map(RawChunk::Text)
            .collect();
        match ending {
            0 => chunks.push(RawChunk::Finished),
            1 => chunks.push(RawChunk::Failed(crate::llm::EngineError::network("reset"))),
            _ => {}
        }
        if ending < 2 {
            chunks.extend(trailing.into_iter().map(RawChunk::Text));
        }

        let events = run_remote(chunks);
        prop_assert_eq!(terminal_count(&events), 1);
        prop_assert!(events.last().is_some_and(StreamEvent::is_terminal));
    }

    #[test]
    fn local_inline_call_survives_any_chunking(
        before in arb_text(),
        after in arb_text(),
        prompt in arb_prompt(),
        cuts in arb_cuts(),
    ) {
        let source = format!(
            "{before}<tool_call>{{\"name\": \"generate_video\", \"arguments\": {}}}</tool_call>{after}",
            arguments_json(&prompt, None)
        );
        let mut tokens: Vec<LocalToken> = split_at_cuts(&source, &cuts)
            .into_iter()
            .map(LocalToken::Token)
            .collect();
        tokens.push(LocalToken::End);

        let events = run_local(tokens);
        prop_assert_eq!(text_of(&events), format!("{before}{after}"));
        let calls = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCall { .. }))
            .count();
        prop_assert_eq!(calls, 1);
        prop_assert_eq!(events.last(), Some(&StreamEvent::Done));
    }
}
