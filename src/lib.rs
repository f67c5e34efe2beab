//! Hybrid chat orchestration
//!
//! Serves conversational turns from a local engine on this machine when the
//! hardware allows it, and from a remote `OpenAI`-compatible endpoint
//! otherwise. Engine output is normalized into one event stream; media tool
//! calls are dispatched to an external generator and fed back to the model.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod llm;
pub mod media;
pub mod probe;
pub mod session;
pub mod state_machine;
pub mod stream;
pub mod transcript;
