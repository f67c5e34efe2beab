//! Fallback controller state machine
//!
//! One turn of a conversation as a pure transition function. The session
//! executor feeds inputs and carries out the returned effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::TurnInput;
pub use state::{TurnContext, TurnState};
pub use transition::{transition, TransitionError, TransitionResult};
