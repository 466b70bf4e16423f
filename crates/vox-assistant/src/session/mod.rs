mod events;
mod orchestrator;
mod phrases;
mod state;

pub use events::{SessionEndReason, SessionEvent, SessionInput};
pub use orchestrator::{SessionHandle, SessionOrchestrator, SessionServices};
pub use phrases::{contains_phrase, normalize_utterance, split_sentences, starts_with_phrase};
pub use state::{InteractionState, SessionState};
