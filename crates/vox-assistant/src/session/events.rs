use serde::Serialize;

use super::state::{InteractionState, SessionState};

/// Inputs accepted by the session orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionInput {
    /// Typed user message.
    UserText(String),
    WakeDetected,
    SpeechPartial(String),
    SpeechFinal(String),
    SpeechError(String),
    /// Cancel the in-flight turn and any playback.
    Cancel,
    SwitchAgent(String),
    NewConversation,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    UserConfirmed,
    GraceElapsed,
    IdleTimeout,
    Shutdown,
}

/// What the orchestrator reports to UI observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    InteractionChanged {
        from: InteractionState,
        to: InteractionState,
    },
    SessionChanged {
        from: SessionState,
        to: SessionState,
    },
    PartialTranscript {
        text: String,
    },
    UserMessage {
        text: String,
    },
    AssistantDelta {
        delta: String,
        accumulated: String,
    },
    ToolStarted {
        name: String,
    },
    ToolFinished {
        name: String,
        is_error: bool,
    },
    AssistantMessage {
        text: String,
    },
    ConfirmationPrompt {
        text: String,
    },
    AgentSwitched {
        agent: String,
    },
    ConversationReset,
    SessionEnded {
        reason: SessionEndReason,
    },
    Error {
        message: String,
    },
}
