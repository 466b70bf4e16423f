use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "tool", rename_all = "snake_case")]
pub enum InteractionState {
    Idle,
    Listening,
    Processing,
    /// Sub-state of `Processing` while a tool call runs.
    ExecutingTool(String),
    Speaking,
}

impl InteractionState {
    /// Legal moves of the interaction machine. Staying in the same state is
    /// accepted as a no-op by the orchestrator and is not listed here.
    pub fn can_transition_to(&self, next: &InteractionState) -> bool {
        use InteractionState::*;
        matches!(
            (self, next),
            (Idle, Processing)
                | (Idle, Listening)
                | (Listening, Processing)
                | (Listening, Idle)
                | (Processing, Speaking)
                | (Processing, Idle)
                | (Processing, ExecutingTool(_))
                | (ExecutingTool(_), Processing)
                | (ExecutingTool(_), Idle)
                | (Speaking, Idle)
                | (Speaking, Listening)
        )
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            InteractionState::Processing | InteractionState::ExecutingTool(_)
        )
    }
}

impl Display for InteractionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InteractionState::Idle => f.write_str("idle"),
            InteractionState::Listening => f.write_str("listening"),
            InteractionState::Processing => f.write_str("processing"),
            InteractionState::ExecutingTool(name) => write!(f, "executing_tool({name})"),
            InteractionState::Speaking => f.write_str("speaking"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Inactive,
    Active,
    /// Waiting for the user to confirm ending the session.
    Ending,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Inactive, Active)
                | (Active, Ending)
                | (Active, Inactive)
                | (Ending, Active)
                | (Ending, Inactive)
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Inactive => f.write_str("inactive"),
            SessionState::Active => f.write_str("active"),
            SessionState::Ending => f.write_str("ending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InteractionState::*;
    use super::*;

    #[test]
    fn listed_transitions_are_legal() {
        let legal = [
            (Idle, Processing),
            (Idle, Listening),
            (Listening, Processing),
            (Listening, Idle),
            (Processing, Speaking),
            (Processing, Idle),
            (Speaking, Idle),
            (Speaking, Listening),
            (Processing, ExecutingTool("clock".to_string())),
            (ExecutingTool("clock".to_string()), Processing),
            (ExecutingTool("clock".to_string()), Idle),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(&to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn barge_in_must_route_through_idle() {
        assert!(!Listening.can_transition_to(&Speaking));
        assert!(!Idle.can_transition_to(&Speaking));
        assert!(!Speaking.can_transition_to(&Processing));
        assert!(!Idle.can_transition_to(&ExecutingTool("clock".to_string())));
        assert!(!ExecutingTool("clock".to_string()).can_transition_to(&Speaking));
    }

    #[test]
    fn session_cannot_skip_activation() {
        assert!(!SessionState::Inactive.can_transition_to(SessionState::Ending));
        assert!(SessionState::Ending.can_transition_to(SessionState::Inactive));
    }

    #[test]
    fn interaction_state_serializes_tool_name() {
        let value = serde_json::to_value(ExecutingTool("calendar".to_string())).expect("json");
        assert_eq!(
            value,
            serde_json::json!({"state": "executing_tool", "tool": "calendar"})
        );
    }
}
