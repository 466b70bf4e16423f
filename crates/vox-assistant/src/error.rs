use thiserror::Error;

use crate::session::InteractionState;

/// Reasons a delegation is refused or ends badly. Each admission check has
/// its own variant so the model can tell the user exactly what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationError {
    #[error("Delegation is disabled in this workspace")]
    NotEnabled,

    #[error("Agent '{0}' was not found in this workspace")]
    AgentNotFound(String),

    #[error("Agent '{0}' cannot delegate to itself")]
    SelfDelegation(String),

    #[error("Delegation policy denied: {0}")]
    PolicyDenied(String),

    #[error("Delegation depth {current} reached the limit of {max}")]
    MaxDepthExceeded { current: u32, max: u32 },

    #[error("Agent '{target}' is already part of the delegation chain ({path})")]
    Cyclic { target: String, path: String },

    #[error("Delegation to '{agent}' timed out after {timeout_ms} ms")]
    Timeout { agent: String, timeout_ms: u64 },

    #[error("Unknown delegation id '{0}'")]
    UnknownDelegation(String),

    #[error("Agent '{agent}' could not finish the task: {message}")]
    Failed { agent: String, message: String },
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Tool '{0}' was denied by the user")]
    ToolDenied(String),

    #[error("Tool '{name}' failed: {message}")]
    ToolExecutionFailed { name: String, message: String },

    #[error("Agent loop stopped after {0} tool rounds")]
    AgentLoopIterationLimitExceeded(usize),

    #[error("Invalid state transition {from} -> {to}")]
    InvalidStateTransition {
        from: InteractionState,
        to: InteractionState,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Delegation error: {0}")]
    Delegation(#[from] DelegationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
