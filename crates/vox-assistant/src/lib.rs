//! Voice and text assistant core: session state machines, gated tool
//! execution with on-demand elevation, and bounded agent-to-agent
//! delegation.

mod assistant;
mod collaborators;
mod config;
mod delegation;
mod error;
mod logging;
mod session;
mod tools;

pub use assistant::{AssistantCollaborators, AssistantRuntime, build_assistant};
pub use collaborators::{
    AgentPersona, ConfirmationHandler, ContextCollaborator, DelegationPolicy,
    InMemoryContextStore, SpeechCollaborator, SpeechEvent, TtsCollaborator,
};
pub use config::{
    AgentSettings, AssistantConfig, DelegationSettings, LogConfig, MissingConfirmationPolicy,
    SessionSettings, ToolSettings, default_config_path, load_config, parse_config,
};
pub use delegation::{
    DELEGATE_TOOL_NAME, DELEGATION_STATUS_TOOL_NAME, DelegationChain, DelegationManager,
    DelegationReport, DelegationRequest, DelegationStatus, DelegationTask, Delegator,
    DelegatorConfig, RECENT_DELEGATION_CAPACITY, delegate_tool_descriptor,
    delegation_status_descriptor, register_delegation_tools,
};
pub use error::{AssistantError, DelegationError};
pub use logging::init_tracing;
pub use session::{
    InteractionState, SessionEndReason, SessionEvent, SessionHandle, SessionInput,
    SessionOrchestrator, SessionServices, SessionState, contains_phrase, normalize_utterance,
    split_sentences, starts_with_phrase,
};
pub use tools::{
    ExternalToolRoute, REQUEST_TOOLS_NAME, RegisteredTool, ToolCategory, ToolDescriptor,
    ToolGateway, ToolHandler, ToolRegistry, WeakToolRegistry, register_request_tools,
    request_tools_descriptor, sanitize_tool_name, unsanitize_tool_name,
};
