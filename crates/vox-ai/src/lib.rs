//! Provider-agnostic LLM collaborator contract: messages, tool schemas and
//! the assistant event stream a provider hands back.

mod error;
mod event_stream;
mod types;
mod validation;

pub use error::{VoxError, VoxErrorCode};
pub use event_stream::AssistantMessageEventStream;
pub use types::{
    AssistantContentBlock, AssistantMessage, AssistantMessageEvent, Context, Message, Model,
    StopReason, StreamOptions, Tool, timestamp_millis,
};
pub use validation::{ToolCall, validate_tool_arguments};
