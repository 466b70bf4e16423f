mod gateway;
mod registry;
mod request_tools;

pub(crate) use gateway::{AbortOnDrop, WeakToolGateway};
pub use gateway::ToolGateway;
pub use registry::{
    ExternalToolRoute, RegisteredTool, ToolCategory, ToolDescriptor, ToolHandler, ToolRegistry,
    WeakToolRegistry, sanitize_tool_name, unsanitize_tool_name,
};
pub use request_tools::{REQUEST_TOOLS_NAME, register_request_tools, request_tools_descriptor};
