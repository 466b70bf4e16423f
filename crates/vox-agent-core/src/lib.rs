//! Bounded agentic tool-calling loop built on top of `vox-ai`.

mod agent_loop;
mod types;

pub use agent_loop::{AgentLoopError, run_agent_loop};
pub use types::{
    AgentAbortController, AgentAbortSignal, AgentContext, AgentEvent, AgentEventSink,
    AgentLoopConfig, AgentRetryConfig, AgentRunMetrics, AgentRunOutcome, AgentRunStatus,
    DEFAULT_MAX_ITERATIONS, StreamExecutor, StreamFn, ToolInvoker, ToolResult,
};
