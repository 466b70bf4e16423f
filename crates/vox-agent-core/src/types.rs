use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use vox_ai::{
    AssistantMessageEventStream, Context, Message, Model, StreamOptions, Tool, ToolCall, VoxError,
    timestamp_millis,
};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// The LLM collaborator seam: one request in, one event stream out.
pub trait StreamExecutor: Send + Sync {
    fn stream(
        &self,
        model: Model,
        context: Context,
        options: StreamOptions,
    ) -> Result<AssistantMessageEventStream, VoxError>;
}

impl<F> StreamExecutor for F
where
    F: Fn(Model, Context, StreamOptions) -> Result<AssistantMessageEventStream, VoxError>
        + Send
        + Sync
        + 'static,
{
    fn stream(
        &self,
        model: Model,
        context: Context,
        options: StreamOptions,
    ) -> Result<AssistantMessageEventStream, VoxError> {
        (self)(model, context, options)
    }
}

pub type StreamFn = Arc<dyn StreamExecutor>;

/// Outcome of one tool call. Every `ToolCall` the model emits is answered by
/// exactly one of these before the loop talks to the model again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    pub fn into_message(self, tool_name: &str) -> Message {
        Message::ToolResult {
            tool_call_id: self.tool_call_id,
            tool_name: tool_name.to_string(),
            content: self.content,
            is_error: self.is_error,
            timestamp: timestamp_millis(),
        }
    }
}

/// Executes tool calls on behalf of the loop. Implementations must never
/// fail: every error is folded into an error `ToolResult`.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, call: &ToolCall) -> ToolResult;

    /// Current tool schemas, re-read before every model request so tools
    /// enabled mid-turn are offered on the next request. `None` keeps the
    /// list the run started with.
    fn available_tools(&self) -> Option<Vec<Tool>> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRetryConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AgentRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Clone)]
pub struct AgentLoopConfig {
    pub model: Model,
    pub stream_fn: StreamFn,
    pub options: StreamOptions,
    pub max_iterations: usize,
    pub retry: AgentRetryConfig,
}

impl AgentLoopConfig {
    pub fn new(model: Model, stream_fn: StreamFn) -> Self {
        Self {
            model,
            stream_fn,
            options: StreamOptions::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry: AgentRetryConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct AgentContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentRunMetrics {
    pub assistant_request_count: usize,
    pub assistant_request_total_ms: u64,
    pub tool_execution_count: usize,
    pub tool_execution_total_ms: u64,
    pub retry_count: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AgentRunStatus {
    Completed,
    Aborted,
    /// The finalize round still asked for tools.
    IterationLimitExceeded,
    Failed(VoxError),
}

#[derive(Clone, Debug)]
pub struct AgentRunOutcome {
    /// Messages produced by this run, in transcript order.
    pub messages: Vec<Message>,
    /// Final answer, or the best partial text when the run did not complete.
    pub final_text: String,
    pub status: AgentRunStatus,
    pub metrics: AgentRunMetrics,
}

impl AgentRunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, AgentRunStatus::Completed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    RequestStart {
        request_index: usize,
    },
    TextDelta {
        delta: String,
        accumulated: String,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
    RetryScheduled {
        attempt: usize,
        max_attempts: usize,
        delay_ms: u64,
        error: String,
    },
    IterationLimitReached {
        max_iterations: usize,
    },
    Metrics {
        metrics: AgentRunMetrics,
    },
}

/// Per-run observer channel. A run only ever writes to the sink it was
/// started with, so stale turns cannot leak events into newer ones.
pub type AgentEventSink = mpsc::UnboundedSender<AgentEvent>;

#[derive(Clone)]
pub struct AgentAbortSignal {
    inner: Arc<AbortInner>,
}

struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AgentAbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

pub struct AgentAbortController {
    signal: AgentAbortSignal,
}

impl AgentAbortController {
    pub fn new() -> Self {
        Self {
            signal: AgentAbortSignal {
                inner: Arc::new(AbortInner {
                    aborted: AtomicBool::new(false),
                    notify: Notify::new(),
                }),
            },
        }
    }

    pub fn signal(&self) -> AgentAbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.signal.inner.aborted.store(true, Ordering::SeqCst);
        self.signal.inner.notify.notify_waiters();
    }
}

impl Default for AgentAbortController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_for_waiters_registered_before_abort() {
        let controller = AgentAbortController::new();
        let signal = controller.signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("join");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_once_aborted() {
        let controller = AgentAbortController::new();
        controller.abort();
        tokio::time::timeout(Duration::from_millis(50), controller.signal().cancelled())
            .await
            .expect("already-aborted signal should not block");
    }

    #[test]
    fn tool_result_message_keeps_call_id_and_error_flag() {
        let message = ToolResult::error("call-9", "denied").into_message("shell");
        match message {
            Message::ToolResult {
                tool_call_id,
                tool_name,
                is_error,
                ..
            } => {
                assert_eq!(tool_call_id, "call-9");
                assert_eq!(tool_name, "shell");
                assert!(is_error);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
