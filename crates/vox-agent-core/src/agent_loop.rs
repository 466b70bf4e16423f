use std::time::{Duration, Instant};

use tracing::{debug, warn};
use vox_ai::{
    AssistantContentBlock, AssistantMessage, AssistantMessageEvent, Context, Message, StopReason,
    ToolCall, VoxError, VoxErrorCode,
};

use crate::types::{
    AgentAbortSignal, AgentContext, AgentEvent, AgentEventSink, AgentLoopConfig, AgentRetryConfig,
    AgentRunMetrics, AgentRunOutcome, AgentRunStatus, ToolInvoker, ToolResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLoopError {
    EmptyContext,
    CannotContinueFromAssistant,
}

impl AgentLoopError {
    pub fn message(self) -> &'static str {
        match self {
            AgentLoopError::EmptyContext => "Cannot run: no messages in context",
            AgentLoopError::CannotContinueFromAssistant => {
                "Cannot run from message role: assistant"
            }
        }
    }
}

impl std::fmt::Display for AgentLoopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AgentLoopError {}

const CANCELLED_TOOL_MESSAGE: &str = "Skipped: the turn was cancelled.";

/// Drives one conversational turn to completion.
///
/// The model is called with the transcript and tool schemas; tool calls are
/// executed in request order through `tools` and their results appended
/// before the next call. The `max_iterations`-th tool-call response is not
/// executed: each call gets a synthesized error asking the model to wrap up
/// and one last request is sent without tools, so a run never makes more
/// than `max_iterations + 1` model requests.
///
/// Cancellation is checked before every model request and every tool
/// execution. A cancelled run keeps whatever assistant text had streamed and
/// returns it as `final_text`.
pub async fn run_agent_loop(
    context: AgentContext,
    config: &AgentLoopConfig,
    tools: &dyn ToolInvoker,
    signal: Option<&AgentAbortSignal>,
    observer: Option<&AgentEventSink>,
) -> Result<AgentRunOutcome, AgentLoopError> {
    validate_context(&context)?;
    let runner = AgentLoopRunner {
        context,
        config,
        tools,
        signal,
        observer,
        new_messages: Vec::new(),
        metrics: AgentRunMetrics::default(),
        latest_text: String::new(),
        tool_rounds: 0,
        finalizing: false,
    };
    Ok(runner.run().await)
}

fn validate_context(context: &AgentContext) -> Result<(), AgentLoopError> {
    if context.messages.is_empty() {
        return Err(AgentLoopError::EmptyContext);
    }
    if matches!(context.messages.last(), Some(Message::Assistant { .. })) {
        return Err(AgentLoopError::CannotContinueFromAssistant);
    }
    Ok(())
}

struct AgentLoopRunner<'a> {
    context: AgentContext,
    config: &'a AgentLoopConfig,
    tools: &'a dyn ToolInvoker,
    signal: Option<&'a AgentAbortSignal>,
    observer: Option<&'a AgentEventSink>,
    new_messages: Vec<Message>,
    metrics: AgentRunMetrics,
    latest_text: String,
    tool_rounds: usize,
    finalizing: bool,
}

enum AssistantResponse {
    Complete(AssistantMessage),
    Aborted(AssistantMessage),
}

impl<'a> AgentLoopRunner<'a> {
    async fn run(mut self) -> AgentRunOutcome {
        loop {
            if self.is_aborted() {
                return self.finish(AgentRunStatus::Aborted);
            }

            self.emit(AgentEvent::RequestStart {
                request_index: self.metrics.assistant_request_count + 1,
            });
            let message = match self.request_assistant_response().await {
                Ok(AssistantResponse::Complete(message)) => message,
                Ok(AssistantResponse::Aborted(partial)) => {
                    self.commit_partial(partial);
                    return self.finish(AgentRunStatus::Aborted);
                }
                Err(error) => {
                    warn!(
                        error_code = ?error.code,
                        error = error.message.as_str(),
                        "assistant request failed"
                    );
                    return self.finish(AgentRunStatus::Failed(error));
                }
            };

            let text = message.text();
            if !text.trim().is_empty() {
                self.latest_text = text.clone();
            }
            let tool_calls = extract_tool_calls(&message);
            self.push_message(message.into_message());

            if tool_calls.is_empty() {
                self.latest_text = text;
                return self.finish(AgentRunStatus::Completed);
            }

            if self.finalizing {
                warn!(
                    max_iterations = self.max_iterations(),
                    "model kept requesting tools after the finalize round"
                );
                self.answer_with_limit_errors(&tool_calls);
                return self.finish(AgentRunStatus::IterationLimitExceeded);
            }

            self.tool_rounds = self.tool_rounds.saturating_add(1);
            if self.tool_rounds >= self.max_iterations() {
                warn!(
                    max_iterations = self.max_iterations(),
                    pending_calls = tool_calls.len(),
                    "tool-call iteration limit reached, requesting final answer"
                );
                self.emit(AgentEvent::IterationLimitReached {
                    max_iterations: self.max_iterations(),
                });
                self.answer_with_limit_errors(&tool_calls);
                self.finalizing = true;
                continue;
            }

            if self.execute_tool_calls(&tool_calls).await {
                return self.finish(AgentRunStatus::Aborted);
            }
        }
    }

    async fn request_assistant_response(&mut self) -> Result<AssistantResponse, VoxError> {
        let started_at = Instant::now();
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1usize;
        let result = loop {
            match self.stream_assistant_response_once().await {
                Ok(response) => break Ok(response),
                Err(error) => {
                    if attempt >= max_attempts || !error.code.is_retryable() {
                        break Err(error);
                    }
                    let delay_ms = retry_delay_ms(&self.config.retry, attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms,
                        error = error.message.as_str(),
                        "scheduling retry after assistant response failure"
                    );
                    self.emit(AgentEvent::RetryScheduled {
                        attempt,
                        max_attempts,
                        delay_ms,
                        error: error.as_compact_json(),
                    });
                    if !self.wait_retry_backoff(delay_ms).await {
                        break Ok(AssistantResponse::Aborted(self.empty_partial()));
                    }
                    self.metrics.retry_count = self.metrics.retry_count.saturating_add(1);
                    attempt = attempt.saturating_add(1);
                }
            }
        };

        self.metrics.assistant_request_count = self.metrics.assistant_request_count.saturating_add(1);
        self.metrics.assistant_request_total_ms = self
            .metrics
            .assistant_request_total_ms
            .saturating_add(started_at.elapsed().as_millis() as u64);
        result
    }

    async fn stream_assistant_response_once(&mut self) -> Result<AssistantResponse, VoxError> {
        let llm_context = self.build_llm_context();
        let response = self.config.stream_fn.stream(
            self.config.model.clone(),
            llm_context,
            self.config.options.clone(),
        )?;

        let mut partial = self.empty_partial();
        loop {
            let next_event = if let Some(signal) = self.signal {
                tokio::select! {
                    _ = signal.cancelled() => None,
                    event = response.next() => event,
                }
            } else {
                response.next().await
            };

            let Some(event) = next_event else {
                if self.is_aborted() {
                    return Ok(AssistantResponse::Aborted(partial));
                }
                return Err(VoxError::new(
                    VoxErrorCode::ProviderProtocol,
                    "Assistant stream ended without terminal event",
                ));
            };

            match event {
                AssistantMessageEvent::Start { partial: started } => {
                    partial = started;
                }
                AssistantMessageEvent::TextDelta {
                    delta,
                    partial: updated,
                } => {
                    partial = updated;
                    let accumulated = partial.text();
                    self.latest_text = accumulated.clone();
                    self.emit(AgentEvent::TextDelta { delta, accumulated });
                }
                AssistantMessageEvent::ToolCall {
                    partial: updated, ..
                } => {
                    partial = updated;
                }
                AssistantMessageEvent::Done { message } => {
                    return Ok(AssistantResponse::Complete(message));
                }
                AssistantMessageEvent::Error { error } => {
                    return Err(VoxError::new(
                        VoxErrorCode::ProviderTransport,
                        error
                            .error_message
                            .unwrap_or_else(|| "assistant stream failed".to_string()),
                    ));
                }
            }
        }
    }

    fn build_llm_context(&self) -> Context {
        let tools = if self.finalizing {
            None
        } else {
            let current = self
                .tools
                .available_tools()
                .unwrap_or_else(|| self.context.tools.clone());
            (!current.is_empty()).then_some(current)
        };
        Context {
            system_prompt: Some(self.context.system_prompt.clone()),
            messages: self.context.messages.clone(),
            tools,
        }
    }

    async fn wait_retry_backoff(&self, delay_ms: u64) -> bool {
        if delay_ms == 0 {
            return !self.is_aborted();
        }
        if let Some(signal) = self.signal {
            tokio::select! {
                _ = signal.cancelled() => false,
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
            }
        } else {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            true
        }
    }

    /// Returns `true` when the run was cancelled part way.
    async fn execute_tool_calls(&mut self, tool_calls: &[ToolCall]) -> bool {
        for (index, call) in tool_calls.iter().enumerate() {
            if self.is_aborted() {
                self.skip_remaining_calls(&tool_calls[index..]);
                return true;
            }

            self.emit(AgentEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.arguments.clone(),
            });
            let started_at = Instant::now();
            let mut result = if let Some(signal) = self.signal {
                tokio::select! {
                    _ = signal.cancelled() => ToolResult::error(&call.id, "Tool execution cancelled"),
                    result = self.tools.invoke(call) => result,
                }
            } else {
                self.tools.invoke(call).await
            };
            // The transcript pairs results with calls by id, whatever the invoker echoed.
            result.tool_call_id = call.id.clone();

            let duration_ms = started_at.elapsed().as_millis() as u64;
            self.metrics.tool_execution_count = self.metrics.tool_execution_count.saturating_add(1);
            self.metrics.tool_execution_total_ms = self
                .metrics
                .tool_execution_total_ms
                .saturating_add(duration_ms);
            debug!(
                tool_call_id = call.id.as_str(),
                tool_name = call.name.as_str(),
                duration_ms,
                is_error = result.is_error,
                "tool execution finished"
            );
            self.emit(AgentEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                is_error: result.is_error,
                duration_ms,
            });
            self.push_message(result.into_message(&call.name));
        }

        if self.is_aborted() {
            return true;
        }
        false
    }

    fn skip_remaining_calls(&mut self, tool_calls: &[ToolCall]) {
        for call in tool_calls {
            self.push_message(ToolResult::error(&call.id, CANCELLED_TOOL_MESSAGE).into_message(&call.name));
        }
    }

    fn answer_with_limit_errors(&mut self, tool_calls: &[ToolCall]) {
        let text = format!(
            "Tool call limit of {} rounds reached. Do not request more tools; answer the user now with the information you already have.",
            self.max_iterations()
        );
        for call in tool_calls {
            self.push_message(ToolResult::error(&call.id, text.clone()).into_message(&call.name));
        }
    }

    /// Keeps streamed text of an interrupted response. Half-streamed tool
    /// calls are dropped: they would have no matching result.
    fn commit_partial(&mut self, partial: AssistantMessage) {
        let text = partial.text();
        if text.is_empty() {
            return;
        }
        self.latest_text = text.clone();
        let mut message = partial;
        message.content = vec![AssistantContentBlock::Text { text }];
        message.stop_reason = StopReason::Aborted;
        message.error_message = Some("Request was aborted".to_string());
        self.push_message(message.into_message());
    }

    fn push_message(&mut self, message: Message) {
        self.context.messages.push(message.clone());
        self.new_messages.push(message);
    }

    fn empty_partial(&self) -> AssistantMessage {
        AssistantMessage::empty(&self.config.model.provider, &self.config.model.id)
    }

    /// At least one tool round is always allowed.
    fn max_iterations(&self) -> usize {
        self.config.max_iterations.max(1)
    }

    fn is_aborted(&self) -> bool {
        self.signal.map(|signal| signal.is_aborted()).unwrap_or(false)
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(observer) = self.observer {
            let _ = observer.send(event);
        }
    }

    fn finish(self, status: AgentRunStatus) -> AgentRunOutcome {
        debug!(
            assistant_request_count = self.metrics.assistant_request_count,
            assistant_request_total_ms = self.metrics.assistant_request_total_ms,
            tool_execution_count = self.metrics.tool_execution_count,
            tool_execution_total_ms = self.metrics.tool_execution_total_ms,
            retry_count = self.metrics.retry_count,
            status = ?status,
            "agent loop metrics"
        );
        self.emit(AgentEvent::Metrics {
            metrics: self.metrics.clone(),
        });
        AgentRunOutcome {
            messages: self.new_messages,
            final_text: self.latest_text,
            status,
            metrics: self.metrics,
        }
    }
}

fn extract_tool_calls(message: &AssistantMessage) -> Vec<ToolCall> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            AssistantContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            AssistantContentBlock::Text { .. } => None,
        })
        .collect()
}

fn retry_delay_ms(retry: &AgentRetryConfig, attempt: usize) -> u64 {
    if retry.initial_backoff_ms == 0 {
        return 0;
    }
    let shift = attempt.saturating_sub(1).min(62) as u32;
    let factor = 1_u64 << shift;
    let delay = retry.initial_backoff_ms.saturating_mul(factor);
    if retry.max_backoff_ms == 0 {
        delay
    } else {
        delay.min(retry.max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_caps() {
        let retry = AgentRetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
        };
        assert_eq!(retry_delay_ms(&retry, 1), 100);
        assert_eq!(retry_delay_ms(&retry, 2), 200);
        assert_eq!(retry_delay_ms(&retry, 3), 300);
        assert_eq!(retry_delay_ms(&retry, 60), 300);
    }

    #[test]
    fn validate_context_rejects_empty_and_assistant_tail() {
        let empty = AgentContext {
            system_prompt: String::new(),
            messages: vec![],
            tools: vec![],
        };
        assert_eq!(validate_context(&empty), Err(AgentLoopError::EmptyContext));

        let assistant_tail = AgentContext {
            system_prompt: String::new(),
            messages: vec![
                Message::user("hi"),
                Message::assistant_text("hello", StopReason::Stop),
            ],
            tools: vec![],
        };
        assert_eq!(
            validate_context(&assistant_tail),
            Err(AgentLoopError::CannotContinueFromAssistant)
        );
    }
}
