use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub api: String,
    pub provider: String,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
}

/// Per-request knobs handed to the provider alongside the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StreamOptions {
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "length")]
    Length,
    #[serde(rename = "toolUse")]
    ToolUse,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "aborted")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "toolCall")]
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContentBlock>,
    pub provider: String,
    pub model: String,
    #[serde(rename = "stopReason")]
    pub stop_reason: StopReason,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: i64,
}

impl AssistantMessage {
    pub fn empty(provider: &str, model: &str) -> Self {
        Self {
            content: vec![],
            provider: provider.to_string(),
            model: model.to_string(),
            stop_reason: StopReason::Stop,
            error_message: None,
            timestamp: timestamp_millis(),
        }
    }

    /// Concatenated text blocks, in order.
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, AssistantContentBlock::ToolCall { .. }))
    }

    pub fn into_message(self) -> Message {
        Message::Assistant {
            content: self.content,
            provider: self.provider,
            model: self.model,
            stop_reason: self.stop_reason,
            error_message: self.error_message,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User { content: String, timestamp: i64 },
    #[serde(rename = "assistant")]
    Assistant {
        content: Vec<AssistantContentBlock>,
        provider: String,
        model: String,
        #[serde(rename = "stopReason")]
        stop_reason: StopReason,
        #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        timestamp: i64,
    },
    #[serde(rename = "toolResult")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        content: String,
        #[serde(rename = "isError")]
        is_error: bool,
        timestamp: i64,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
            timestamp: timestamp_millis(),
        }
    }

    /// Plain assistant reply carrying only text, used when partial output is
    /// committed outside of a provider response.
    pub fn assistant_text(text: impl Into<String>, stop_reason: StopReason) -> Self {
        Self::Assistant {
            content: vec![AssistantContentBlock::Text { text: text.into() }],
            provider: String::new(),
            model: String::new(),
            stop_reason,
            error_message: None,
            timestamp: timestamp_millis(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "toolResult",
        }
    }

    /// Text payload of the message regardless of role.
    pub fn text(&self) -> String {
        match self {
            Self::User { content, .. } => content.clone(),
            Self::Assistant { content, .. } => collect_text(content),
            Self::ToolResult { content, .. } => content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

/// Incremental provider output. `partial` always holds the message as
/// accumulated so far, so consumers never need to replay deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantMessageEvent {
    #[serde(rename = "start")]
    Start { partial: AssistantMessage },
    #[serde(rename = "text_delta")]
    TextDelta {
        delta: String,
        partial: AssistantMessage,
    },
    #[serde(rename = "toolcall")]
    ToolCall {
        id: String,
        name: String,
        partial: AssistantMessage,
    },
    #[serde(rename = "done")]
    Done { message: AssistantMessage },
    #[serde(rename = "error")]
    Error { error: AssistantMessage },
}

pub fn timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn collect_text(content: &[AssistantContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            AssistantContentBlock::Text { text } => Some(text.as_str()),
            AssistantContentBlock::ToolCall { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn message_serializes_with_role_tag_and_camel_case_fields() {
        let message = Message::ToolResult {
            tool_call_id: "call-1".to_string(),
            tool_name: "weather".to_string(),
            content: "sunny".to_string(),
            is_error: false,
            timestamp: 7,
        };

        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(
            value,
            json!({
                "role": "toolResult",
                "toolCallId": "call-1",
                "toolName": "weather",
                "content": "sunny",
                "isError": false,
                "timestamp": 7
            })
        );
    }

    #[test]
    fn assistant_text_skips_tool_call_blocks() {
        let mut message = AssistantMessage::empty("test", "model");
        message.content = vec![
            AssistantContentBlock::Text {
                text: "Checking ".to_string(),
            },
            AssistantContentBlock::ToolCall {
                id: "call-1".to_string(),
                name: "calendar".to_string(),
                arguments: json!({}),
            },
            AssistantContentBlock::Text {
                text: "now.".to_string(),
            },
        ];

        assert_eq!(message.text(), "Checking now.");
        assert!(message.has_tool_calls());
        assert_eq!(message.into_message().role(), "assistant");
    }
}
