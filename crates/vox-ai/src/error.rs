use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoxErrorCode {
    ToolNotFound,
    ToolArgumentsInvalid,
    ToolExecutionFailed,
    ToolDenied,
    SchemaInvalid,
    ProviderTransport,
    ProviderProtocol,
    Aborted,
}

impl VoxErrorCode {
    /// Transport failures are the only ones worth retrying; everything else
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderTransport)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxError {
    pub code: VoxErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl VoxError {
    pub fn new(code: VoxErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn aborted() -> Self {
        Self::new(VoxErrorCode::Aborted, "Request was aborted")
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":\"provider_protocol\",\"message\":\"{}\"}}",
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

impl Display for VoxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for VoxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_json_uses_snake_case_codes_and_skips_empty_details() {
        let error = VoxError::new(VoxErrorCode::ToolDenied, "user said no");
        assert_eq!(
            error.as_compact_json(),
            r#"{"code":"tool_denied","message":"user said no"}"#
        );
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(VoxErrorCode::ProviderTransport.is_retryable());
        assert!(!VoxErrorCode::ProviderProtocol.is_retryable());
        assert!(!VoxErrorCode::Aborted.is_retryable());
    }
}
