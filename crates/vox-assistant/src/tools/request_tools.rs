use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use vox_ai::{VoxError, VoxErrorCode};

use super::registry::{
    ToolCategory, ToolDescriptor, ToolHandler, ToolRegistry, WeakToolRegistry, unsanitize_tool_name,
};

pub const REQUEST_TOOLS_NAME: &str = "request_tools";
const MAX_ELEVATION_MINUTES: u64 = 120;

#[derive(Debug, Deserialize)]
struct RequestToolsInput {
    tools: Vec<String>,
    #[serde(default)]
    minutes: Option<u64>,
}

pub fn request_tools_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        REQUEST_TOOLS_NAME,
        ToolCategory::Safe,
        "Temporarily enable additional tools by name. They are disabled again automatically after the given number of minutes.",
        json!({
            "type": "object",
            "properties": {
                "tools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Names of the tools to enable."
                },
                "minutes": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "How long the tools stay enabled."
                }
            },
            "required": ["tools"],
            "additionalProperties": false
        }),
    )
    .baseline()
}

/// Registers `request_tools` on `registry`.
pub fn register_request_tools(registry: &ToolRegistry, default_minutes: u64) {
    registry.register(
        request_tools_descriptor(),
        Arc::new(RequestToolsHandler {
            registry: registry.downgrade(),
            default_minutes: default_minutes.max(1),
        }),
    );
}

struct RequestToolsHandler {
    registry: WeakToolRegistry,
    default_minutes: u64,
}

#[async_trait]
impl ToolHandler for RequestToolsHandler {
    async fn execute(&self, arguments: Value) -> Result<String, VoxError> {
        let input: RequestToolsInput = serde_json::from_value(arguments).map_err(|error| {
            VoxError::new(
                VoxErrorCode::ToolArgumentsInvalid,
                format!("invalid request_tools arguments: {error}"),
            )
        })?;
        let minutes = input
            .minutes
            .unwrap_or(self.default_minutes)
            .clamp(1, MAX_ELEVATION_MINUTES);

        let Some(registry) = self.registry.upgrade() else {
            return Err(VoxError::new(
                VoxErrorCode::ToolExecutionFailed,
                "tool registry is no longer available",
            ));
        };
        let enabled = registry.enable(&input.tools);
        if enabled.is_empty() {
            let known = registry.tool_names();
            return Err(VoxError::new(
                VoxErrorCode::ToolNotFound,
                format!(
                    "None of the requested tools exist. Known tools: {}",
                    known.join(", ")
                ),
            ));
        }
        registry.enable_ttl(minutes);
        info!(tools = ?enabled, minutes, "tools elevated");

        let skipped = input
            .tools
            .iter()
            .map(|name| name.trim())
            .filter(|name| {
                let unsanitized = unsanitize_tool_name(name);
                !enabled
                    .iter()
                    .any(|enabled| enabled == name || *enabled == unsanitized)
            })
            .collect::<Vec<_>>();
        let mut text = format!(
            "Enabled for {minutes} minutes: {}.",
            enabled.join(", ")
        );
        if !skipped.is_empty() {
            text.push_str(&format!(" Unknown tools ignored: {}.", skipped.join(", ")));
        }
        Ok(text)
    }
}
