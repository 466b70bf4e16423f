use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{VoxError, VoxErrorCode};
use crate::types::Tool;

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Checks `tool_call.arguments` against the tool's JSON schema. A `null`
/// argument payload is treated as an empty object, which is what providers
/// send for parameterless calls.
pub fn validate_tool_arguments(tool: &Tool, tool_call: &ToolCall) -> Result<Value, VoxError> {
    let compiled = JSONSchema::compile(&tool.parameters).map_err(|error| {
        VoxError::new(
            VoxErrorCode::SchemaInvalid,
            format!("Invalid JSON schema for tool '{}': {error}", tool.name),
        )
        .with_details(json!({
            "toolName": tool.name,
        }))
    })?;

    let arguments = if tool_call.arguments.is_null() {
        json!({})
    } else {
        tool_call.arguments.clone()
    };

    if let Err(errors) = compiled.validate(&arguments) {
        let validation_errors = errors
            .map(|error| {
                json!({
                    "path": error.instance_path.to_string(),
                    "message": error.to_string(),
                })
            })
            .collect::<Vec<_>>();

        return Err(VoxError::new(
            VoxErrorCode::ToolArgumentsInvalid,
            format!("Validation failed for tool '{}'", tool.name),
        )
        .with_details(json!({
            "toolName": tool.name,
            "toolCallId": tool_call.id,
            "arguments": arguments,
            "validationErrors": validation_errors,
        })));
    }

    Ok(arguments)
}
