use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vox_agent_core::{ToolInvoker, ToolResult};
use vox_ai::{Tool, ToolCall, VoxError, VoxErrorCode, validate_tool_arguments};

use super::registry::{RegisteredTool, ToolCategory, ToolRegistry, WeakToolRegistry};
use crate::collaborators::ConfirmationHandler;
use crate::config::MissingConfirmationPolicy;

/// Aborts the wrapped task when dropped, so a cancelled caller never leaves
/// a detached tool or delegation running.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Single entry point for executing tool calls. Every outcome, including
/// unknown tools, schema violations, denials and panics, comes back as a
/// `ToolResult`.
#[derive(Clone)]
pub struct ToolGateway {
    registry: ToolRegistry,
    permissions: Arc<RwLock<Vec<ToolCategory>>>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    missing_confirmation: MissingConfirmationPolicy,
}

impl ToolGateway {
    pub fn new(registry: ToolRegistry, permissions: Vec<ToolCategory>) -> Self {
        Self {
            registry,
            permissions: Arc::new(RwLock::new(permissions)),
            confirmation: None,
            missing_confirmation: MissingConfirmationPolicy::Allow,
        }
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn with_missing_confirmation(mut self, policy: MissingConfirmationPolicy) -> Self {
        self.missing_confirmation = policy;
        self
    }

    pub(crate) fn downgrade(&self) -> WeakToolGateway {
        WeakToolGateway {
            registry: self.registry.downgrade(),
            permissions: self.permissions.clone(),
            confirmation: self.confirmation.clone(),
            missing_confirmation: self.missing_confirmation,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn permissions(&self) -> Vec<ToolCategory> {
        self.permissions
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poison| poison.into_inner().clone())
    }

    pub fn set_permissions(&self, permissions: Vec<ToolCategory>) {
        let mut guard = self
            .permissions
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        *guard = permissions;
    }

    /// Tool schemas the model may call right now.
    pub fn available_tool_schemas(&self) -> Vec<Tool> {
        self.registry.available_tool_schemas(&self.permissions())
    }

    pub async fn execute(&self, name: &str, arguments: Value) -> ToolResult {
        self.execute_call(&ToolCall {
            id: String::new(),
            name: name.to_string(),
            arguments,
        })
        .await
    }

    pub async fn execute_call(&self, call: &ToolCall) -> ToolResult {
        let started_at = Instant::now();
        let result = match self.run(call).await {
            Ok(content) => ToolResult::success(&call.id, content),
            Err(error) => {
                warn!(
                    tool = call.name.as_str(),
                    error_code = ?error.code,
                    error = error.message.as_str(),
                    "tool call failed"
                );
                ToolResult::error(&call.id, error_text(&error))
            }
        };
        debug!(
            tool = call.name.as_str(),
            tool_call_id = call.id.as_str(),
            is_error = result.is_error,
            duration_ms = started_at.elapsed().as_millis() as u64,
            "tool call finished"
        );
        result
    }

    async fn run(&self, call: &ToolCall) -> Result<String, VoxError> {
        let tool = self.resolve_available(&call.name)?;
        let descriptor = &tool.descriptor;

        let schema = Tool {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.input_schema.clone(),
        };
        let arguments = validate_tool_arguments(&schema, call)?;

        if descriptor.category.requires_confirmation() && !descriptor.self_confirming {
            self.confirm(&descriptor.name, &descriptor.description).await?;
        }

        let handler = tool.handler.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { handler.execute(arguments).await }));
        match (&mut task.0).await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                Err(VoxError::new(
                    VoxErrorCode::ToolExecutionFailed,
                    format!("Tool '{}' panicked: {message}", descriptor.name),
                ))
            }
            Err(_) => Err(VoxError::aborted()),
        }
    }

    fn resolve_available(&self, requested: &str) -> Result<RegisteredTool, VoxError> {
        let Some(tool) = self.registry.resolve(requested) else {
            let available = self
                .available_tool_schemas()
                .into_iter()
                .map(|tool| tool.name)
                .collect::<Vec<_>>();
            return Err(VoxError::new(
                VoxErrorCode::ToolNotFound,
                format!(
                    "Tool '{requested}' not found. Available tools: {}. Use request_tools to enable additional tools.",
                    if available.is_empty() {
                        "(none)".to_string()
                    } else {
                        available.join(", ")
                    }
                ),
            ));
        };

        let permissions = self.permissions();
        let enabled = self.registry.enabled_names();
        let descriptor = &tool.descriptor;
        let available = enabled.contains(&descriptor.name)
            || (descriptor.is_baseline && permissions.contains(&descriptor.category));
        if !available {
            return Err(VoxError::new(
                VoxErrorCode::ToolNotFound,
                format!(
                    "Tool '{}' is not enabled. Call request_tools with [\"{}\"] first.",
                    descriptor.name, descriptor.name
                ),
            ));
        }
        Ok(tool)
    }

    async fn confirm(&self, tool_name: &str, description: &str) -> Result<(), VoxError> {
        let approved = match &self.confirmation {
            Some(handler) => handler.confirm(tool_name, description).await,
            None => match self.missing_confirmation {
                MissingConfirmationPolicy::Allow => {
                    debug!(tool = tool_name, "no confirmation handler, allowing");
                    true
                }
                MissingConfirmationPolicy::Deny => false,
            },
        };
        if approved {
            info!(tool = tool_name, "tool call confirmed");
            Ok(())
        } else {
            Err(VoxError::new(
                VoxErrorCode::ToolDenied,
                format!("The user denied permission to run '{tool_name}'."),
            ))
        }
    }
}

/// Gateway handle for tools registered in the gateway's own registry.
#[derive(Clone)]
pub(crate) struct WeakToolGateway {
    registry: WeakToolRegistry,
    permissions: Arc<RwLock<Vec<ToolCategory>>>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    missing_confirmation: MissingConfirmationPolicy,
}

impl WeakToolGateway {
    pub(crate) fn upgrade(&self) -> Option<ToolGateway> {
        Some(ToolGateway {
            registry: self.registry.upgrade()?,
            permissions: self.permissions.clone(),
            confirmation: self.confirmation.clone(),
            missing_confirmation: self.missing_confirmation,
        })
    }
}

#[async_trait]
impl ToolInvoker for ToolGateway {
    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        self.execute_call(call).await
    }

    fn available_tools(&self) -> Option<Vec<Tool>> {
        Some(self.available_tool_schemas())
    }
}

fn error_text(error: &VoxError) -> String {
    let violations = error
        .details
        .as_ref()
        .and_then(|details| details.get("validationErrors"))
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|error| error.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if violations.is_empty() {
        error.message.clone()
    } else {
        format!("{}: {}", error.message, violations.join("; "))
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return text.to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}
