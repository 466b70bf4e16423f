use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use vox_agent_core::{AgentContext, AgentLoopConfig, AgentRunOutcome, AgentRunStatus, run_agent_loop};
use vox_ai::{Message, VoxError, VoxErrorCode};

use super::manager::DelegationManager;
use super::types::DelegationTask;
use crate::collaborators::{AgentPersona, ContextCollaborator};
use crate::config::DelegationSettings;
use crate::error::DelegationError;
use crate::tools::{
    AbortOnDrop, ToolCategory, ToolDescriptor, ToolGateway, ToolHandler, WeakToolGateway,
};

pub const DELEGATE_TOOL_NAME: &str = "delegate_to_agent";
pub const DELEGATION_STATUS_TOOL_NAME: &str = "delegation_status";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DelegationRequest {
    pub agent_name: String,
    pub task: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegationReport {
    pub delegation_id: String,
    pub agent: String,
    pub text: String,
}

#[derive(Clone)]
pub struct DelegatorConfig {
    pub workspace_id: String,
    pub settings: DelegationSettings,
    /// Model and limits for the delegated agent's own loop.
    pub loop_config: AgentLoopConfig,
    /// Origin used when the workspace reports no active agent.
    pub fallback_origin: String,
}

/// Admits delegation requests and runs the delegated agent, racing it
/// against the configured timeout.
pub struct Delegator {
    manager: Arc<DelegationManager>,
    context: Arc<dyn ContextCollaborator>,
    gateway: WeakToolGateway,
    config: DelegatorConfig,
}

impl Delegator {
    pub fn new(
        manager: Arc<DelegationManager>,
        context: Arc<dyn ContextCollaborator>,
        gateway: &ToolGateway,
        config: DelegatorConfig,
    ) -> Self {
        Self {
            manager,
            context,
            gateway: gateway.downgrade(),
            config,
        }
    }

    pub fn manager(&self) -> &Arc<DelegationManager> {
        &self.manager
    }

    pub async fn delegate(
        &self,
        request: DelegationRequest,
    ) -> Result<DelegationReport, DelegationError> {
        let task = self.admit(&request)?;
        let mut settle = SettleGuard {
            manager: self.manager.clone(),
            id: task.id.clone(),
            settled: false,
        };

        match self.run_with_timeout(&task).await {
            Ok(text) => {
                settle.complete(&text);
                Ok(DelegationReport {
                    delegation_id: task.id,
                    agent: task.target_agent,
                    text,
                })
            }
            Err(error) => {
                settle.fail(&error.to_string());
                Err(error)
            }
        }
    }

    /// Admission checks in order; depth and cycle are checked by the manager
    /// atomically with the start.
    fn admit(&self, request: &DelegationRequest) -> Result<DelegationTask, DelegationError> {
        let workspace = self.config.workspace_id.as_str();
        let target = request.agent_name.trim();

        if !self.config.settings.enabled {
            return Err(DelegationError::NotEnabled);
        }
        if !self.context.agent_exists(workspace, target) {
            return Err(DelegationError::AgentNotFound(target.to_string()));
        }
        let origin = self.current_origin();
        if origin == target {
            return Err(DelegationError::SelfDelegation(origin));
        }

        let origin_policy = self.context.delegation_policy(workspace, &origin);
        if !origin_policy.can_delegate {
            return Err(DelegationError::PolicyDenied(format!(
                "agent '{origin}' is not allowed to delegate"
            )));
        }
        if !origin_policy.allows_target(target) {
            return Err(DelegationError::PolicyDenied(format!(
                "agent '{origin}' may not delegate to '{target}'"
            )));
        }
        let target_policy = self.context.delegation_policy(workspace, target);
        if !target_policy.can_receive_delegation {
            return Err(DelegationError::PolicyDenied(format!(
                "agent '{target}' does not accept delegated tasks"
            )));
        }

        let max_depth = self.config.settings.max_depth.min(origin_policy.max_depth);
        self.manager.admit_and_start(
            DelegationTask::new(origin, target, request.task.trim(), request.context.clone()),
            max_depth,
        )
    }

    fn current_origin(&self) -> String {
        self.manager
            .current_delegate()
            .or_else(|| self.context.active_agent(&self.config.workspace_id))
            .unwrap_or_else(|| self.config.fallback_origin.clone())
    }

    async fn run_with_timeout(&self, task: &DelegationTask) -> Result<String, DelegationError> {
        let Some(gateway) = self.gateway.upgrade() else {
            return Err(DelegationError::Failed {
                agent: task.target_agent.clone(),
                message: "tool gateway is no longer available".to_string(),
            });
        };
        let persona = self
            .context
            .agent_persona(&self.config.workspace_id, &task.target_agent);
        let agent_context = AgentContext {
            system_prompt: build_delegate_system_prompt(persona.as_ref(), task),
            messages: vec![Message::user(build_delegate_prompt(task))],
            tools: gateway.available_tool_schemas(),
        };
        let loop_config = self.config.loop_config.clone();
        let timeout = self.config.settings.timeout();

        let mut run = AbortOnDrop(tokio::spawn(async move {
            run_agent_loop(agent_context, &loop_config, &gateway, None, None).await
        }));

        let agent = task.target_agent.clone();
        tokio::select! {
            joined = &mut run.0 => match joined {
                Ok(Ok(outcome)) => outcome_text(&agent, outcome),
                Ok(Err(error)) => Err(DelegationError::Failed {
                    agent,
                    message: error.to_string(),
                }),
                Err(join_error) => Err(DelegationError::Failed {
                    agent,
                    message: format!("delegated run stopped: {join_error}"),
                }),
            },
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    delegation_id = task.id.as_str(),
                    target = agent.as_str(),
                    timeout_ms = self.config.settings.timeout_ms,
                    "delegation timed out"
                );
                Err(DelegationError::Timeout {
                    agent,
                    timeout_ms: self.config.settings.timeout_ms,
                })
            }
        }
    }
}

/// Records the delegation's terminal status exactly once. Dropping an
/// unsettled guard (the caller was cancelled) cancels the delegation.
struct SettleGuard {
    manager: Arc<DelegationManager>,
    id: String,
    settled: bool,
}

impl SettleGuard {
    fn complete(&mut self, text: &str) {
        self.settled = true;
        let _ = self.manager.complete_delegation(&self.id, text);
    }

    fn fail(&mut self, error: &str) {
        self.settled = true;
        let _ = self.manager.fail_delegation(&self.id, error);
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            info!(delegation_id = self.id.as_str(), "delegation cancelled");
            let _ = self.manager.cancel_delegation(&self.id);
        }
    }
}

fn outcome_text(agent: &str, outcome: AgentRunOutcome) -> Result<String, DelegationError> {
    let text = outcome.final_text.trim().to_string();
    match outcome.status {
        AgentRunStatus::Completed | AgentRunStatus::IterationLimitExceeded if !text.is_empty() => {
            Ok(text)
        }
        AgentRunStatus::Failed(error) => Err(DelegationError::Failed {
            agent: agent.to_string(),
            message: error.message,
        }),
        AgentRunStatus::Aborted => Err(DelegationError::Failed {
            agent: agent.to_string(),
            message: "delegated run was aborted".to_string(),
        }),
        _ => Err(DelegationError::Failed {
            agent: agent.to_string(),
            message: "no answer was produced".to_string(),
        }),
    }
}

fn build_delegate_system_prompt(persona: Option<&AgentPersona>, task: &DelegationTask) -> String {
    let base = persona
        .map(|persona| persona.system_prompt.clone())
        .unwrap_or_else(|| format!("You are {}.", task.target_agent));
    format!(
        "{base}\n\n<delegation_context>\nAgent '{}' delegated this task to you. Complete it and reply with a concise result for them.\n</delegation_context>",
        task.origin_agent
    )
}

fn build_delegate_prompt(task: &DelegationTask) -> String {
    match task.context.as_deref().map(str::trim) {
        Some(context) if !context.is_empty() => {
            format!("Context:\n{context}\n\nTask:\n{}", task.task)
        }
        _ => task.task.clone(),
    }
}

pub fn delegate_tool_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        DELEGATE_TOOL_NAME,
        ToolCategory::Safe,
        "Hand a task to another agent in this workspace and wait for its answer.",
        json!({
            "type": "object",
            "properties": {
                "agent_name": { "type": "string", "minLength": 1, "description": "Agent that should do the work." },
                "task": { "type": "string", "minLength": 1, "description": "What the agent should do." },
                "context": { "type": "string", "description": "Background the agent needs." }
            },
            "required": ["agent_name", "task"],
            "additionalProperties": false
        }),
    )
    .baseline()
}

pub fn delegation_status_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        DELEGATION_STATUS_TOOL_NAME,
        ToolCategory::Safe,
        "Report running and recent delegations, or one delegation by id.",
        json!({
            "type": "object",
            "properties": {
                "delegation_id": { "type": "string" }
            },
            "additionalProperties": false
        }),
    )
    .baseline()
}

/// Registers the delegate and status tools in `gateway`'s registry.
pub fn register_delegation_tools(gateway: &ToolGateway, delegator: Arc<Delegator>) {
    let registry = gateway.registry();
    registry.register(
        delegation_status_descriptor(),
        Arc::new(DelegationStatusHandler {
            manager: delegator.manager().clone(),
        }),
    );
    registry.register(delegate_tool_descriptor(), Arc::new(DelegateHandler { delegator }));
}

struct DelegateHandler {
    delegator: Arc<Delegator>,
}

#[async_trait]
impl ToolHandler for DelegateHandler {
    async fn execute(&self, arguments: Value) -> Result<String, VoxError> {
        let request: DelegationRequest = serde_json::from_value(arguments).map_err(|error| {
            VoxError::new(
                VoxErrorCode::ToolArgumentsInvalid,
                format!("invalid delegate_to_agent arguments: {error}"),
            )
        })?;

        let report = self.delegator.delegate(request).await.map_err(|error| {
            VoxError::new(VoxErrorCode::ToolExecutionFailed, error.to_string())
                .with_details(json!({ "kind": "delegation_error" }))
        })?;
        Ok(format!(
            "<delegation_result agent=\"{}\" id=\"{}\">\n{}\n</delegation_result>",
            report.agent, report.delegation_id, report.text
        ))
    }
}

#[derive(Debug, Deserialize)]
struct DelegationStatusInput {
    #[serde(default)]
    delegation_id: Option<String>,
}

struct DelegationStatusHandler {
    manager: Arc<DelegationManager>,
}

#[async_trait]
impl ToolHandler for DelegationStatusHandler {
    async fn execute(&self, arguments: Value) -> Result<String, VoxError> {
        let input: DelegationStatusInput = serde_json::from_value(arguments).map_err(|error| {
            VoxError::new(
                VoxErrorCode::ToolArgumentsInvalid,
                format!("invalid delegation_status arguments: {error}"),
            )
        })?;
        let id = input
            .delegation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        Ok(self.manager.status_summary(id))
    }
}
