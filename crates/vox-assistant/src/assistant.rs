use std::sync::Arc;

use vox_agent_core::{AgentLoopConfig, StreamFn};
use vox_ai::Model;

use crate::collaborators::{
    ConfirmationHandler, ContextCollaborator, SpeechCollaborator, TtsCollaborator,
};
use crate::config::AssistantConfig;
use crate::delegation::{
    DelegationManager, Delegator, DelegatorConfig, register_delegation_tools,
};
use crate::session::{SessionOrchestrator, SessionServices};
use crate::tools::{ToolGateway, ToolRegistry, register_request_tools};

/// Host-provided collaborators for one assistant session.
#[derive(Clone)]
pub struct AssistantCollaborators {
    pub tts: Arc<dyn TtsCollaborator>,
    pub speech: Option<Arc<dyn SpeechCollaborator>>,
    pub context: Arc<dyn ContextCollaborator>,
    pub confirmation: Option<Arc<dyn ConfirmationHandler>>,
}

/// A wired session plus the shared handles the host may still need, such as
/// the registry for registering its own tools.
pub struct AssistantRuntime {
    pub orchestrator: SessionOrchestrator,
    pub registry: ToolRegistry,
    pub gateway: ToolGateway,
    pub delegations: Arc<DelegationManager>,
}

/// Builds the registry, gateway, built-in tools and session orchestrator from
/// resolved configuration.
pub fn build_assistant(
    config: &AssistantConfig,
    workspace_id: impl Into<String>,
    model: Model,
    stream_fn: StreamFn,
    collaborators: AssistantCollaborators,
) -> AssistantRuntime {
    let workspace_id = workspace_id.into();

    let mut loop_config = AgentLoopConfig::new(model, stream_fn);
    loop_config.max_iterations = config.agent.max_iterations;
    loop_config.retry = config.agent.retry_config();

    let registry = ToolRegistry::new();
    register_request_tools(&registry, config.tools.default_elevation_minutes);

    let mut gateway = ToolGateway::new(registry.clone(), config.tools.permissions.clone())
        .with_missing_confirmation(config.tools.missing_confirmation);
    if let Some(confirmation) = collaborators.confirmation.clone() {
        gateway = gateway.with_confirmation(confirmation);
    }

    let delegations = Arc::new(DelegationManager::new());
    let fallback_origin = collaborators
        .context
        .active_agent(&workspace_id)
        .unwrap_or_else(|| "assistant".to_string());
    let delegator = Delegator::new(
        delegations.clone(),
        collaborators.context.clone(),
        &gateway,
        DelegatorConfig {
            workspace_id: workspace_id.clone(),
            settings: config.delegation.clone(),
            loop_config: loop_config.clone(),
            fallback_origin,
        },
    );
    register_delegation_tools(&gateway, Arc::new(delegator));

    let services = SessionServices {
        loop_config,
        gateway: gateway.clone(),
        tts: collaborators.tts,
        speech: collaborators.speech,
        context: collaborators.context,
        delegations: Some(delegations.clone()),
        workspace_id,
    };
    let orchestrator = SessionOrchestrator::new(
        config.session.clone(),
        config.agent.system_prompt.clone(),
        services,
    );

    AssistantRuntime {
        orchestrator,
        registry,
        gateway,
        delegations,
    }
}
