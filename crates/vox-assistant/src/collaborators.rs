//! Contracts for the pieces the assistant core drives but does not own:
//! speech recognition, speech synthesis, agent/workspace context and user
//! confirmation prompts.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vox_ai::VoxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Partial(String),
    Final(String),
    Error(String),
}

/// Speech-to-text. Each `start_listening` call hands back a fresh channel so
/// a stale recognition session can never feed a newer one.
#[async_trait]
pub trait SpeechCollaborator: Send + Sync {
    async fn start_listening(
        &self,
        silence_timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<SpeechEvent>, VoxError>;

    async fn stop_listening(&self);

    fn is_authorized(&self) -> bool;
}

#[async_trait]
pub trait TtsCollaborator: Send + Sync {
    async fn enqueue_sentence(&self, text: &str);

    async fn stop_and_clear(&self);

    fn is_speaking(&self) -> bool;

    /// Resolves once everything enqueued so far has been played.
    async fn wait_idle(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPolicy {
    pub can_delegate: bool,
    /// `None` allows every target.
    #[serde(default)]
    pub allowed_targets: Option<Vec<String>>,
    pub can_receive_delegation: bool,
    pub max_depth: u32,
}

impl Default for DelegationPolicy {
    fn default() -> Self {
        Self {
            can_delegate: true,
            allowed_targets: None,
            can_receive_delegation: true,
            max_depth: 3,
        }
    }
}

impl DelegationPolicy {
    pub fn allows_target(&self, target: &str) -> bool {
        match &self.allowed_targets {
            Some(targets) => targets.iter().any(|allowed| allowed == target),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPersona {
    pub name: String,
    pub system_prompt: String,
}

/// Agent identity and delegation policy, keyed by workspace. Storage
/// format belongs to the implementor.
pub trait ContextCollaborator: Send + Sync {
    fn agent_exists(&self, workspace_id: &str, agent_name: &str) -> bool;

    fn list_agents(&self, workspace_id: &str) -> Vec<String>;

    fn active_agent(&self, workspace_id: &str) -> Option<String>;

    /// Returns `false` when the agent is unknown.
    fn set_active_agent(&self, workspace_id: &str, agent_name: &str) -> bool;

    fn delegation_policy(&self, workspace_id: &str, agent_name: &str) -> DelegationPolicy;

    fn agent_persona(&self, workspace_id: &str, agent_name: &str) -> Option<AgentPersona>;
}

#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, tool_name: &str, description: &str) -> bool;
}

#[derive(Default)]
struct InMemoryWorkspace {
    agents: BTreeMap<String, (AgentPersona, DelegationPolicy)>,
    active: Option<String>,
}

/// Process-local `ContextCollaborator`, used by embedders without a
/// persistent agent store and by tests.
#[derive(Default)]
pub struct InMemoryContextStore {
    workspaces: Mutex<BTreeMap<String, InMemoryWorkspace>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_agent(
        &self,
        workspace_id: &str,
        persona: AgentPersona,
        policy: DelegationPolicy,
    ) {
        let mut workspaces = self.lock();
        let workspace = workspaces.entry(workspace_id.to_string()).or_default();
        if workspace.active.is_none() {
            workspace.active = Some(persona.name.clone());
        }
        workspace
            .agents
            .insert(persona.name.clone(), (persona, policy));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, InMemoryWorkspace>> {
        self.workspaces
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl ContextCollaborator for InMemoryContextStore {
    fn agent_exists(&self, workspace_id: &str, agent_name: &str) -> bool {
        self.lock()
            .get(workspace_id)
            .map(|workspace| workspace.agents.contains_key(agent_name))
            .unwrap_or(false)
    }

    fn list_agents(&self, workspace_id: &str) -> Vec<String> {
        self.lock()
            .get(workspace_id)
            .map(|workspace| workspace.agents.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn active_agent(&self, workspace_id: &str) -> Option<String> {
        self.lock()
            .get(workspace_id)
            .and_then(|workspace| workspace.active.clone())
    }

    fn set_active_agent(&self, workspace_id: &str, agent_name: &str) -> bool {
        let mut workspaces = self.lock();
        let Some(workspace) = workspaces.get_mut(workspace_id) else {
            return false;
        };
        if !workspace.agents.contains_key(agent_name) {
            return false;
        }
        workspace.active = Some(agent_name.to_string());
        true
    }

    fn delegation_policy(&self, workspace_id: &str, agent_name: &str) -> DelegationPolicy {
        self.lock()
            .get(workspace_id)
            .and_then(|workspace| workspace.agents.get(agent_name))
            .map(|(_, policy)| policy.clone())
            .unwrap_or_default()
    }

    fn agent_persona(&self, workspace_id: &str, agent_name: &str) -> Option<AgentPersona> {
        self.lock()
            .get(workspace_id)
            .and_then(|workspace| workspace.agents.get(agent_name))
            .map(|(persona, _)| persona.clone())
    }
}
