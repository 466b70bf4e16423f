use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static DELEGATION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DelegationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationTask {
    pub id: String,
    pub parent_delegation_id: Option<String>,
    pub origin_agent: String,
    pub target_agent: String,
    pub task: String,
    pub context: Option<String>,
    pub chain_depth: u32,
    pub status: DelegationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error_message: Option<String>,
}

impl DelegationTask {
    /// A pending task; parent and depth are assigned when it is started.
    pub fn new(
        origin_agent: impl Into<String>,
        target_agent: impl Into<String>,
        task: impl Into<String>,
        context: Option<String>,
    ) -> Self {
        Self {
            id: generate_delegation_id(),
            parent_delegation_id: None,
            origin_agent: origin_agent.into(),
            target_agent: target_agent.into(),
            task: task.into(),
            context,
            chain_depth: 0,
            status: DelegationStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error_message: None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|completed_at| (completed_at - self.started_at).num_milliseconds())
    }

    pub fn describe(&self) -> String {
        let mut line = format!(
            "[{}] {} -> {} ({}): {}",
            self.id,
            self.origin_agent,
            self.target_agent,
            self.status.label(),
            self.task
        );
        if let Some(duration_ms) = self.duration_ms() {
            line.push_str(&format!(" in {duration_ms} ms"));
        }
        if let Some(error) = &self.error_message {
            line.push_str(&format!(" | error: {error}"));
        }
        line
    }
}

/// One root delegation and everything it spawned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DelegationChain {
    pub tasks: Vec<DelegationTask>,
}

impl DelegationChain {
    pub fn root_id(&self) -> Option<&str> {
        self.tasks.first().map(|task| task.id.as_str())
    }

    pub fn current_depth(&self) -> u32 {
        self.tasks
            .iter()
            .map(|task| task.chain_depth)
            .max()
            .unwrap_or(0)
    }

    /// Distinct agents in order of first appearance, origins included.
    pub fn involved_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = Vec::new();
        for task in &self.tasks {
            for agent in [&task.origin_agent, &task.target_agent] {
                if !agents.iter().any(|known| known == agent) {
                    agents.push(agent.clone());
                }
            }
        }
        agents
    }

    pub fn contains_agent(&self, agent: &str) -> bool {
        self.tasks
            .iter()
            .any(|task| task.origin_agent == agent || task.target_agent == agent)
    }

    pub fn is_settled(&self) -> bool {
        self.tasks.iter().all(|task| task.status.is_terminal())
    }

    pub fn path(&self) -> String {
        self.involved_agents().join(" -> ")
    }
}

fn generate_delegation_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let counter = DELEGATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("delegation-{millis}-{counter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(origin: &str, target: &str, depth: u32) -> DelegationTask {
        let mut task = DelegationTask::new(origin, target, "look it up", None);
        task.status = DelegationStatus::Running;
        task.chain_depth = depth;
        task
    }

    #[test]
    fn chain_depth_and_agents_follow_tasks() {
        let chain = DelegationChain {
            tasks: vec![running("A", "B", 1), running("B", "C", 2)],
        };

        assert_eq!(chain.current_depth(), 2);
        assert_eq!(chain.involved_agents(), vec!["A", "B", "C"]);
        assert_eq!(chain.path(), "A -> B -> C");
        assert!(chain.contains_agent("A"));
        assert!(!chain.contains_agent("D"));
        assert!(!chain.is_settled());
    }

    #[test]
    fn delegation_ids_are_unique() {
        let first = DelegationTask::new("A", "B", "x", None);
        let second = DelegationTask::new("A", "B", "x", None);
        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("delegation-"));
    }
}
