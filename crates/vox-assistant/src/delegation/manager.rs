use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{DelegationChain, DelegationStatus, DelegationTask};
use crate::error::DelegationError;

pub const RECENT_DELEGATION_CAPACITY: usize = 20;
const SUMMARY_RECENT_COUNT: usize = 5;

#[derive(Default)]
struct ManagerState {
    active: Vec<DelegationTask>,
    recent: VecDeque<DelegationTask>,
    chain: Option<DelegationChain>,
}

/// Owns every in-flight delegation, the bounded history of finished ones and
/// the single active chain.
#[derive(Default)]
pub struct DelegationManager {
    state: Mutex<ManagerState>,
}

impl DelegationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `task` running and appends it to the active set and the chain.
    /// Parent and depth come from the deepest running task whose target is
    /// this task's origin; a task without one starts at depth 1.
    pub fn start_delegation(&self, task: DelegationTask) -> DelegationTask {
        let mut state = self.lock();
        start_locked(&mut state, task)
    }

    /// Runs the depth and cycle checks and starts the task under one lock,
    /// so concurrent requests cannot both pass against the same chain.
    pub fn admit_and_start(
        &self,
        task: DelegationTask,
        max_depth: u32,
    ) -> Result<DelegationTask, DelegationError> {
        let mut state = self.lock();
        let current_depth = state
            .chain
            .as_ref()
            .map(DelegationChain::current_depth)
            .unwrap_or(0);
        if current_depth >= max_depth {
            warn!(
                current_depth,
                max_depth,
                target = task.target_agent.as_str(),
                "delegation rejected: max depth"
            );
            return Err(DelegationError::MaxDepthExceeded {
                current: current_depth,
                max: max_depth,
            });
        }
        if let Some(chain) = &state.chain {
            if chain.contains_agent(&task.target_agent) {
                warn!(
                    target = task.target_agent.as_str(),
                    path = chain.path().as_str(),
                    "delegation rejected: cycle"
                );
                return Err(DelegationError::Cyclic {
                    target: task.target_agent.clone(),
                    path: chain.path(),
                });
            }
        }
        Ok(start_locked(&mut state, task))
    }

    pub fn complete_delegation(
        &self,
        id: &str,
        result: impl Into<String>,
    ) -> Result<DelegationTask, DelegationError> {
        self.finish(id, DelegationStatus::Completed, Some(result.into()), None)
    }

    pub fn fail_delegation(
        &self,
        id: &str,
        error: impl Into<String>,
    ) -> Result<DelegationTask, DelegationError> {
        self.finish(id, DelegationStatus::Failed, None, Some(error.into()))
    }

    pub fn cancel_delegation(&self, id: &str) -> Result<DelegationTask, DelegationError> {
        self.finish(id, DelegationStatus::Cancelled, None, None)
    }

    /// Cancels every active delegation, deepest first. Returns how many.
    pub fn cancel_all(&self) -> usize {
        let mut ids = {
            let state = self.lock();
            state
                .active
                .iter()
                .map(|task| (task.chain_depth, task.id.clone()))
                .collect::<Vec<_>>()
        };
        ids.sort_by(|left, right| right.0.cmp(&left.0));
        ids.into_iter()
            .filter(|(_, id)| self.cancel_delegation(id).is_ok())
            .count()
    }

    pub fn get(&self, id: &str) -> Option<DelegationTask> {
        let state = self.lock();
        state
            .active
            .iter()
            .chain(state.recent.iter())
            .find(|task| task.id == id)
            .cloned()
    }

    pub fn active(&self) -> Vec<DelegationTask> {
        self.lock().active.clone()
    }

    /// Most recent first.
    pub fn recent(&self) -> Vec<DelegationTask> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn chain(&self) -> Option<DelegationChain> {
        self.lock().chain.clone()
    }

    pub fn current_depth(&self) -> u32 {
        self.lock()
            .chain
            .as_ref()
            .map(DelegationChain::current_depth)
            .unwrap_or(0)
    }

    /// Agent currently doing delegated work, if any: the target of the
    /// deepest running task.
    pub fn current_delegate(&self) -> Option<String> {
        self.lock()
            .active
            .iter()
            .filter(|task| task.status == DelegationStatus::Running)
            .max_by_key(|task| task.chain_depth)
            .map(|task| task.target_agent.clone())
    }

    pub fn status_summary(&self, delegation_id: Option<&str>) -> String {
        if let Some(id) = delegation_id {
            return match self.get(id) {
                Some(task) => {
                    let mut text = task.describe();
                    if let Some(result) = &task.result {
                        text.push_str(&format!("\nResult: {result}"));
                    }
                    text
                }
                None => DelegationError::UnknownDelegation(id.to_string()).to_string(),
            };
        }

        let state = self.lock();
        let mut lines = Vec::new();
        if state.active.is_empty() {
            lines.push("No active delegations.".to_string());
        } else {
            lines.push(format!("Active delegations ({}):", state.active.len()));
            lines.extend(state.active.iter().map(|task| format!("- {}", task.describe())));
        }
        if !state.recent.is_empty() {
            lines.push("Recent delegations:".to_string());
            lines.extend(
                state
                    .recent
                    .iter()
                    .take(SUMMARY_RECENT_COUNT)
                    .map(|task| format!("- {}", task.describe())),
            );
        }
        match &state.chain {
            Some(chain) => lines.push(format!(
                "Chain depth: {} ({})",
                chain.current_depth(),
                chain.path()
            )),
            None => lines.push("Chain depth: 0".to_string()),
        }
        lines.join("\n")
    }

    fn finish(
        &self,
        id: &str,
        status: DelegationStatus,
        result: Option<String>,
        error_message: Option<String>,
    ) -> Result<DelegationTask, DelegationError> {
        let mut state = self.lock();
        let Some(index) = state.active.iter().position(|task| task.id == id) else {
            return Err(DelegationError::UnknownDelegation(id.to_string()));
        };
        let mut task = state.active.remove(index);
        task.status = status;
        task.completed_at = Some(Utc::now());
        task.result = result;
        task.error_message = error_message;

        state.recent.push_front(task.clone());
        state.recent.truncate(RECENT_DELEGATION_CAPACITY);

        let mut settled = false;
        if let Some(chain) = state.chain.as_mut() {
            if let Some(entry) = chain.tasks.iter_mut().find(|entry| entry.id == id) {
                *entry = task.clone();
            }
            settled = chain.is_settled();
        }
        if settled {
            debug!(root = ?state.chain.as_ref().and_then(|chain| chain.root_id()), "delegation chain settled");
            state.chain = None;
        }

        info!(
            delegation_id = id,
            status = status.label(),
            target = task.target_agent.as_str(),
            duration_ms = task.duration_ms().unwrap_or(0),
            "delegation finished"
        );
        Ok(task)
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn start_locked(state: &mut ManagerState, mut task: DelegationTask) -> DelegationTask {
    let parent = state
        .active
        .iter()
        .filter(|candidate| {
            candidate.status == DelegationStatus::Running
                && candidate.target_agent == task.origin_agent
        })
        .max_by_key(|candidate| candidate.chain_depth)
        .map(|parent| (parent.id.clone(), parent.chain_depth));
    match parent {
        Some((parent_id, parent_depth)) => {
            task.parent_delegation_id = Some(parent_id);
            task.chain_depth = parent_depth + 1;
        }
        None => {
            task.parent_delegation_id = None;
            task.chain_depth = 1;
        }
    }
    task.status = DelegationStatus::Running;
    task.started_at = Utc::now();

    state.active.push(task.clone());
    state
        .chain
        .get_or_insert_with(DelegationChain::default)
        .tasks
        .push(task.clone());
    info!(
        delegation_id = task.id.as_str(),
        origin = task.origin_agent.as_str(),
        target = task.target_agent.as_str(),
        chain_depth = task.chain_depth,
        "delegation started"
    );
    task
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_history_is_capped_and_newest_first() {
        let manager = DelegationManager::new();
        let mut last_id = String::new();
        for index in 0..(RECENT_DELEGATION_CAPACITY + 5) {
            let task = manager.start_delegation(DelegationTask::new(
                "A",
                "B",
                format!("task {index}"),
                None,
            ));
            manager
                .complete_delegation(&task.id, "done")
                .expect("complete");
            last_id = task.id;
        }

        let recent = manager.recent();
        assert_eq!(recent.len(), RECENT_DELEGATION_CAPACITY);
        assert_eq!(recent[0].id, last_id);
        assert!(manager.active().is_empty());
        assert!(manager.chain().is_none());
    }

    #[test]
    fn nested_task_gets_parent_and_next_depth() {
        let manager = DelegationManager::new();
        let root = manager.start_delegation(DelegationTask::new("A", "B", "plan", None));
        let child = manager.start_delegation(DelegationTask::new("B", "C", "research", None));

        assert_eq!(root.chain_depth, 1);
        assert_eq!(child.chain_depth, 2);
        assert_eq!(child.parent_delegation_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(manager.current_depth(), 2);
        assert_eq!(manager.current_delegate().as_deref(), Some("C"));

        manager.complete_delegation(&child.id, "found").expect("child");
        assert!(manager.chain().is_some(), "root still running");
        manager.fail_delegation(&root.id, "gave up").expect("root");
        assert!(manager.chain().is_none());
    }

    #[test]
    fn finishing_unknown_id_is_an_error() {
        let manager = DelegationManager::new();
        let error = manager
            .cancel_delegation("delegation-missing")
            .expect_err("unknown id");
        assert_eq!(
            error,
            DelegationError::UnknownDelegation("delegation-missing".to_string())
        );
    }

    #[test]
    fn admission_rejects_depth_before_cycle() {
        let manager = DelegationManager::new();
        manager
            .admit_and_start(DelegationTask::new("A", "B", "x", None), 1)
            .expect("first delegation");

        let error = manager
            .admit_and_start(DelegationTask::new("B", "A", "y", None), 1)
            .expect_err("depth limit");
        assert!(matches!(error, DelegationError::MaxDepthExceeded { current: 1, max: 1 }));
    }

    #[test]
    fn cancel_all_clears_the_chain() {
        let manager = DelegationManager::new();
        manager.start_delegation(DelegationTask::new("A", "B", "x", None));
        manager.start_delegation(DelegationTask::new("B", "C", "y", None));

        assert_eq!(manager.cancel_all(), 2);
        assert!(manager.chain().is_none());
        assert!(manager
            .recent()
            .iter()
            .all(|task| task.status == DelegationStatus::Cancelled));
    }

    #[test]
    fn summary_lists_active_and_chain_path() {
        let manager = DelegationManager::new();
        let task = manager.start_delegation(DelegationTask::new("A", "B", "book a table", None));

        let summary = manager.status_summary(None);
        assert!(summary.contains("Active delegations (1):"));
        assert!(summary.contains("book a table"));
        assert!(summary.contains("Chain depth: 1 (A -> B)"));

        let single = manager.status_summary(Some(&task.id));
        assert!(single.contains("running"));
        assert!(manager
            .status_summary(Some("nope"))
            .contains("Unknown delegation id"));
    }
}
