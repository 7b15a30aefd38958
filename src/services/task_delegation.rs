//! Dynamic task creation, capability-scored auto-assignment, retry, and
//! wait-for-result, built the same lock-guarded-`HashMap` way as
//! [`super::message_bus`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::Value as JsonValue;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::models::dynamic_task::{
    AgentCapability, DynamicTask, DynamicTaskPriority, DynamicTaskStatus,
};
use crate::domain::swarm_errors::TaskDelegationError;

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskDelegationStats {
    pub created: u64,
    pub assigned: u64,
    pub completed: u64,
    pub failed: u64,
}

struct RegisteredAgent {
    capability: RwLock<AgentCapability>,
}

/// Per-task state, plus capability-aware placement, for one run.
pub struct TaskDelegationManager {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
    tasks: RwLock<HashMap<Uuid, DynamicTask>>,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<Result<JsonValue, String>>>>,
    stats: RwLock<TaskDelegationStats>,
}

impl Default for TaskDelegationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDelegationManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            stats: RwLock::new(TaskDelegationStats::default()),
        }
    }

    pub async fn register_agent(
        &self,
        agent_id: impl Into<String>,
        task_types: impl IntoIterator<Item = String>,
        max_load: u32,
    ) {
        let agent_id = agent_id.into();
        let capability = AgentCapability::new(agent_id.clone(), task_types.into_iter().collect(), max_load);
        self.agents.write().await.insert(
            agent_id,
            RegisteredAgent {
                capability: RwLock::new(capability),
            },
        );
    }

    #[instrument(skip(self, description, params))]
    pub async fn create_task(
        &self,
        created_by: impl Into<String>,
        task_type: impl Into<String>,
        description: impl Into<String>,
        params: Option<JsonValue>,
        priority: DynamicTaskPriority,
        timeout: chrono::Duration,
    ) -> DynamicTask {
        let mut task = DynamicTask::new(
            task_type,
            description,
            created_by,
            params.unwrap_or(JsonValue::Null),
        );
        task.priority = priority;
        task.timeout = timeout;
        self.tasks.write().await.insert(task.task_id, task.clone());
        self.stats.write().await.created += 1;
        task
    }

    /// Binds `task` to `to_agent` if it is registered, under its max load,
    /// and (when it declares specific types) accepts `task.task_type`.
    pub async fn delegate_task(&self, task: &DynamicTask, to_agent: &str) -> bool {
        let agents = self.agents.read().await;
        let Some(agent) = agents.get(to_agent) else { return false };
        let mut capability = agent.capability.write().await;
        if !capability.can_accept_task(&task.task_type) {
            return false;
        }
        capability.current_load += 1;
        drop(capability);
        drop(agents);

        let mut tasks = self.tasks.write().await;
        if let Some(stored) = tasks.get_mut(&task.task_id) {
            stored.assigned_to = Some(to_agent.to_string());
            stored.status = DynamicTaskStatus::Assigned;
            stored.assigned_at = Some(chrono::Utc::now());
        }
        self.stats.write().await.assigned += 1;
        true
    }

    /// Scores every eligible candidate (30 for a type match, up to 25 for
    /// spare load, up to 25 for historical success rate) and delegates to
    /// the highest scorer, breaking ties by agent id for determinism.
    pub async fn auto_assign_task(
        &self,
        task: &DynamicTask,
        candidates: Option<&[String]>,
    ) -> Option<String> {
        let agents = self.agents.read().await;
        let pool: Vec<&String> = match candidates {
            Some(c) => c.iter().collect(),
            None => agents.keys().collect(),
        };
        let mut scored: Vec<(String, f64)> = Vec::new();
        for agent_id in pool {
            let Some(agent) = agents.get(agent_id) else { continue };
            let capability = agent.capability.read().await;
            if !capability.can_accept_task(&task.task_type) {
                continue;
            }
            scored.push((agent_id.clone(), capability.score_for_task(&task.task_type)));
        }
        drop(agents);
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let (winner, _) = scored.into_iter().next()?;
        if self.delegate_task(task, &winner).await {
            Some(winner)
        } else {
            None
        }
    }

    /// Only the current assignee may complete a task. Resolves any pending
    /// `wait_for_task` waiter with `result`.
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        result: JsonValue,
        agent_id: &str,
    ) -> Result<(), TaskDelegationError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(TaskDelegationError::TaskNotFound(task_id))?;
        if task.assigned_to.as_deref() != Some(agent_id) {
            return Err(TaskDelegationError::NotAssignee {
                task_id,
                assignee: agent_id.to_string(),
            });
        }
        task.status = DynamicTaskStatus::Completed;
        task.result = Some(result.clone());
        task.completed_at = Some(chrono::Utc::now());
        drop(tasks);

        self.release_load(agent_id).await;
        self.stats.write().await.completed += 1;
        if let Some(waiter) = self.waiters.lock().await.remove(&task_id) {
            let _ = waiter.send(Ok(result));
        }
        Ok(())
    }

    /// Decrements load. If retries remain the task reverts to `Pending` so
    /// the caller can re-delegate; otherwise it terminates as `Failed` and
    /// any waiter is rejected.
    pub async fn fail_task(
        &self,
        task_id: Uuid,
        error: impl Into<String>,
        agent_id: &str,
    ) -> Result<(), TaskDelegationError> {
        let error = error.into();
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(TaskDelegationError::TaskNotFound(task_id))?;
        self.release_load(agent_id).await;
        if task.can_retry() {
            task.retries += 1;
            task.status = DynamicTaskStatus::Pending;
            task.assigned_to = None;
            task.error = Some(error);
            drop(tasks);
            Ok(())
        } else {
            task.status = DynamicTaskStatus::Failed;
            task.error = Some(error.clone());
            drop(tasks);
            self.stats.write().await.failed += 1;
            if let Some(waiter) = self.waiters.lock().await.remove(&task_id) {
                let _ = waiter.send(Err(error));
            }
            Ok(())
        }
    }

    async fn release_load(&self, agent_id: &str) {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            let mut capability = agent.capability.write().await;
            capability.current_load = capability.current_load.saturating_sub(1);
        }
    }

    /// Awaits completion/failure of `task`, switching it to `Timeout` and
    /// returning an error if `timeout` elapses first.
    pub async fn wait_for_task(
        &self,
        task: &DynamicTask,
        timeout: Option<StdDuration>,
    ) -> Result<JsonValue, TaskDelegationError> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(task.task_id, tx);

        let outcome = match timeout {
            Some(d) => tokio::time::timeout(d, rx).await,
            None => Ok(rx.await),
        };

        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(_error))) => Err(TaskDelegationError::Exhausted(task.task_id)),
            Ok(Err(_)) => Err(TaskDelegationError::TaskNotFound(task.task_id)),
            Err(_) => {
                self.waiters.lock().await.remove(&task.task_id);
                if let Some(stored) = self.tasks.write().await.get_mut(&task.task_id) {
                    stored.status = DynamicTaskStatus::Timeout;
                }
                Err(TaskDelegationError::Timeout(task.task_id))
            }
        }
    }

    pub async fn get_stats(&self) -> TaskDelegationStats {
        *self.stats.read().await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Option<DynamicTask> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    pub async fn completed_tasks(&self) -> Vec<DynamicTask> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == DynamicTaskStatus::Completed)
            .cloned()
            .collect()
    }

    /// Tasks past their deadline while `Assigned`/`InProgress`, left for an
    /// external sweeper (e.g. the orchestrator's phase loop) to drive;
    /// `fail_task` applies the actual retry/terminal decision.
    pub async fn expired_tasks(&self) -> Vec<DynamicTask> {
        let now = chrono::Utc::now();
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_expired(now))
            .cloned()
            .collect()
    }

    pub async fn reset(&self) {
        self.agents.write().await.clear();
        self.tasks.write().await.clear();
        self.waiters.lock().await.clear();
        *self.stats.write().await = TaskDelegationStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_assign_picks_highest_scorer_deterministically() {
        let manager = TaskDelegationManager::new();
        manager.register_agent("analyst", ["score".to_string()], 5).await;
        manager.register_agent("scout", Vec::<String>::new(), 5).await;
        let task = manager
            .create_task(
                "orchestrator",
                "score",
                "desc",
                None,
                DynamicTaskPriority::Medium,
                chrono::Duration::seconds(30),
            )
            .await;
        let winner = manager.auto_assign_task(&task, None).await;
        assert_eq!(winner, Some("analyst".to_string()));
    }

    #[tokio::test]
    async fn only_assignee_can_complete() {
        let manager = TaskDelegationManager::new();
        manager.register_agent("a", Vec::<String>::new(), 2).await;
        manager.register_agent("b", Vec::<String>::new(), 2).await;
        let task = manager
            .create_task(
                "orchestrator",
                "t",
                "d",
                None,
                DynamicTaskPriority::Medium,
                chrono::Duration::seconds(30),
            )
            .await;
        manager.delegate_task(&task, "a").await;
        let err = manager
            .complete_task(task.task_id, serde_json::json!(1), "b")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskDelegationError::NotAssignee { .. }));
    }

    #[tokio::test]
    async fn failure_reverts_to_pending_while_retries_remain() {
        let manager = TaskDelegationManager::new();
        manager.register_agent("a", Vec::<String>::new(), 2).await;
        let task = manager
            .create_task(
                "orchestrator",
                "t",
                "d",
                None,
                DynamicTaskPriority::Medium,
                chrono::Duration::seconds(30),
            )
            .await;
        manager.delegate_task(&task, "a").await;
        manager.fail_task(task.task_id, "boom", "a").await.unwrap();
        let reloaded = manager.get_task(task.task_id).await.unwrap();
        assert_eq!(reloaded.status, DynamicTaskStatus::Pending);
        assert_eq!(reloaded.retries, 1);
    }

    #[tokio::test]
    async fn completed_task_appears_once_and_is_terminal() {
        let manager = TaskDelegationManager::new();
        manager.register_agent("a", Vec::<String>::new(), 2).await;
        let task = manager
            .create_task(
                "orchestrator",
                "t",
                "d",
                None,
                DynamicTaskPriority::Medium,
                chrono::Duration::seconds(30),
            )
            .await;
        manager.delegate_task(&task, "a").await;
        manager
            .complete_task(task.task_id, serde_json::json!({"ok": true}), "a")
            .await
            .unwrap();
        let completed = manager.completed_tasks().await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, DynamicTaskStatus::Completed);
    }
}
