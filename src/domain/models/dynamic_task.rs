//! Task-delegation data model: tasks agents hand each other at runtime,
//! distinct from the persisted [`super::task::Task`] workflow queue.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicTaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicTaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for DynamicTaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A unit of work one agent delegates to another through the
/// [`crate::services::task_delegation::TaskDelegationManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicTask {
    pub task_id: Uuid,
    pub task_type: String,
    pub description: String,
    pub parameters: JsonValue,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub status: DynamicTaskStatus,
    pub priority: DynamicTaskPriority,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout: Duration,
    pub retries: u32,
    pub max_retries: u32,
    pub tags: HashSet<String>,
}

impl DynamicTask {
    #[must_use]
    pub fn new(task_type: impl Into<String>, description: impl Into<String>, created_by: impl Into<String>, parameters: JsonValue) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type: task_type.into(),
            description: description.into(),
            parameters,
            created_by: created_by.into(),
            assigned_to: None,
            status: DynamicTaskStatus::Pending,
            priority: DynamicTaskPriority::default(),
            result: None,
            error: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            timeout: Duration::seconds(30),
            retries: 0,
            max_retries: 2,
            tags: HashSet::new(),
        }
    }

    /// `true` when the task is in-flight and has been running longer than
    /// `timeout` since it started.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            DynamicTaskStatus::Assigned | DynamicTaskStatus::InProgress
        ) && self
            .started_at
            .is_some_and(|started| now - started > self.timeout)
    }

    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}

/// What one agent advertises to the delegation manager about the work it can
/// accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapability {
    pub agent_id: String,
    pub task_types: HashSet<String>,
    pub current_load: u32,
    pub max_load: u32,
    pub success_rate: f64,
}

impl AgentCapability {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, task_types: HashSet<String>, max_load: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_types,
            current_load: 0,
            max_load,
            success_rate: 1.0,
        }
    }

    /// `task_types` empty means "accepts any type."
    #[must_use]
    pub fn can_accept_task(&self, task_type: &str) -> bool {
        self.current_load < self.max_load
            && (self.task_types.is_empty() || self.task_types.contains(task_type))
    }

    /// `30` points for a type match, up to `25` for spare load capacity, up
    /// to `25` for historical success rate. Matches the weighting used in
    /// the reference implementation's auto-assignment scorer.
    #[must_use]
    pub fn score_for_task(&self, task_type: &str) -> f64 {
        let mut score = 0.0;
        if self.task_types.contains(task_type) {
            score += 30.0;
        }
        let max_load = f64::from(self.max_load.max(1));
        score += 25.0 * (1.0 - f64::from(self.current_load) / max_load);
        score += 25.0 * self.success_rate;
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_rejects_full_load() {
        let mut cap = AgentCapability::new("scout", HashSet::new(), 1);
        cap.current_load = 1;
        assert!(!cap.can_accept_task("scrape"));
    }

    #[test]
    fn capability_accepts_any_type_when_unset() {
        let cap = AgentCapability::new("scout", HashSet::new(), 3);
        assert!(cap.can_accept_task("anything"));
    }

    #[test]
    fn score_rewards_type_match_load_and_success_rate() {
        let mut typed = AgentCapability::new("scout", HashSet::from(["scrape".to_string()]), 5);
        typed.success_rate = 1.0;
        let mut untyped = AgentCapability::new("analyst", HashSet::new(), 5);
        untyped.success_rate = 1.0;
        assert!(typed.score_for_task("scrape") > untyped.score_for_task("scrape"));
    }

    #[test]
    fn retry_respects_max_retries() {
        let mut task = DynamicTask::new("scrape", "desc", "scout", JsonValue::Null);
        task.retries = 2;
        task.max_retries = 2;
        assert!(!task.can_retry());
    }
}
