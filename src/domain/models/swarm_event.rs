//! Lifecycle/observability types shared by [`crate::base_agent::BaseAgent`]
//! and the [`crate::orchestrator::Orchestrator`]: per-run agent status,
//! insights agents emit, and the result each agent run produces.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::blackboard::DataCategory;
use super::message::MessagePriority;

/// Status of a single agent within one orchestrated run. Distinct from the
/// persisted workflow [`super::agent::AgentStatus`] — this tracks one
/// in-memory execution, not a durable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Pending,
    Thinking,
    Running,
    Complete,
    Error,
}

/// Kind of observation an agent is reporting, independent of its urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Threat,
    Opportunity,
    Finding,
    Recommendation,
    Action,
    Collaboration,
    Consensus,
}

impl InsightKind {
    /// The blackboard category an auto-broadcast insight of this kind is
    /// filed under.
    #[must_use]
    pub const fn data_category(self) -> DataCategory {
        match self {
            Self::Threat => DataCategory::Threat,
            Self::Opportunity => DataCategory::Opportunity,
            Self::Recommendation => DataCategory::Recommendation,
            Self::Finding => DataCategory::Insight,
            Self::Action => DataCategory::Action,
            Self::Collaboration | Self::Consensus => DataCategory::Meta,
        }
    }
}

/// Something an agent noticed while executing, surfaced to callers and
/// (for `Critical`/`High` priority) auto-broadcast to the rest of the swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInsight {
    pub id: uuid::Uuid,
    pub agent_id: String,
    pub message: String,
    pub priority: MessagePriority,
    pub kind: InsightKind,
    pub data: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub from_collaboration: bool,
    pub contributing_agents: Vec<String>,
}

/// A one-off telemetry event an agent emits while running, surfaced through
/// an orchestrator-supplied callback. Not persisted; purely observational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    pub agent_id: String,
    pub event_type: String,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// Running counters an agent accumulates over one run, surfaced in its
/// final [`AgentResult`] and in `RunContext::debug_snapshot`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SwarmStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub blackboard_writes: u64,
    pub blackboard_reads: u64,
    pub collaborations: u64,
    pub tasks_delegated: u64,
    pub tasks_received: u64,
}

/// The outcome of running one agent once, always produced regardless of
/// success or failure — an agent never propagates a panic out of its `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub agent_name: String,
    pub status: AgentRunStatus,
    pub execution_time_ms: u64,
    pub insights: Vec<AgentInsight>,
    pub data: JsonValue,
    pub error: Option<String>,
    pub swarm_stats: SwarmStats,
}

impl AgentResult {
    #[must_use]
    pub fn error(agent_id: impl Into<String>, agent_name: impl Into<String>, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            status: AgentRunStatus::Error,
            execution_time_ms,
            insights: Vec::new(),
            data: JsonValue::Null,
            error: Some(error.into()),
            swarm_stats: SwarmStats::default(),
        }
    }
}

/// Message/blackboard activity totals for one run, nested under
/// `OrchestrationResult.swarm_summary`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmSummary {
    pub total_messages: u64,
    pub blackboard_entries: u64,
    pub run_id: Option<String>,
}

/// Final output of one orchestrated run: every agent's result, the insights
/// bucketed by severity, and whatever composite scoring the strategist and
/// planner agents' own outputs happen to carry — those agents' business
/// logic is out of scope here, so the scoring fields are populated
/// opportunistically by [`crate::orchestrator::Orchestrator::build_result`]
/// scraping known keys out of their `AgentResult.data`, and are `None` when
/// absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub run_id: Option<String>,
    pub duration_seconds: f64,
    pub url: Option<String>,
    pub competitor_count: Option<u32>,
    pub overall_score: Option<u8>,
    pub composite_scores: HashMap<String, i64>,
    pub agent_results: HashMap<String, AgentResult>,
    pub critical_insights: Vec<AgentInsight>,
    pub high_insights: Vec<AgentInsight>,
    pub action_plan: Option<JsonValue>,
    pub errors: Vec<String>,
    pub swarm_summary: SwarmSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_insight_maps_to_threat_category() {
        assert_eq!(InsightKind::Threat.data_category(), DataCategory::Threat);
    }

    #[test]
    fn finding_insight_maps_to_insight_category() {
        assert_eq!(InsightKind::Finding.data_category(), DataCategory::Insight);
    }
}
