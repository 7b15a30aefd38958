//! Phase-driven consensus sessions built on top of
//! [`super::message_bus::MessageBus`] and [`super::blackboard::Blackboard`].
//!
//! The reference implementation drives each phase with a fixed
//! sleep-then-scan of the blackboard; per spec §9 this is replaced with a
//! bounded wait that polls the namespaced keys at a short interval, which is
//! observably identical but doesn't block on a worst-case sleep when replies
//! arrive early.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::models::collaboration::{
    has_consensus, tally_choices, CollaborationPhase, CollaborationResult, Vote, VoteTally,
};
use crate::domain::models::message::{MessagePriority, MessageType};
use crate::domain::swarm_errors::CollaborationError;
use crate::services::blackboard::{Blackboard, PublishOptions};
use crate::services::message_bus::MessageBus;

/// Fallback per-phase bound when a caller doesn't override it, carried over
/// from the reference implementation's fixed sleep durations (2.0s
/// gathering/brainstorming/debating, 1.5s voting).
#[derive(Debug, Clone, Copy)]
pub struct CollaborationTimeouts {
    pub gathering: StdDuration,
    pub brainstorming: StdDuration,
    pub debating: StdDuration,
    pub voting: StdDuration,
}

impl Default for CollaborationTimeouts {
    fn default() -> Self {
        Self {
            gathering: StdDuration::from_millis(2000),
            brainstorming: StdDuration::from_millis(2000),
            debating: StdDuration::from_millis(2000),
            voting: StdDuration::from_millis(1500),
        }
    }
}

const POLL_INTERVAL: StdDuration = StdDuration::from_millis(20);

/// Drives a bounded multi-agent decision session to either a consensus
/// value or explicit failure.
pub struct CollaborationManager {
    bus: Arc<MessageBus>,
    blackboard: Arc<Blackboard>,
    timeouts: CollaborationTimeouts,
    completed: RwLock<Vec<CollaborationResult>>,
    active: RwLock<HashMap<String, CollaborationPhase>>,
}

impl CollaborationManager {
    #[must_use]
    pub fn new(bus: Arc<MessageBus>, blackboard: Arc<Blackboard>, timeouts: CollaborationTimeouts) -> Self {
        Self {
            bus,
            blackboard,
            timeouts,
            completed: RwLock::new(Vec::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    async fn mark_phase(&self, session_id: &str, phase: CollaborationPhase) {
        self.active.write().await.insert(session_id.to_string(), phase);
    }

    fn namespace(session_id: &str) -> String {
        format!("collab.{session_id}")
    }

    /// Waits up to `bound` for at least one blackboard entry to appear
    /// under `pattern`, polling at [`POLL_INTERVAL`], then returns whatever
    /// matched (possibly empty if the bound elapsed with no replies).
    async fn collect(&self, pattern: &str, bound: StdDuration) -> Vec<(String, JsonValue)> {
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            let entries = self.blackboard.query(pattern, None, None, None, None).await;
            if !entries.is_empty() || tokio::time::Instant::now() >= deadline {
                return entries.into_iter().map(|e| (e.agent_id, e.value)).collect();
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Runs GATHERING → BRAINSTORMING → (DEBATING)? → VOTING → CONSENSUS for
    /// `problem` across `agents`, publishing the result to
    /// `collab.<id>.result` regardless of outcome.
    #[instrument(skip(self, problem, agents))]
    pub async fn create_session(
        &self,
        problem: impl Into<String>,
        agents: &[String],
        facilitator: Option<String>,
        timeout: StdDuration,
    ) -> Result<CollaborationResult, CollaborationError> {
        let problem = problem.into();
        let session_id = Uuid::new_v4().to_string();
        let ns = Self::namespace(&session_id);
        let start_time = chrono::Utc::now();
        let facilitator = facilitator.unwrap_or_else(|| "orchestrator".to_string());
        self.mark_phase(&session_id, CollaborationPhase::Initiated).await;

        if agents.is_empty() {
            let result = CollaborationResult {
                session_id: session_id.clone(),
                final_phase: CollaborationPhase::Failed,
                solution: None,
                consensus: false,
                tallies: HashMap::new(),
                perspectives: Vec::new(),
                proposals: Vec::new(),
                start_time,
                end_time: chrono::Utc::now(),
                error: Some("no participants".to_string()),
            };
            self.active.write().await.remove(&session_id);
            self.completed.write().await.push(result.clone());
            return Ok(result);
        }

        let run = tokio::time::timeout(timeout, async {
            self.run_phases(&session_id, &ns, &problem, agents, &facilitator).await
        })
        .await;
        self.active.write().await.remove(&session_id);

        let result = match run {
            Ok(result) => result,
            Err(_) => CollaborationResult {
                session_id: session_id.clone(),
                final_phase: CollaborationPhase::Failed,
                solution: None,
                consensus: false,
                tallies: HashMap::new(),
                perspectives: Vec::new(),
                proposals: Vec::new(),
                start_time,
                end_time: chrono::Utc::now(),
                error: Some(format!("session timed out after {timeout:?}")),
            },
        };

        self.blackboard
            .publish(
                format!("{ns}.result"),
                serde_json::to_value(&result).unwrap_or(JsonValue::Null),
                &facilitator,
                PublishOptions {
                    category: Some(crate::domain::models::blackboard::DataCategory::Meta),
                    ..Default::default()
                },
            )
            .await;
        self.completed.write().await.push(result.clone());
        Ok(result)
    }

    async fn run_phases(
        &self,
        session_id: &str,
        ns: &str,
        problem: &str,
        agents: &[String],
        facilitator: &str,
    ) -> CollaborationResult {
        let start_time = chrono::Utc::now();
        let session_id = session_id.to_string();

        // GATHERING
        self.mark_phase(&session_id, CollaborationPhase::Gathering).await;
        self.blackboard
            .publish(
                format!("{ns}.problem"),
                serde_json::json!(problem),
                facilitator,
                PublishOptions::default(),
            )
            .await;
        for agent in agents {
            let _ = self
                .bus
                .request_response(
                    facilitator,
                    agent,
                    MessageType::Request,
                    "provide_perspective",
                    serde_json::json!({"action": "provide_perspective", "problem": problem}),
                    self.timeouts.gathering,
                )
                .await;
        }
        let perspectives = self.collect(&format!("{ns}.perspective.*"), self.timeouts.gathering).await;

        // BRAINSTORMING
        self.mark_phase(&session_id, CollaborationPhase::Brainstorming).await;
        for agent in agents {
            let _ = self
                .bus
                .request_response(
                    facilitator,
                    agent,
                    MessageType::Request,
                    "propose_solution",
                    serde_json::json!({"action": "propose_solution", "perspectives": perspectives}),
                    self.timeouts.brainstorming,
                )
                .await;
        }
        let proposals = self
            .collect(&format!("{ns}.proposal.*"), self.timeouts.brainstorming)
            .await;
        let proposal_list: Vec<(String, String)> = proposals
            .iter()
            .map(|(agent, value)| (agent.clone(), value.as_str().unwrap_or_default().to_string()))
            .collect();

        // DEBATING — skipped when at most one distinct solution was proposed.
        if proposal_list.len() > 1 {
            self.mark_phase(&session_id, CollaborationPhase::Debating).await;
            self.blackboard
                .publish(
                    format!("{ns}.proposals"),
                    serde_json::json!(proposal_list),
                    facilitator,
                    PublishOptions::default(),
                )
                .await;
            for agent in agents {
                let _ = self
                    .bus
                    .request_response(
                        facilitator,
                        agent,
                        MessageType::Request,
                        "evaluate_proposals",
                        serde_json::json!({"action": "evaluate", "proposals": proposal_list}),
                        self.timeouts.debating,
                    )
                    .await;
            }
            let _ = self.collect(&format!("{ns}.evaluation.*"), self.timeouts.debating).await;
        }

        // VOTING
        self.mark_phase(&session_id, CollaborationPhase::Voting).await;
        for agent in agents {
            let _ = self
                .bus
                .request_response(
                    facilitator,
                    agent,
                    MessageType::Vote,
                    "vote",
                    serde_json::json!({"action": "vote", "choices": proposal_list}),
                    self.timeouts.voting,
                )
                .await;
        }
        let vote_entries = self.collect(&format!("{ns}.vote.*"), self.timeouts.voting).await;
        let votes: Vec<Vote> = vote_entries
            .iter()
            .filter_map(|(agent, value)| {
                Some(Vote {
                    agent_id: agent.clone(),
                    choice: value.get("choice")?.as_str()?.to_string(),
                    confidence: value.get("confidence").and_then(JsonValue::as_f64).unwrap_or(1.0),
                    reasoning: value
                        .get("reasoning")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                })
            })
            .collect();

        // CONSENSUS
        self.mark_phase(&session_id, CollaborationPhase::Consensus).await;
        let ranked = tally_choices(&votes, votes.len());
        let tallies: HashMap<String, VoteTally> = ranked.iter().map(|t| (t.choice.clone(), t.clone())).collect();
        let (solution, consensus) = match ranked.first() {
            Some(winner) => (Some(winner.choice.clone()), has_consensus(winner)),
            None => (None, false),
        };

        CollaborationResult {
            session_id,
            final_phase: if consensus {
                CollaborationPhase::Complete
            } else {
                CollaborationPhase::Failed
            },
            solution,
            consensus,
            tallies,
            perspectives,
            proposals: proposal_list,
            start_time,
            end_time: chrono::Utc::now(),
            error: None,
        }
    }

    pub async fn get_completed_sessions(&self, limit: usize) -> Vec<CollaborationResult> {
        let completed = self.completed.read().await;
        completed.iter().rev().take(limit).cloned().collect()
    }

    /// Looks up one session by id, whether it is still running (in which
    /// case the result reflects its current phase with no solution yet) or
    /// has already completed.
    pub async fn get_session(&self, session_id: &str) -> Option<CollaborationResult> {
        if let Some(result) = self.completed.read().await.iter().rev().find(|r| r.session_id == session_id) {
            return Some(result.clone());
        }
        let phase = *self.active.read().await.get(session_id)?;
        Some(CollaborationResult {
            session_id: session_id.to_string(),
            final_phase: phase,
            solution: None,
            consensus: false,
            tallies: HashMap::new(),
            perspectives: Vec::new(),
            proposals: Vec::new(),
            start_time: chrono::Utc::now(),
            end_time: chrono::Utc::now(),
            error: None,
        })
    }

    /// Ids and current phase of every session that has not yet reached a
    /// terminal outcome.
    pub async fn get_active_sessions(&self) -> Vec<(String, CollaborationPhase)> {
        self.active
            .read()
            .await
            .iter()
            .map(|(id, phase)| (id.clone(), *phase))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_participants_fails_without_consensus() {
        let manager = CollaborationManager::new(
            Arc::new(MessageBus::default()),
            Arc::new(Blackboard::new()),
            CollaborationTimeouts::default(),
        );
        let result = manager
            .create_session("what do we do", &[], None, StdDuration::from_secs(1))
            .await
            .unwrap();
        assert!(!result.consensus);
        assert_eq!(result.final_phase, CollaborationPhase::Failed);
    }

    #[tokio::test]
    async fn completed_session_is_retrievable_and_no_longer_active() {
        let manager = CollaborationManager::new(
            Arc::new(MessageBus::default()),
            Arc::new(Blackboard::new()),
            CollaborationTimeouts::default(),
        );
        let result = manager
            .create_session("what do we do", &[], None, StdDuration::from_secs(1))
            .await
            .unwrap();
        let fetched = manager.get_session(&result.session_id).await.unwrap();
        assert_eq!(fetched.session_id, result.session_id);
        assert!(manager.get_active_sessions().await.is_empty());
        assert!(manager.get_session("nonexistent").await.is_none());
    }
}
