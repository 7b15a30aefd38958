//! Dependency-ordered, phase-parallel execution of a registered set of
//! [`crate::base_agent::BaseAgent`]s against one [`RunContext`].
//!
//! Phases are computed with standard Kahn's-algorithm layering over a
//! string-keyed agent dependency graph: every agent with no unsatisfied
//! dependency runs in the same phase, concurrently; each phase waits for
//! the previous one (an agent's output may inform the next phase's agents
//! via the blackboard).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{info, instrument, warn};

use crate::base_agent::BaseAgent;
use crate::domain::models::message::MessagePriority;
use crate::domain::models::swarm_event::{AgentResult, AgentRunStatus, OrchestrationResult};
use crate::domain::swarm_errors::OrchestratorError;
use crate::run_context::RunContext;

/// Registers agents and drives them through dependency-ordered phases.
#[derive(Default)]
pub struct Orchestrator {
    agents: Vec<Arc<dyn BaseAgent>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    pub fn register(&mut self, agent: Arc<dyn BaseAgent>) {
        self.agents.push(agent);
    }

    /// Kahn's-algorithm layering over the agent dependency graph: each
    /// returned layer is safe to run fully in parallel because every agent
    /// in it has had all its dependencies satisfied by an earlier layer.
    fn build_phases(&self) -> Result<Vec<Vec<Arc<dyn BaseAgent>>>, OrchestratorError> {
        let by_id: HashMap<String, Arc<dyn BaseAgent>> =
            self.agents.iter().map(|a| (a.id().to_string(), a.clone())).collect();

        for agent in &self.agents {
            for dep in agent.dependencies() {
                if !by_id.contains_key(&dep) {
                    return Err(OrchestratorError::UnknownDependency(agent.id().to_string(), dep));
                }
            }
        }

        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for agent in &self.agents {
            let deps = agent.dependencies();
            in_degree.insert(agent.id().to_string(), deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(agent.id().to_string());
            }
        }

        let mut queue: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut remaining = in_degree.clone();
        let mut phases = Vec::new();
        let mut visited = HashSet::new();

        while !queue.is_empty() {
            let mut layer_ids: Vec<String> = queue.drain(..).collect();
            layer_ids.sort();
            let mut next_queue = Vec::new();
            for id in &layer_ids {
                visited.insert(id.clone());
                if let Some(next) = dependents.get(id) {
                    for candidate in next {
                        let degree = remaining.get_mut(candidate).expect("registered agent");
                        *degree -= 1;
                        if *degree == 0 {
                            next_queue.push(candidate.clone());
                        }
                    }
                }
            }
            phases.push(layer_ids.iter().map(|id| by_id[id].clone()).collect());
            queue.extend(next_queue);
        }

        if visited.len() != self.agents.len() {
            let unresolved: Vec<String> = self
                .agents
                .iter()
                .map(|a| a.id().to_string())
                .filter(|id| !visited.contains(id))
                .collect();
            return Err(OrchestratorError::DependencyCycle(unresolved));
        }

        Ok(phases)
    }

    /// Runs every registered agent through its dependency-ordered phase,
    /// wrapping each agent in a per-agent timeout (`agent_timeouts` overrides
    /// the run's blanket default by agent id), and aggregates the results.
    /// Checked for cancellation before each phase; any agent not yet run
    /// when cancellation is observed is recorded with a `Cancelled` result
    /// rather than silently dropped.
    #[instrument(skip(self, run_context, agent_timeouts))]
    pub async fn run(
        &self,
        run_context: Arc<RunContext>,
        agent_timeouts: &HashMap<String, f64>,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let phases = self.build_phases()?;
        run_context.start().await;
        let started = std::time::Instant::now();
        let total_timeout = run_context.limits.total_timeout();

        match tokio::time::timeout(total_timeout, self.run_phases(&run_context, phases, agent_timeouts)).await {
            Ok((agent_results, errors)) => {
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                let success = errors.is_empty();
                run_context.complete(success, if success { None } else { Some(errors.join("; ")) }).await;
                Ok(build_result(&run_context, agent_results, errors, duration_ms, success).await)
            }
            Err(_) => {
                warn!(?total_timeout, "run exceeded total timeout");
                let message = format!("run exceeded total timeout of {}s", total_timeout.as_secs_f64());
                run_context.timeout(message.clone()).await;
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                let agent_results: HashMap<String, AgentResult> = self
                    .agents
                    .iter()
                    .map(|a| (a.id().to_string(), cancelled_result(a.as_ref(), &message)))
                    .collect();
                Ok(build_result(&run_context, agent_results, vec![message], duration_ms, false).await)
            }
        }
    }

    /// Runs every phase to completion (or until cooperative cancellation is
    /// observed), without itself enforcing the total run timeout — that is
    /// the caller's job, via the `tokio::time::timeout` wrapping this call.
    async fn run_phases(
        &self,
        run_context: &Arc<RunContext>,
        phases: Vec<Vec<Arc<dyn BaseAgent>>>,
        agent_timeouts: &HashMap<String, f64>,
    ) -> (HashMap<String, AgentResult>, Vec<String>) {
        let mut agent_results: HashMap<String, AgentResult> = HashMap::new();
        let mut errors: Vec<String> = Vec::new();

        'phases: for phase in phases {
            if run_context.is_cancelled() {
                for agent in &phase {
                    agent_results.insert(agent.id().to_string(), cancelled_result(agent.as_ref(), "Run cancelled"));
                }
                let reason = run_context.cancel_reason().unwrap_or_else(|| "user".to_string());
                errors.push(format!("Run cancelled by {reason}"));
                continue 'phases;
            }

            let mut handles = Vec::with_capacity(phase.len());
            for agent in phase {
                let rc = run_context.clone();
                let timeout = run_context
                    .limits
                    .agent_timeout(agent_timeouts.get(agent.id()).copied());
                let agent_id = agent.id().to_string();
                handles.push(tokio::spawn(async move {
                    run_one(agent, rc, timeout, agent_id).await
                }));
            }

            for handle in handles {
                let (agent_id, result) = match handle.await {
                    Ok(pair) => pair,
                    Err(join_err) => {
                        let id = "unknown".to_string();
                        (id.clone(), AgentResult::error(&id, &id, format!("agent task panicked: {join_err}"), 0))
                    }
                };
                if let Some(err) = &result.error {
                    errors.push(format!("{agent_id}: {err}"));
                }
                agent_results.insert(agent_id, result);
            }
        }

        (agent_results, errors)
    }
}

async fn run_one(
    agent: Arc<dyn BaseAgent>,
    run_context: Arc<RunContext>,
    timeout: StdDuration,
    agent_id: String,
) -> (String, AgentResult) {
    match tokio::time::timeout(timeout, agent.run(run_context)).await {
        Ok(result) => (agent_id, result),
        Err(_) => {
            warn!(agent = %agent_id, ?timeout, "agent timed out");
            let execution_time_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            (
                agent_id.clone(),
                AgentResult::error(
                    &agent_id,
                    &agent_id,
                    format!("Agent timeout after {}s", timeout.as_secs_f64()),
                    execution_time_ms,
                ),
            )
        }
    }
}

fn cancelled_result(agent: &dyn BaseAgent, error: &str) -> AgentResult {
    let mut result = AgentResult::error(agent.id(), agent.name(), error, 0);
    result.status = AgentRunStatus::Error;
    result
}

async fn build_result(
    run_context: &RunContext,
    agent_results: HashMap<String, AgentResult>,
    errors: Vec<String>,
    duration_ms: u64,
    success: bool,
) -> OrchestrationResult {
    let mut critical_insights = Vec::new();
    let mut high_insights = Vec::new();
    for result in agent_results.values() {
        for insight in &result.insights {
            match insight.priority {
                MessagePriority::Critical => critical_insights.push(insight.clone()),
                MessagePriority::High => high_insights.push(insight.clone()),
                _ => {}
            }
        }
    }
    let bus_stats = run_context.bus.get_stats().await;
    let blackboard_stats = run_context.blackboard.get_stats().await;

    info!(
        agents = agent_results.len(),
        errors = errors.len(),
        duration_ms,
        "orchestration run complete"
    );

    let run_id = run_context.id.to_string();
    let (url, competitor_count, overall_score, composite_scores, action_plan) = scavenge_report_fields(&agent_results);

    OrchestrationResult {
        success,
        run_id: Some(run_id.clone()),
        duration_seconds: duration_ms as f64 / 1000.0,
        url,
        competitor_count,
        overall_score,
        composite_scores,
        agent_results,
        critical_insights,
        high_insights,
        action_plan,
        errors,
        swarm_summary: crate::domain::models::swarm_event::SwarmSummary {
            total_messages: bus_stats.total_sent,
            blackboard_entries: blackboard_stats.publishes,
            run_id: Some(run_id),
        },
    }
}

/// Pulls the handful of report-shaped fields out of known agent results
/// (`strategist`/`planner`, by convention) without depending on their
/// business logic, which is out of scope here. Absent keys simply leave the
/// corresponding `OrchestrationResult` field `None`/empty.
fn scavenge_report_fields(
    agent_results: &HashMap<String, AgentResult>,
) -> (Option<String>, Option<u32>, Option<u8>, HashMap<String, i64>, Option<serde_json::Value>) {
    let mut url = None;
    let mut competitor_count = None;
    let mut overall_score = None;
    let mut composite_scores = HashMap::new();
    let mut action_plan = None;

    for result in agent_results.values() {
        let data = &result.data;
        url = url.or_else(|| data.get("url").and_then(|v| v.as_str()).map(str::to_string));
        competitor_count = competitor_count.or_else(|| {
            data.get("competitor_count")
                .and_then(serde_json::Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
        });
        overall_score = overall_score.or_else(|| {
            data.get("overall_score")
                .and_then(serde_json::Value::as_u64)
                .and_then(|n| u8::try_from(n).ok())
        });
        if let Some(scores) = data.get("composite_scores").and_then(serde_json::Value::as_object) {
            for (k, v) in scores {
                if let Some(n) = v.as_i64() {
                    composite_scores.insert(k.clone(), n);
                }
            }
        }
        action_plan = action_plan.or_else(|| data.get("action_plan").cloned());
    }

    (url, competitor_count, overall_score, composite_scores, action_plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_agent::{AgentContext, ExecutionOutcome};
    use async_trait::async_trait;

    struct StepAgent {
        id: &'static str,
        deps: Vec<String>,
    }

    #[async_trait]
    impl BaseAgent for StepAgent {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
        async fn execute(&self, _ctx: &AgentContext) -> Result<ExecutionOutcome, String> {
            Ok(ExecutionOutcome {
                data: serde_json::json!({"agent": self.id}),
            })
        }
    }

    #[tokio::test]
    async fn independent_agents_all_complete() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register(Arc::new(StepAgent { id: "scout", deps: vec![] }));
        orchestrator.register(Arc::new(StepAgent { id: "analyst", deps: vec![] }));

        let run_context = RunContext::create(None, None, false).await;
        let result = orchestrator.run(run_context, &HashMap::new()).await.unwrap();

        assert_eq!(result.agent_results.len(), 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn dependent_agent_runs_after_its_dependency() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register(Arc::new(StepAgent { id: "scout", deps: vec![] }));
        orchestrator.register(Arc::new(StepAgent {
            id: "strategist",
            deps: vec!["scout".to_string()],
        }));

        let run_context = RunContext::create(None, None, false).await;
        let result = orchestrator.run(run_context, &HashMap::new()).await.unwrap();
        assert_eq!(result.agent_results.len(), 2);
        assert_eq!(result.agent_results["strategist"].status, AgentRunStatus::Complete);
    }

    #[tokio::test]
    async fn unknown_dependency_is_rejected_before_running() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register(Arc::new(StepAgent {
            id: "strategist",
            deps: vec!["ghost".to_string()],
        }));
        let run_context = RunContext::create(None, None, false).await;
        let err = orchestrator.run(run_context, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownDependency(_, _)));
    }

    #[tokio::test]
    async fn cyclic_dependency_is_detected() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register(Arc::new(StepAgent {
            id: "a",
            deps: vec!["b".to_string()],
        }));
        orchestrator.register(Arc::new(StepAgent {
            id: "b",
            deps: vec!["a".to_string()],
        }));
        let run_context = RunContext::create(None, None, false).await;
        let err = orchestrator.run(run_context, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DependencyCycle(_)));
    }

    #[tokio::test]
    async fn pre_cancelled_run_marks_all_agents_cancelled() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register(Arc::new(StepAgent { id: "scout", deps: vec![] }));
        let run_context = RunContext::create(None, None, false).await;
        run_context.cancel("test").await;
        let result = orchestrator.run(run_context, &HashMap::new()).await.unwrap();
        assert_eq!(result.agent_results["scout"].status, AgentRunStatus::Error);
        assert_eq!(result.agent_results["scout"].error.as_deref(), Some("Run cancelled"));
        assert!(!result.success);
        assert!(result.errors.iter().any(|e| e.contains("Run cancelled by")));
    }

    struct SlowAgent {
        id: &'static str,
        sleep: StdDuration,
    }

    #[async_trait]
    impl BaseAgent for SlowAgent {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        async fn execute(&self, _ctx: &AgentContext) -> Result<ExecutionOutcome, String> {
            tokio::time::sleep(self.sleep).await;
            Ok(ExecutionOutcome {
                data: serde_json::Value::Null,
            })
        }
    }

    #[tokio::test]
    async fn agent_exceeding_its_timeout_reports_the_exact_spec_message() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register(Arc::new(SlowAgent {
            id: "slow",
            sleep: StdDuration::from_millis(200),
        }));
        let run_context = RunContext::create(None, None, false).await;
        let mut agent_timeouts = HashMap::new();
        agent_timeouts.insert("slow".to_string(), 0.05);

        let result = orchestrator.run(run_context, &agent_timeouts).await.unwrap();
        assert_eq!(result.agent_results["slow"].status, AgentRunStatus::Error);
        assert_eq!(result.agent_results["slow"].error.as_deref(), Some("Agent timeout after 0.05s"));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn exceeding_total_run_timeout_terminates_the_run_with_timeout_status() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.register(Arc::new(SlowAgent {
            id: "slow",
            sleep: StdDuration::from_millis(200),
        }));
        let mut limits = crate::domain::models::run_limits::RunLimits::default();
        limits.total_timeout_secs = 0.05;
        limits.agent_timeout_secs = 10.0;
        let run_context = RunContext::create(None, Some(limits), false).await;

        let result = orchestrator.run(run_context.clone(), &HashMap::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(run_context.status().await, crate::domain::models::run_limits::RunStatus::Timeout);
    }
}
