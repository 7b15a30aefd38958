//! The contract every swarm participant implements, and the
//! [`AgentContext`] handle it uses to talk to the bus, blackboard, task
//! delegation manager, collaboration manager, and learning store owned by
//! its [`crate::run_context::RunContext`].
//!
//! Business logic for a concrete agent (what to scrape, what to recommend)
//! is out of scope here — this module is the scaffolding every agent shares:
//! registration, the five-step execution lifecycle, insight auto-broadcast,
//! and progress reporting.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::domain::models::blackboard::DataCategory;
use crate::domain::models::dynamic_task::{DynamicTask, DynamicTaskPriority};
use crate::domain::models::collaboration::CollaborationResult;
use crate::domain::models::message::{Message, MessagePriority, MessageType};
use crate::domain::models::swarm_event::{AgentInsight, AgentResult, AgentRunStatus, InsightKind, SwarmStats};
use crate::domain::swarm_errors::TaskDelegationError;
use crate::run_context::RunContext;
use crate::services::blackboard::{BlackboardHandler, PublishOptions};
use crate::services::message_bus::MessageHandler;

/// TTL applied to an auto-broadcast insight's blackboard entry, matching the
/// reference implementation's fixed one-hour relevance window.
const INSIGHT_TTL_SECS: i64 = 3600;

/// Blackboard subscription patterns every agent is given by default, so it
/// observes swarm-wide critical/alert traffic even before declaring its own
/// interests.
#[must_use]
pub fn default_blackboard_subscriptions() -> Vec<&'static str> {
    vec!["*.critical", "*.alert"]
}

/// The outcome of an agent's own business logic, handed back to the
/// lifecycle wrapper in [`BaseAgent::run`] to build the final [`AgentResult`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub data: JsonValue,
}

/// Per-run handle an agent uses to reach the swarm. Cheap to clone (an
/// `Arc<RunContext>` plus a small local accumulator), and bound to exactly
/// one run.
pub struct AgentContext {
    pub run_context: Arc<RunContext>,
    pub agent_id: String,
    stats: Mutex<SwarmStats>,
    insights: Mutex<Vec<AgentInsight>>,
}

impl AgentContext {
    #[must_use]
    pub fn new(run_context: Arc<RunContext>, agent_id: impl Into<String>) -> Self {
        Self {
            run_context,
            agent_id: agent_id.into(),
            stats: Mutex::new(SwarmStats::default()),
            insights: Mutex::new(Vec::new()),
        }
    }

    pub async fn send(&self, to: &str, kind: MessageType, subject: &str, payload: JsonValue, priority: MessagePriority) {
        let message = Message::builder(self.agent_id.clone(), kind)
            .to(to)
            .subject(subject)
            .payload(payload)
            .priority(priority)
            .build();
        if self.run_context.bus.send(message, false, None).await.is_ok() {
            self.stats.lock().await.messages_sent += 1;
        }
    }

    pub async fn broadcast(&self, kind: MessageType, subject: &str, payload: JsonValue, priority: MessagePriority) {
        if self
            .run_context
            .bus
            .broadcast(self.agent_id.clone(), kind, subject, payload, priority)
            .await
            .is_ok()
        {
            self.stats.lock().await.messages_sent += 1;
        }
    }

    pub async fn publish(&self, key: impl Into<String>, value: JsonValue, category: Option<DataCategory>) {
        self.run_context
            .blackboard
            .publish(
                key,
                value,
                self.agent_id.clone(),
                PublishOptions {
                    category,
                    ..Default::default()
                },
            )
            .await;
        self.stats.lock().await.blackboard_writes += 1;
    }

    pub async fn read(&self, key: &str) -> Option<JsonValue> {
        self.stats.lock().await.blackboard_reads += 1;
        self.run_context.blackboard.get(key, None).await
    }

    pub async fn query(&self, pattern: &str, category: Option<DataCategory>, limit: usize) -> Vec<JsonValue> {
        self.stats.lock().await.blackboard_reads += 1;
        self.run_context
            .blackboard
            .query(pattern, None, None, category, Some(limit))
            .await
            .into_iter()
            .map(|e| e.value)
            .collect()
    }

    pub async fn delegate_task(
        &self,
        task_type: impl Into<String>,
        description: impl Into<String>,
        params: Option<JsonValue>,
        priority: DynamicTaskPriority,
        timeout: chrono::Duration,
    ) -> DynamicTask {
        let task = self
            .run_context
            .task_manager
            .create_task(self.agent_id.clone(), task_type, description, params, priority, timeout)
            .await;
        self.run_context.task_manager.auto_assign_task(&task, None).await;
        self.stats.lock().await.tasks_delegated += 1;
        task
    }

    pub async fn wait_for_task(&self, task: &DynamicTask, timeout: Option<StdDuration>) -> Result<JsonValue, TaskDelegationError> {
        self.run_context.task_manager.wait_for_task(task, timeout).await
    }

    pub async fn start_collaboration(
        &self,
        problem: impl Into<String>,
        agents: &[String],
        timeout: StdDuration,
    ) -> CollaborationResult {
        self.stats.lock().await.collaborations += 1;
        self.run_context
            .collaboration
            .create_session(problem, agents, Some(self.agent_id.clone()), timeout)
            .await
            .unwrap_or_else(|err| CollaborationResult {
                session_id: uuid::Uuid::new_v4().to_string(),
                final_phase: crate::domain::models::collaboration::CollaborationPhase::Failed,
                solution: None,
                consensus: false,
                tallies: std::collections::HashMap::new(),
                perspectives: Vec::new(),
                proposals: Vec::new(),
                start_time: chrono::Utc::now(),
                end_time: chrono::Utc::now(),
                error: Some(err.to_string()),
            })
    }

    pub async fn log_prediction(
        &self,
        prediction_type: impl Into<String>,
        predicted_value: JsonValue,
        confidence: f64,
        context: Option<JsonValue>,
    ) -> String {
        self.run_context
            .learning
            .log_prediction(self.agent_id.clone(), prediction_type, predicted_value, confidence, context)
            .await
    }

    /// Records the insight locally and, for `Critical`/`High` priority,
    /// broadcasts it on the bus and files it on the blackboard under
    /// `critical.<kind>` or `insight.<kind>` with a one-hour TTL — both
    /// awaited inline so the side effect is observable before this call
    /// returns, even though nothing the caller does is conditioned on it.
    #[instrument(skip(self, message, data))]
    pub async fn emit_insight(
        &self,
        message: impl Into<String> + std::fmt::Debug,
        priority: MessagePriority,
        kind: InsightKind,
        data: Option<JsonValue>,
    ) -> AgentInsight {
        let insight = AgentInsight {
            id: uuid::Uuid::new_v4(),
            agent_id: self.agent_id.clone(),
            message: message.into(),
            priority,
            kind,
            data: data.clone(),
            created_at: chrono::Utc::now(),
            from_collaboration: false,
            contributing_agents: Vec::new(),
        };
        self.insights.lock().await.push(insight.clone());
        self.run_context.emit_insight(&self.agent_id, &insight).await;

        if matches!(priority, MessagePriority::Critical | MessagePriority::High) {
            let _ = self
                .run_context
                .bus
                .broadcast(
                    self.agent_id.clone(),
                    MessageType::Insight,
                    insight.message.clone(),
                    serde_json::to_value(&insight).unwrap_or(JsonValue::Null),
                    priority,
                )
                .await;
            let prefix = if priority == MessagePriority::Critical { "critical" } else { "insight" };
            let key = format!("{prefix}.{}", serde_json::to_value(kind).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default());
            self.run_context
                .blackboard
                .publish(
                    key,
                    data.unwrap_or(JsonValue::Null),
                    self.agent_id.clone(),
                    PublishOptions {
                        ttl: Some(chrono::Duration::seconds(INSIGHT_TTL_SECS)),
                        category: Some(kind.data_category()),
                        ..Default::default()
                    },
                )
                .await;
        }
        insight
    }

    pub async fn update_progress(&self, percent: u8, message: Option<&str>) {
        self.run_context.emit_progress(&self.agent_id, percent, message).await;
    }

    pub async fn record_received(&self) {
        self.stats.lock().await.messages_received += 1;
    }

    pub async fn record_task_received(&self) {
        self.stats.lock().await.tasks_received += 1;
    }

    pub async fn stats_snapshot(&self) -> SwarmStats {
        *self.stats.lock().await
    }

    pub async fn insights_snapshot(&self) -> Vec<AgentInsight> {
        self.insights.lock().await.clone()
    }
}

/// Bus delivery handler installed for every agent at registration time.
/// Individual messages are observed by polling
/// [`crate::services::message_bus::MessageBus::receive`]/`receive_all`
/// through the agent's own business logic; this handler only keeps the
/// context's receive counter accurate.
struct AgentMessageBridge {
    context: Arc<AgentContext>,
}

#[async_trait]
impl MessageHandler for AgentMessageBridge {
    async fn handle(&self, message: Message) -> Result<(), String> {
        self.context.record_received().await;
        if message.kind == MessageType::TaskDelegate {
            self.context.record_task_received().await;
        }
        Ok(())
    }
}

/// A no-op blackboard subscriber: the default `*.critical`/`*.alert`
/// subscriptions exist so an agent observes swarm-wide urgency even before
/// declaring its own interests, but acting on them is left to
/// [`BaseAgent::on_message`]/[`BaseAgent::execute`] via direct blackboard
/// reads.
struct NullBlackboardHandler;

#[async_trait]
impl BlackboardHandler for NullBlackboardHandler {
    async fn handle(&self, _entry: crate::domain::models::blackboard::BlackboardEntry) {}
}

/// The contract every agent in the swarm implements. Identity and
/// capability declarations are plain methods with sensible defaults;
/// `execute` is the one method a concrete agent must provide.
#[async_trait]
pub trait BaseAgent: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn role(&self) -> &str {
        self.name()
    }
    fn avatar(&self) -> &str {
        "🤖"
    }
    fn personality(&self) -> &str {
        ""
    }
    /// Agent ids this one depends on for phase ordering (spec §5's
    /// dependency graph); empty means "no ordering constraint."
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }
    fn subscriptions(&self) -> HashSet<MessageType> {
        crate::services::message_bus::default_subscriptions()
    }
    fn capabilities(&self) -> HashSet<String> {
        HashSet::new()
    }
    fn max_concurrent_tasks(&self) -> u32 {
        3
    }

    async fn pre_execute(&self, _ctx: &AgentContext) -> Result<(), String> {
        Ok(())
    }

    /// The agent's business logic. Everything else in this trait is
    /// scaffolding around this one call.
    async fn execute(&self, ctx: &AgentContext) -> Result<ExecutionOutcome, String>;

    async fn post_execute(&self, _ctx: &AgentContext, _outcome: &ExecutionOutcome) -> Result<(), String> {
        Ok(())
    }

    /// Registers this agent with the run's bus/blackboard/task manager and
    /// runs the five-step lifecycle: `AGENT_STARTED` → `pre_execute` →
    /// `execute` → `post_execute` → `AGENT_COMPLETE`, always producing an
    /// [`AgentResult`] rather than propagating a failure out of this call.
    #[instrument(skip(self, run_context), fields(agent_id = self.id()))]
    async fn run(&self, run_context: Arc<RunContext>) -> AgentResult {
        let started = std::time::Instant::now();
        let ctx = Arc::new(AgentContext::new(run_context.clone(), self.id()));

        run_context
            .bus
            .register_agent(
                self.id(),
                Arc::new(AgentMessageBridge { context: ctx.clone() }),
                Some(self.subscriptions()),
            )
            .await;
        run_context
            .task_manager
            .register_agent(self.id(), self.capabilities(), self.max_concurrent_tasks())
            .await;
        for pattern in default_blackboard_subscriptions() {
            run_context
                .blackboard
                .subscribe(pattern, self.id(), Arc::new(NullBlackboardHandler), None)
                .await;
        }

        run_context.emit_agent_start(self.id(), self.name()).await;
        ctx.update_progress(0, Some("started")).await;

        let outcome = async {
            self.pre_execute(&ctx).await?;
            let outcome = self.execute(&ctx).await?;
            self.post_execute(&ctx, &outcome).await?;
            Ok::<ExecutionOutcome, String>(outcome)
        }
        .await;

        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = match outcome {
            Ok(outcome) => {
                let _ = run_context
                    .bus
                    .broadcast(
                        self.id(),
                        MessageType::AgentComplete,
                        format!("{} finished", self.name()),
                        serde_json::Value::Null,
                        MessagePriority::Low,
                    )
                    .await;
                AgentResult {
                    agent_id: self.id().to_string(),
                    agent_name: self.name().to_string(),
                    status: AgentRunStatus::Complete,
                    execution_time_ms,
                    insights: ctx.insights_snapshot().await,
                    data: outcome.data,
                    error: None,
                    swarm_stats: ctx.stats_snapshot().await,
                }
            }
            Err(error) => {
                warn!(agent = self.id(), %error, "agent execution failed");
                let insight = ctx
                    .emit_insight(
                        format!("{} failed: {error}", self.name()),
                        MessagePriority::Critical,
                        InsightKind::Threat,
                        None,
                    )
                    .await;
                let _ = run_context
                    .bus
                    .broadcast(
                        self.id(),
                        MessageType::AgentError,
                        format!("{} errored", self.name()),
                        serde_json::json!({"error": error}),
                        MessagePriority::Critical,
                    )
                    .await;
                let mut result = AgentResult::error(self.id(), self.name(), error, execution_time_ms);
                result.insights = vec![insight];
                result.swarm_stats = ctx.stats_snapshot().await;
                result
            }
        };

        run_context.emit_agent_complete(self.id(), &result).await;
        ctx.update_progress(100, Some("complete")).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent {
        id: String,
    }

    #[async_trait]
    impl BaseAgent for EchoAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            "echo"
        }
        async fn execute(&self, ctx: &AgentContext) -> Result<ExecutionOutcome, String> {
            ctx.emit_insight("found something", MessagePriority::Medium, InsightKind::Finding, None)
                .await;
            Ok(ExecutionOutcome {
                data: serde_json::json!({"ok": true}),
            })
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl BaseAgent for FailingAgent {
        fn id(&self) -> &str {
            "failing"
        }
        fn name(&self) -> &str {
            "failing"
        }
        async fn execute(&self, _ctx: &AgentContext) -> Result<ExecutionOutcome, String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn successful_run_produces_complete_result_with_data() {
        let run_context = RunContext::create(None, None, true).await;
        let agent = Arc::new(EchoAgent { id: "scout".to_string() });
        let result = agent.run(run_context).await;
        assert_eq!(result.status, AgentRunStatus::Complete);
        assert_eq!(result.data, serde_json::json!({"ok": true}));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn failing_agent_never_panics_and_reports_error() {
        let run_context = RunContext::create(None, None, false).await;
        let agent = Arc::new(FailingAgent);
        let result = agent.run(run_context).await;
        assert_eq!(result.status, AgentRunStatus::Error);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.insights.len(), 1);
    }

    #[tokio::test]
    async fn medium_priority_insight_is_not_broadcast_to_blackboard() {
        let run_context = RunContext::create(None, None, false).await;
        let agent = Arc::new(EchoAgent { id: "scout".to_string() });
        agent.run(run_context.clone()).await;
        assert!(run_context.blackboard.get_all_keys().await.is_empty());
    }

    #[tokio::test]
    async fn task_delegate_message_is_counted_as_received() {
        let run_context = RunContext::create(None, None, false).await;
        let ctx = Arc::new(AgentContext::new(run_context.clone(), "scout"));
        run_context
            .bus
            .register_agent("scout", Arc::new(AgentMessageBridge { context: ctx.clone() }), None)
            .await;
        let message = Message::builder("analyst".to_string(), MessageType::TaskDelegate)
            .to("scout")
            .subject("new task")
            .payload(serde_json::json!({}))
            .build();
        run_context.bus.send(message, false, None).await.unwrap();
        assert_eq!(ctx.stats_snapshot().await.tasks_received, 1);
        assert_eq!(ctx.stats_snapshot().await.messages_received, 1);
    }
}
