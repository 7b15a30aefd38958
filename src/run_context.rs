//! Per-request container owning isolated instances of the message bus,
//! blackboard, task delegation manager, collaboration manager, and learning
//! store for exactly one analysis run.
//!
//! Per spec §4.6/§9, these five subsystems are never shared across runs and
//! there is no global singleton fallback in production; a process-wide
//! registry holds only [`Weak`] references, used for operational lookup
//! (list/get/cancel-by-id) and debugging.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{watch, RwLock};

use crate::domain::models::run_limits::{RunId, RunLimits, RunStatus, RunTrace};
use crate::domain::models::swarm_event::{AgentInsight, AgentResult};
use crate::domain::swarm_errors::RunContextError;
use crate::services::blackboard::Blackboard;
use crate::services::collaboration::{CollaborationManager, CollaborationTimeouts};
use crate::services::learning_store::LearningStore;
use crate::services::message_bus::MessageBus;
use crate::services::task_delegation::TaskDelegationManager;

/// `on_progress`, `on_agent_start`, `on_agent_complete`, `on_insight` — the
/// four hooks a transport layer binds to observe a run in flight (spec §6).
#[derive(Default)]
pub struct RunCallbacks {
    pub on_progress: Option<Arc<dyn Fn(&str, &str, u8, Option<&str>) + Send + Sync>>,
    pub on_agent_start: Option<Arc<dyn Fn(&str, &str, &str) + Send + Sync>>,
    pub on_agent_complete: Option<Arc<dyn Fn(&str, &str, &AgentResult) + Send + Sync>>,
    pub on_insight: Option<Arc<dyn Fn(&str, &str, &AgentInsight) + Send + Sync>>,
}

/// Concurrency ceilings derived from [`RunLimits`] and shared by every
/// agent running under this context.
pub struct RunSemaphores {
    pub llm: tokio::sync::Semaphore,
    pub scrape: tokio::sync::Semaphore,
}

/// One isolated analysis run. Exclusively owns its bus, blackboard, task
/// manager, collaboration manager, and learning store; these are destroyed
/// when the context is dropped.
pub struct RunContext {
    pub id: RunId,
    pub user_id: Option<String>,
    pub metadata: JsonValue,
    status: RwLock<RunStatus>,
    error: RwLock<Option<String>>,
    created_at: DateTime<Utc>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    completed_at: RwLock<Option<DateTime<Utc>>>,
    pub limits: RunLimits,
    pub semaphores: RunSemaphores,
    pub bus: Arc<MessageBus>,
    pub blackboard: Arc<Blackboard>,
    pub task_manager: Arc<TaskDelegationManager>,
    pub collaboration: Arc<CollaborationManager>,
    pub learning: Arc<LearningStore>,
    trace: RwLock<RunTrace>,
    cancel_tx: watch::Sender<Option<String>>,
    cancel_rx: watch::Receiver<Option<String>>,
    pub callbacks: RwLock<RunCallbacks>,
}

type Registry = RwLock<HashMap<String, Weak<RunContext>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

impl RunContext {
    /// Allocates a 12-hex-character run id, builds one fresh instance each
    /// of the five owned subsystems, and registers a weak reference for
    /// operational lookup.
    #[must_use]
    pub async fn create(user_id: Option<String>, limits: Option<RunLimits>, trace_enabled: bool) -> Arc<Self> {
        let limits = limits.unwrap_or_default();
        let bus = Arc::new(MessageBus::default());
        let blackboard = Arc::new(Blackboard::new());
        let task_manager = Arc::new(TaskDelegationManager::new());
        let collaboration = Arc::new(CollaborationManager::new(
            bus.clone(),
            blackboard.clone(),
            CollaborationTimeouts::default(),
        ));
        let learning = Arc::new(LearningStore::new());
        let (cancel_tx, cancel_rx) = watch::channel(None);

        let ctx = Arc::new(Self {
            id: RunId::generate(),
            user_id,
            metadata: JsonValue::Null,
            status: RwLock::new(RunStatus::Pending),
            error: RwLock::new(None),
            created_at: Utc::now(),
            started_at: RwLock::new(None),
            completed_at: RwLock::new(None),
            semaphores: RunSemaphores {
                llm: tokio::sync::Semaphore::new(limits.llm_concurrency),
                scrape: tokio::sync::Semaphore::new(limits.scrape_concurrency),
            },
            limits,
            bus,
            blackboard,
            task_manager,
            collaboration,
            learning,
            trace: RwLock::new(RunTrace::new(trace_enabled)),
            cancel_tx,
            cancel_rx,
            callbacks: RwLock::new(RunCallbacks::default()),
        });

        registry()
            .write()
            .await
            .insert(ctx.id.to_string(), Arc::downgrade(&ctx));
        ctx
    }

    pub async fn get(run_id: &str) -> Option<Arc<Self>> {
        registry().read().await.get(run_id).and_then(Weak::upgrade)
    }

    /// Evicts registry entries for runs that are both terminal and older
    /// than `max_age`, plus any entry whose context has already been
    /// dropped.
    pub async fn cleanup_old_runs(max_age: chrono::Duration) {
        let mut reg = registry().write().await;
        let mut stale = Vec::new();
        for (id, weak) in reg.iter() {
            match weak.upgrade() {
                None => stale.push(id.clone()),
                Some(ctx) => {
                    let terminal = matches!(
                        *ctx.status.read().await,
                        RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Timeout
                    );
                    if terminal && Utc::now() - ctx.created_at > max_age {
                        stale.push(id.clone());
                    }
                }
            }
        }
        for id in stale {
            reg.remove(&id);
        }
    }

    pub async fn status(&self) -> RunStatus {
        *self.status.read().await
    }

    pub async fn start(&self) {
        *self.status.write().await = RunStatus::Running;
        *self.started_at.write().await = Some(Utc::now());
        self.trace
            .write()
            .await
            .log("run_started", None, JsonValue::Null);
    }

    pub async fn complete(&self, success: bool, error: Option<String>) {
        *self.status.write().await = if success { RunStatus::Completed } else { RunStatus::Failed };
        *self.completed_at.write().await = Some(Utc::now());
        if let Some(err) = &error {
            *self.error.write().await = Some(err.clone());
        }
        self.trace.write().await.log(
            "run_completed",
            None,
            serde_json::json!({"success": success, "error": error}),
        );
    }

    /// Terminates the run with status=TIMEOUT after the total run timeout
    /// elapses, distinct from an ordinary failure or a cooperative cancel.
    pub async fn timeout(&self, error: impl Into<String>) {
        let error = error.into();
        *self.status.write().await = RunStatus::Timeout;
        *self.completed_at.write().await = Some(Utc::now());
        *self.error.write().await = Some(error.clone());
        self.trace
            .write()
            .await
            .log("run_timeout", None, serde_json::json!({"error": error}));
    }

    pub async fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        *self.status.write().await = RunStatus::Cancelled;
        *self.error.write().await = Some(format!("Run cancelled by {reason}"));
        let _ = self.cancel_tx.send(Some(reason.clone()));
        self.trace
            .write()
            .await
            .log("run_cancelled", None, serde_json::json!({"reason": reason}));
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_rx.borrow().is_some()
    }

    #[must_use]
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_rx.borrow().clone()
    }

    pub async fn set_callbacks(&self, callbacks: RunCallbacks) {
        *self.callbacks.write().await = callbacks;
    }

    pub async fn emit_progress(&self, agent_id: &str, percent: u8, message: Option<&str>) {
        let percent = percent.min(100);
        if let Some(cb) = &self.callbacks.read().await.on_progress {
            cb(&self.id.to_string(), agent_id, percent, message);
        }
        self.trace.write().await.log(
            "agent_progress",
            Some(agent_id.to_string()),
            serde_json::json!({"percent": percent, "message": message}),
        );
    }

    pub async fn emit_agent_start(&self, agent_id: &str, name: &str) {
        if let Some(cb) = &self.callbacks.read().await.on_agent_start {
            cb(&self.id.to_string(), agent_id, name);
        }
        self.trace
            .write()
            .await
            .log("agent_started", Some(agent_id.to_string()), JsonValue::Null);
    }

    pub async fn emit_agent_complete(&self, agent_id: &str, result: &AgentResult) {
        if let Some(cb) = &self.callbacks.read().await.on_agent_complete {
            cb(&self.id.to_string(), agent_id, result);
        }
        self.trace.write().await.log(
            "agent_complete",
            Some(agent_id.to_string()),
            serde_json::to_value(result).unwrap_or(JsonValue::Null),
        );
    }

    pub async fn emit_insight(&self, agent_id: &str, insight: &AgentInsight) {
        if let Some(cb) = &self.callbacks.read().await.on_insight {
            cb(&self.id.to_string(), agent_id, insight);
        }
        self.trace.write().await.log(
            "agent_insight",
            Some(agent_id.to_string()),
            serde_json::to_value(insight).unwrap_or(JsonValue::Null),
        );
    }

    /// Debug/introspection snapshot: id, status, timestamps, duration, bus
    /// and blackboard stats, and the trace log. Mirrors
    /// `run_context.py::get_state()`.
    pub async fn debug_snapshot(&self) -> JsonValue {
        let started = *self.started_at.read().await;
        let completed = *self.completed_at.read().await;
        let duration_ms = match (started, completed) {
            (Some(s), Some(c)) => Some((c - s).num_milliseconds()),
            (Some(s), None) => Some((Utc::now() - s).num_milliseconds()),
            _ => None,
        };
        serde_json::json!({
            "run_id": self.id.to_string(),
            "status": *self.status.read().await,
            "error": *self.error.read().await,
            "created_at": self.created_at,
            "started_at": started,
            "completed_at": completed,
            "duration_ms": duration_ms,
            "bus_stats": self.bus.get_stats().await,
            "blackboard_stats": self.blackboard.get_stats().await,
            "trace_event_count": self.trace.read().await.events.len(),
        })
    }

    /// Raised when an agent attempts to initialize against a run context
    /// other than the one it was first bound to. Production code is
    /// expected to never hit this — it guards the invariant that an agent
    /// instance is single-run at a time.
    pub fn reject_reuse(agent_id: &str, previous_run: &str, new_run: &str) -> RunContextError {
        RunContextError::RunReuseWithoutReset {
            agent_id: agent_id.to_string(),
            previous_run: previous_run.to_string(),
            new_run: new_run.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_transitions_pending_running_completed() {
        let ctx = RunContext::create(None, None, true).await;
        assert_eq!(ctx.status().await, RunStatus::Pending);
        ctx.start().await;
        assert_eq!(ctx.status().await, RunStatus::Running);
        ctx.complete(true, None).await;
        assert_eq!(ctx.status().await, RunStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_sets_signal_and_reason() {
        let ctx = RunContext::create(None, None, false).await;
        ctx.cancel("user").await;
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.status().await, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn registry_resolves_by_id_while_alive() {
        let ctx = RunContext::create(None, None, false).await;
        let found = RunContext::get(&ctx.id.to_string()).await;
        assert!(found.is_some());
    }
}
