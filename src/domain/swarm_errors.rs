//! Error types for the swarm runtime components (message bus, blackboard,
//! task delegation, collaboration, run context, orchestrator).
//!
//! One flat `thiserror` enum per component, following the convention in
//! [`super::error`].

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by [`crate::services::message_bus::MessageBus`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("agent not registered: {0}")]
    AgentNotRegistered(String),

    #[error("circuit open for recipient {0}, message dead-lettered")]
    CircuitOpen(String),

    #[error("timed out waiting for a response after {0:?}")]
    ResponseTimeout(std::time::Duration),

    #[error("direct message requires a recipient")]
    MissingRecipient,
}

/// Errors raised by [`crate::services::blackboard::Blackboard`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlackboardError {
    #[error("invalid glob pattern: {0}")]
    InvalidPattern(String),

    #[error("entry not found for key: {0}")]
    NotFound(String),
}

/// Errors raised by [`crate::services::task_delegation::TaskDelegationManager`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskDelegationError {
    #[error("agent not registered: {0}")]
    AgentNotRegistered(String),

    #[error("no eligible agent for task type: {0}")]
    NoEligibleAgent(String),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("agent {assignee} attempted to complete task {task_id} assigned to a different agent")]
    NotAssignee { task_id: Uuid, assignee: String },

    #[error("task {0} timed out before completion")]
    Timeout(Uuid),

    #[error("task {0} failed and has no retries remaining")]
    Exhausted(Uuid),
}

/// Errors raised by [`crate::services::collaboration::CollaborationManager`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaborationError {
    #[error("collaboration session not found: {0}")]
    SessionNotFound(String),

    #[error("collaboration session {0} timed out in phase {1:?}")]
    PhaseTimeout(String, crate::domain::models::CollaborationPhase),

    #[error("collaboration requires at least one participant besides the facilitator")]
    NoParticipants,
}

/// Errors raised by [`crate::run_context::RunContext`] and
/// [`crate::base_agent::BaseAgent`] wiring.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunContextError {
    #[error(
        "agent {agent_id} was already initialized for run {previous_run} and cannot be reused for run {new_run} without explicit re-registration"
    )]
    RunReuseWithoutReset {
        agent_id: String,
        previous_run: String,
        new_run: String,
    },

    #[error(
        "agent has no RunContext and ALLOW_GLOBAL_SINGLETON_FALLBACK is not set; production code must call set_run_context"
    )]
    NoRunContext,

    #[error("run {0} not found in the run registry")]
    RunNotFound(String),
}

/// Errors raised by [`crate::orchestrator::Orchestrator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("dependency cycle detected among agents: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("agent {0} declares a dependency on unregistered agent {1}")]
    UnknownDependency(String, String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("agent {agent_id} timed out after {timeout:?}")]
    AgentTimeout {
        agent_id: String,
        timeout: std::time::Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_display() {
        let err = BusError::CircuitOpen("analyst".into());
        assert_eq!(
            err.to_string(),
            "circuit open for recipient analyst, message dead-lettered"
        );
    }

    #[test]
    fn orchestrator_error_display() {
        let err = OrchestratorError::UnknownDependency("strategist".into(), "ghost".into());
        assert_eq!(
            err.to_string(),
            "agent strategist declares a dependency on unregistered agent ghost"
        );
    }
}
