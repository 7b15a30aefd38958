//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod blackboard;
pub mod collaboration;
pub mod config;
pub mod dynamic_task;
pub mod learning;
pub mod message;
pub mod run_limits;
pub mod swarm_event;

pub use blackboard::{BlackboardEntry, DataCategory, Subscription as BlackboardSubscription};
pub use collaboration::{
    has_consensus, tally_choices, tally_votes, CollaborationInput, CollaborationPhase,
    CollaborationResult, Vote, VoteTally,
};
pub use config::{CircuitBreakerSettings, SwarmConfig};
pub use dynamic_task::{
    AgentCapability, DynamicTask, DynamicTaskPriority, DynamicTaskStatus,
};
pub use learning::{
    evaluate_correctness, should_adjust_confidence, CalibrationTrend, LearnedRule, LearningStats,
    Prediction, TypeStats, MAX_LEARNED_RULES_PER_AGENT,
};
pub use message::{DeliveryStatus, Message, MessageBuilder, MessagePriority, MessageType};
pub use run_limits::{RunId, RunLimits, RunStatus, RunTrace, TraceEvent};
pub use swarm_event::{
    AgentInsight, AgentResult, AgentRunStatus, InsightKind, OrchestrationResult, SwarmEvent,
    SwarmStats, SwarmSummary,
};
