//! Abathur Swarm — a multi-agent orchestration runtime.
//!
//! Executes a fixed pipeline of cooperating analysis agents and produces a
//! composite report about a target. The hard engineering problem lives in
//! the swarm runtime itself:
//!
//! - [`run_context`]: per-run isolated execution context
//! - [`services::message_bus`]: priority-queued, circuit-broken inter-agent messaging
//! - [`services::blackboard`]: reactive, versioned, glob-subscribable shared memory
//! - [`services::collaboration`]: multi-phase consensus sessions
//! - [`services::task_delegation`]: capability-scored dynamic task assignment
//! - [`services::learning_store`]: prediction/calibration memory
//! - [`orchestrator`]: dependency-resolving phase scheduler
//! - [`base_agent`]: the contract agents implement to plug into the swarm
//!
//! Agent business logic, LLM prompt construction, HTTP scraping, transport
//! binding, authentication, and persistence backends are explicitly out of
//! scope for this crate; they are external collaborators consumed through
//! the interfaces declared here.

pub mod base_agent;
pub mod domain;
pub mod infrastructure;
pub mod orchestrator;
pub mod run_context;
pub mod services;

pub use base_agent::{AgentContext, BaseAgent, ExecutionOutcome};
pub use orchestrator::Orchestrator;
pub use run_context::RunContext;
